use super::DatasetError;
use crate::common::*;

/// The name of the background class, label `0`.
pub const BACKGROUND: &str = "__background__";

/// The name reported for labels that the map does not know.
pub const UNKNOWN: &str = "Unknown";

/// The bijection between category names and dense labels in `[1, K]`.
///
/// Label `0` is reserved for the background and never assigned. Names keep
/// their first-seen order, which is part of a trained model's output contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMap {
    names: IndexSet<String>,
}

#[derive(Serialize, Deserialize)]
struct CategoryFile {
    categories: Vec<String>,
}

impl CategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from a list of distinct names.
    pub fn from_names<S>(names: impl IntoIterator<Item = S>) -> Result<Self>
    where
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let set: IndexSet<_> = names.iter().cloned().collect();
        ensure!(names.len() == set.len(), "duplicated category names found");
        Ok(Self { names: set })
    }

    /// Inserts a name if absent and returns its label.
    pub fn insert(&mut self, name: &str) -> i64 {
        let (index, _) = self.names.insert_full(name.to_owned());
        index as i64 + 1
    }

    pub fn name_to_idx(&self, name: &str) -> Option<i64> {
        self.names.get_index_of(name).map(|index| index as i64 + 1)
    }

    pub fn idx_to_name(&self, label: i64) -> Option<&str> {
        if label < 1 {
            return None;
        }
        self.names.get_index(label as usize - 1).map(String::as_str)
    }

    /// Looks up a label, falling back to [UNKNOWN].
    pub fn name_or_unknown(&self, label: i64) -> &str {
        self.idx_to_name(label).unwrap_or(UNKNOWN)
    }

    /// The number of classes including the background.
    pub fn num_classes(&self) -> usize {
        self.names.len() + 1
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = CategoryFile {
            categories: self.names.iter().cloned().collect(),
        };
        let text = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, text).map_err(|source| DatasetError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_owned(),
            source,
        })?;
        let CategoryFile { categories } = serde_json::from_str(&text)
            .map_err(|err| DatasetError::data_format(path, err))?;
        let map = Self::from_names(categories)
            .with_context(|| format!("invalid category file '{}'", path.display()))?;
        ensure!(!map.is_empty(), "no categories found in '{}'", path.display());
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_first_seen_order() {
        let mut map = CategoryMap::new();
        assert_eq!(map.insert("plastic"), 1);
        assert_eq!(map.insert("metal"), 2);
        assert_eq!(map.insert("plastic"), 1);
        assert_eq!(map.insert("paper"), 3);

        assert_eq!(map.num_classes(), 4);
        assert_eq!(map.idx_to_name(0), None);
        assert_eq!(map.idx_to_name(4), None);
        assert_eq!(map.name_or_unknown(9), UNKNOWN);

        for name in ["plastic", "metal", "paper"] {
            let label = map.name_to_idx(name).unwrap();
            assert_ne!(label, 0);
            assert_eq!(map.idx_to_name(label), Some(name));
        }
    }

    #[test]
    fn category_reject_duplicates() {
        assert!(CategoryMap::from_names(["a", "b", "a"]).is_err());
    }

    #[test]
    fn category_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("categories.json");
        let map = CategoryMap::from_names(["glass", "cardboard"])?;
        map.save(&path)?;
        assert_eq!(CategoryMap::load(&path)?, map);
        Ok(())
    }
}
