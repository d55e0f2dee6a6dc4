use super::{CategoryMap, DatasetError};
use crate::common::*;
use std::fs::File;

/// The columns an annotation table must provide.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "img_id",
    "img_file",
    "img_width",
    "img_height",
    "x",
    "y",
    "width",
    "height",
    "cat_name",
];

/// One labeled object as written in the annotation table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnotationRow {
    #[serde(rename = "img_id")]
    pub image_id: i64,
    #[serde(rename = "img_file")]
    pub image_file: PathBuf,
    #[serde(rename = "img_width")]
    pub image_width: f32,
    #[serde(rename = "img_height")]
    pub image_height: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(rename = "cat_name")]
    pub category_name: String,
}

impl AnnotationRow {
    pub fn xywh(&self) -> XYWH<f32> {
        XYWH::new(self.x, self.y, self.width, self.height)
    }
}

/// All objects of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub image_id: i64,
    pub image_file: PathBuf,
    /// The declared image size, used as the clipping bound.
    pub size: WH<f32>,
    pub rows: Vec<AnnotationRow>,
}

/// The parsed annotation table grouped by image.
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    source: PathBuf,
    data_dir: PathBuf,
    records: Vec<ImageRecord>,
    categories: CategoryMap,
}

impl AnnotationStore {
    pub fn load(table_file: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Result<Self> {
        let table_file = table_file.as_ref();
        let file = File::open(table_file).map_err(|source| DatasetError::Io {
            path: table_file.to_owned(),
            source,
        })?;
        let store = Self::from_reader(file, table_file, data_dir)?;
        info!(
            "loaded {} images with {} categories from '{}'",
            store.len(),
            store.categories.len(),
            table_file.display()
        );
        Ok(store)
    }

    /// Parses a table from any reader. `source` names the table in error messages.
    pub fn from_reader(
        reader: impl Read,
        source: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let source = source.as_ref();
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(::csv::Trim::All)
            .from_reader(reader);

        // check header
        let headers = reader
            .headers()
            .map_err(|err| DatasetError::data_format(source, err))?
            .clone();
        let missing: Vec<_> = REQUIRED_COLUMNS
            .iter()
            .filter(|&&column| !headers.iter().any(|header| header == column))
            .collect();
        if !missing.is_empty() {
            return Err(DatasetError::data_format(
                source,
                format!("missing required columns {:?}", missing),
            )
            .into());
        }

        // parse rows and group them by image
        let mut categories = CategoryMap::new();
        let mut groups: BTreeMap<i64, Vec<(u64, AnnotationRow)>> = BTreeMap::new();

        for record in reader.records() {
            let record = record.map_err(|err| DatasetError::data_format(source, err))?;
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            let row: AnnotationRow = record.deserialize(Some(&headers)).map_err(|err| {
                DatasetError::data_format(source, format!("line {}: {}", line, err))
            })?;

            categories.insert(&row.category_name);
            groups.entry(row.image_id).or_default().push((line, row));
        }

        let records: Vec<_> = groups
            .into_iter()
            .map(|(image_id, rows)| build_image_record(source, image_id, rows))
            .try_collect()?;

        Ok(Self {
            source: source.to_owned(),
            data_dir: data_dir.as_ref().to_owned(),
            records,
            categories,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    /// Image ids in ascending order.
    pub fn image_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.records.iter().map(|record| record.image_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record at a position of the ascending image index.
    pub fn record(&self, index: usize) -> Option<&ImageRecord> {
        self.records.get(index)
    }

    pub fn find(&self, image_id: i64) -> Option<&ImageRecord> {
        self.records
            .binary_search_by_key(&image_id, |record| record.image_id)
            .ok()
            .map(|index| &self.records[index])
    }

    pub fn image_path(&self, record: &ImageRecord) -> PathBuf {
        self.data_dir.join(&record.image_file)
    }
}

fn build_image_record(
    source: &Path,
    image_id: i64,
    rows: Vec<(u64, AnnotationRow)>,
) -> Result<ImageRecord, DatasetError> {
    let (first_line, first) = &rows[0];

    let size = WH::try_from_wh([first.image_width, first.image_height]).map_err(|_| {
        DatasetError::data_format(
            source,
            format!(
                "line {}: image {} has non-positive size {}x{}",
                first_line, image_id, first.image_width, first.image_height
            ),
        )
    })?;

    if let Some((line, _)) = rows.iter().find(|(_, row)| {
        row.image_file != first.image_file
            || row.image_width != first.image_width
            || row.image_height != first.image_height
    }) {
        return Err(DatasetError::data_format(
            source,
            format!(
                "line {}: file name or size of image {} disagrees with line {}",
                line, image_id, first_line
            ),
        ));
    }

    let image_file = first.image_file.clone();
    let rows: Vec<_> = rows.into_iter().map(|(_, row)| row).collect();

    Ok(ImageRecord {
        image_id,
        image_file,
        size,
        rows,
    })
}
