use crate::common::*;

/// Splits `0..len` into train and validation indices by a seeded permutation.
///
/// The train part holds `floor(len * train_ratio)` indices.
pub fn split_indices(len: usize, train_ratio: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    ensure!(
        (0.0..=1.0).contains(&train_ratio),
        "train_ratio must be in range [0, 1], but get {}",
        train_ratio
    );

    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train_len = (len as f64 * train_ratio).floor() as usize;
    let val = indices.split_off(train_len);
    Ok((indices, val))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_deterministic() -> Result<()> {
        let (train, val) = split_indices(11, 0.8, 42)?;
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 3);

        let mut all: Vec<_> = train.iter().chain(&val).cloned().collect();
        all.sort_unstable();
        assert_eq!(all, (0..11).collect::<Vec<_>>());

        assert_eq!(split_indices(11, 0.8, 42)?, (train, val));
        assert!(split_indices(11, 1.5, 42).is_err());
        Ok(())
    }
}
