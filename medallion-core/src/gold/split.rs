//! Reproducible train/test partitioning.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How rows are assigned to the test partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitPolicy {
    /// Per-row decision from a seeded hash of the key column. A row keeps
    /// its partition regardless of row order or table growth.
    #[default]
    Hash,
    /// Seeded shuffle; the first `round(n * test_size)` shuffled rows are test.
    Shuffle,
}

/// Row indices of each partition, both in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Map `(seed, key)` to a uniform value in `[0, 1)`.
pub fn hash_fraction(seed: u64, key: &str) -> f64 {
    let digest = Sha256::digest(format!("{seed}:{key}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    // Keep the top 53 bits so the quotient is exact and strictly below 1.
    (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

/// Partition rows by hashing each key.
pub fn split_by_hash<'a>(
    keys: impl Iterator<Item = &'a str>,
    test_size: f64,
    seed: u64,
) -> SplitAssignment {
    let mut split = SplitAssignment::default();
    for (idx, key) in keys.enumerate() {
        if hash_fraction(seed, key.trim()) < test_size {
            split.test.push(idx);
        } else {
            split.train.push(idx);
        }
    }
    split
}

/// Partition `n` rows with a seeded shuffle.
pub fn split_by_shuffle(n: usize, test_size: f64, seed: u64) -> SplitAssignment {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n_test = ((n as f64) * test_size).round() as usize;
    let mut is_test = vec![false; n];
    for &idx in order.iter().take(n_test) {
        is_test[idx] = true;
    }

    let mut split = SplitAssignment::default();
    for (idx, test) in is_test.into_iter().enumerate() {
        if test {
            split.test.push(idx);
        } else {
            split.train.push(idx);
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (1..=n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_hash_fraction_in_unit_interval() {
        for key in keys(500) {
            let f = hash_fraction(42, &key);
            assert!((0.0..1.0).contains(&f));
        }
        assert_eq!(hash_fraction(42, "7"), hash_fraction(42, "7"));
        assert_ne!(hash_fraction(42, "7"), hash_fraction(43, "7"));
    }

    #[test]
    fn test_hash_split_is_order_independent() {
        let ids = keys(200);
        let forward = split_by_hash(ids.iter().map(String::as_str), 0.2, 42);
        let test_keys: Vec<&str> = forward.test.iter().map(|&i| ids[i].as_str()).collect();

        let mut reversed = ids.clone();
        reversed.reverse();
        let backward = split_by_hash(reversed.iter().map(String::as_str), 0.2, 42);
        let mut back_keys: Vec<&str> = backward.test.iter().map(|&i| reversed[i].as_str()).collect();
        back_keys.reverse();
        assert_eq!(test_keys, back_keys);
    }

    #[test]
    fn test_hash_split_roughly_proportional() {
        let ids = keys(1000);
        let split = split_by_hash(ids.iter().map(String::as_str), 0.2, 42);
        assert!((120..=280).contains(&split.test.len()), "{}", split.test.len());
        assert_eq!(split.test.len() + split.train.len(), 1000);
    }

    #[test]
    fn test_shuffle_split_exact_size_and_order() {
        let split = split_by_shuffle(100, 0.2, 42);
        assert_eq!(split.test.len(), 20);
        assert_eq!(split.train.len(), 80);
        assert!(split.test.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(split, split_by_shuffle(100, 0.2, 42));
    }

    #[test]
    fn test_split_extremes() {
        let ids = keys(10);
        assert!(split_by_hash(ids.iter().map(String::as_str), 0.0, 1).test.is_empty());
        assert!(split_by_hash(ids.iter().map(String::as_str), 1.0, 1).train.is_empty());
        assert!(split_by_shuffle(10, 0.0, 1).test.is_empty());
        assert_eq!(split_by_shuffle(10, 1.0, 1).test.len(), 10);
        assert_eq!(split_by_shuffle(0, 0.5, 1), SplitAssignment::default());
    }

    #[test]
    fn test_policy_serde_lowercase() {
        assert_eq!(serde_json::to_string(&SplitPolicy::Shuffle).unwrap(), "\"shuffle\"");
        assert_eq!(SplitPolicy::default(), SplitPolicy::Hash);
    }
}
