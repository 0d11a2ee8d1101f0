//! Utility functions and helpers for token benchmarking
//!
//! Naming of test vectors and thread-scoped labels, and parsing of the list
//! values found in the settings file.

use std::collections::BTreeSet;

use crate::error::{BenchError, Result};

/// `testvecNNNN`, zero padded to four digits.
pub fn test_vector_name(size: usize) -> String {
    format!("testvec{:04}", size)
}

/// Label of the key owned by one thread, or the plain label.
///
/// Session keys generated per thread are named `<label>-th-NNNNN`.
pub fn threaded_label(label: &str, thread: Option<usize>) -> String {
    match thread {
        Some(index) => format!("{}-th-{:05}", label, index),
        None => label.to_string(),
    }
}

/// Parse a vector size list such as `"8,16,0x40"`.
///
/// Commas and whitespace separate entries; `0x` prefixes are hexadecimal.
/// Duplicates collapse and the result is ascending.
pub fn parse_vector_sizes(list: &str) -> Result<Vec<usize>> {
    let mut sizes = BTreeSet::new();

    for token in list.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            Some(hex) => usize::from_str_radix(hex, 16),
            None => token.parse::<usize>(),
        };
        let size = parsed.map_err(|e| BenchError::Config(format!("invalid vector size '{}': {}", token, e)))?;
        sizes.insert(size);
    }

    if sizes.is_empty() {
        return Err(BenchError::Config("no test vector size given".to_string()));
    }
    Ok(sizes.into_iter().collect())
}

/// Parse a coverage list such as `"fixed, xorder,RAND"` into lowercase names.
pub fn parse_coverage(list: &str) -> BTreeSet<String> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_labels() {
        assert_eq!(test_vector_name(8), "testvec0008");
        assert_eq!(test_vector_name(4096), "testvec4096");
        assert_eq!(threaded_label("aes-128", Some(3)), "aes-128-th-00003");
        assert_eq!(threaded_label("aes-128", None), "aes-128");
    }

    #[test]
    fn vector_sizes() {
        assert_eq!(parse_vector_sizes("64,8, 16 0x10").unwrap(), vec![8, 16, 64]);
        assert!(parse_vector_sizes("8,abc").is_err());
        assert!(parse_vector_sizes(" , ").is_err());
    }

    #[test]
    fn coverage_is_case_insensitive() {
        let cov = parse_coverage("Fixed,xorder  RAND");
        assert!(cov.contains("fixed"));
        assert!(cov.contains("rand"));
        assert_eq!(cov.len(), 3);
    }
}
