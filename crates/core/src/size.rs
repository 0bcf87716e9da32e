//! Byte size helpers.

use crate::error::{Error, Result};

const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];

/// Format a byte count using binary units with two decimals.
///
/// Values below one kibibyte are printed as `N Bytes`.
pub fn format_size(bytes: i64) -> String {
    if bytes < 1024 {
        return format!("{bytes} Bytes");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Reject negative byte counts.
pub fn non_negative(bytes: i64) -> Result<i64> {
    if bytes < 0 {
        Err(Error::InvalidSize(bytes))
    } else {
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_sizes_are_bytes() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(17), "17 Bytes");
        assert_eq!(format_size(1023), "1023 Bytes");
    }

    #[test]
    fn test_binary_units() {
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
        assert_eq!(format_size(1 << 40), "1.00 TB");
        assert_eq!(format_size(1 << 50), "1.00 PB");
        assert_eq!(format_size(1 << 60), "1.00 EB");
    }

    #[test]
    fn test_non_negative() {
        assert_eq!(non_negative(0).unwrap(), 0);
        assert_eq!(non_negative(42).unwrap(), 42);
        assert!(matches!(non_negative(-1), Err(Error::InvalidSize(-1))));
    }

    #[test]
    fn test_largest_value_stays_in_exabytes() {
        assert_eq!(format_size(i64::MAX), "8.00 EB");
    }
}
