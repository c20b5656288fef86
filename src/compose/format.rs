const LADDER: [(u64, char); 3] = [
    (1_000_000_000, 'B'),
    (1_000_000, 'M'),
    (1_000, 'K'),
];

/// Abbreviate a counter for display.
///
/// `>= 1e9` becomes `x.xB`, `>= 1e6` `x.xM`, `>= 1e3` `x.xK`, with one decimal truncated (not
/// rounded). Smaller values are printed as plain integers with thousands grouping.
pub fn format_count(n: u64) -> String {
    for (unit, suffix) in LADDER {
        if n >= unit {
            let tenths = n / (unit / 10);
            return format!("{}.{}{}", tenths / 10, tenths % 10, suffix);
        }
    }
    group_thousands(n)
}

/// `1234567 -> "1,234,567"`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i).is_multiple_of(3) {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_examples() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1.0K");
        assert_eq!(format_count(1500000), "1.5M");
        assert_eq!(format_count(2300000000), "2.3B");
    }

    #[test]
    fn decimals_truncate() {
        assert_eq!(format_count(1999), "1.9K");
        assert_eq!(format_count(999_999), "999.9K");
        assert_eq!(format_count(1_999_999_999), "1.9B");
        assert_eq!(format_count(12_345_678_901), "12.3B");
        assert_eq!(format_count(u64::MAX), "18446744073.7B");
    }

    #[test]
    fn grouping() {
        assert_eq!(group_thousands(7), "7");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }
}
