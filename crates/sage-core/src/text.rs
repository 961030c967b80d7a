//! Small string helpers shared by progress messages and diagnostics.

/// The first `max` characters of `s` (Unicode scalar values, never splitting one).
///
/// # Examples
///
/// ```
/// use sage_core::text::truncate_chars;
///
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// assert_eq!(truncate_chars("hi", 10), "hi");
/// ```
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Format `n` with `,` thousands separators.
///
/// # Examples
///
/// ```
/// use sage_core::text::group_thousands;
///
/// assert_eq!(group_thousands(1234567), "1,234,567");
/// assert_eq!(group_thousands(999), "999");
/// ```
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_exact_length_is_unchanged() {
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("", 0), "");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn truncate_counts_multibyte_as_one() {
        let s = "\u{1f600}\u{1f600}\u{1f600}";
        assert_eq!(truncate_chars(s, 2).chars().count(), 2);
    }

    #[test]
    fn thousands_boundaries() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(100000), "100,000");
    }
}
