//! Approval-number allocation.
//!
//! Numbers look like `ds-phone-004`. The next number for a prefix is the
//! largest existing suffix plus one. Allocation is read-then-write with no
//! lock, so two concurrent approvals of the same kind can receive the same
//! number.

use std::cmp::Ordering;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ApprovalPrefix {
    Phone,
    Tablet,
    Pass,
    Doc,
}

impl ApprovalPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "ds-phone",
            Self::Tablet => "ds-tablet",
            Self::Pass => "ds-pass",
            Self::Doc => "ds-doc",
        }
    }

    /// Classify a free-text application type. Keyword groups are checked in
    /// order phone, tablet, pass; the first hit wins.
    pub fn for_type(application_type: &str) -> Self {
        let lowered = application_type.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

        if has(&["phone", "휴대"]) {
            Self::Phone
        } else if has(&["tablet", "태블"]) {
            Self::Tablet
        } else if has(&["pass", "gate", "정문", "출입"]) {
            Self::Pass
        } else {
            Self::Doc
        }
    }

    /// `LIKE` pattern selecting candidate rows for [`next_number`].
    pub fn like_pattern(&self) -> String {
        format!("{}-%", self.as_str())
    }
}

impl std::fmt::Display for ApprovalPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn prefix_for(application_type: &str) -> ApprovalPrefix {
    ApprovalPrefix::for_type(application_type)
}

/// Compute `{prefix}-{max+1}` (at least three digits) from the existing
/// numbers. Strings that are not exactly `{prefix}-{digits}` are ignored.
/// Suffixes are compared and incremented as decimal strings, so there is no
/// upper bound on their length.
pub fn next_number<I, S>(prefix: ApprovalPrefix, existing: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let pattern = Regex::new(&format!(r"^{}-(\d+)$", regex::escape(prefix.as_str())))
        .expect("approval number pattern is a valid regex");

    let max = existing
        .into_iter()
        .filter_map(|n| {
            pattern
                .captures(n.as_ref())
                .and_then(|c| c.get(1))
                .map(|m| significant_digits(m.as_str()).to_string())
        })
        .max_by(|a, b| cmp_digits(a, b))
        .unwrap_or_else(|| "0".to_string());

    format!("{}-{:0>3}", prefix, increment_digits(&max))
}

/// Digit string without leading zeros; `"0"` for all-zero input.
fn significant_digits(digits: &str) -> &str {
    match digits.trim_start_matches('0') {
        "" => "0",
        rest => rest,
    }
}

/// Numeric order of two digit strings without leading zeros.
fn cmp_digits(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn increment_digits(digits: &str) -> String {
    let mut out: Vec<u8> = digits.bytes().collect();
    for d in out.iter_mut().rev() {
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            return out.into_iter().map(char::from).collect();
        }
    }
    std::iter::once('1')
        .chain(out.into_iter().map(char::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_order_first_match_wins() {
        assert_eq!(prefix_for("phone"), ApprovalPrefix::Phone);
        assert_eq!(prefix_for("휴대전화"), ApprovalPrefix::Phone);
        assert_eq!(prefix_for("TABLET"), ApprovalPrefix::Tablet);
        assert_eq!(prefix_for("태블릿PC"), ApprovalPrefix::Tablet);
        assert_eq!(prefix_for("Gate Pass"), ApprovalPrefix::Pass);
        assert_eq!(prefix_for("정문 출입"), ApprovalPrefix::Pass);
        // "phone" is checked before "pass"
        assert_eq!(prefix_for("phone pass"), ApprovalPrefix::Phone);
        assert_eq!(prefix_for("certificate"), ApprovalPrefix::Doc);
        assert_eq!(prefix_for(""), ApprovalPrefix::Doc);
    }

    #[test]
    fn test_first_number_is_001() {
        let none: Vec<String> = vec![];
        assert_eq!(next_number(ApprovalPrefix::Phone, none), "ds-phone-001");
    }

    #[test]
    fn test_next_number_takes_max_not_count() {
        let existing = ["ds-phone-001", "ds-phone-003", "ds-phone-002"];
        assert_eq!(next_number(ApprovalPrefix::Phone, existing), "ds-phone-004");
    }

    #[test]
    fn test_ignores_other_prefixes_and_garbage() {
        let existing = [
            "ds-phone-9",
            "ds-phone-010x",
            "ds-phone-",
            "ds-pass-500",
            "xds-phone-777",
            "ds-phone-abc",
        ];
        assert_eq!(next_number(ApprovalPrefix::Phone, existing), "ds-phone-010");
    }

    #[test]
    fn test_grows_past_three_digits() {
        let existing = ["ds-tablet-999"];
        assert_eq!(next_number(ApprovalPrefix::Tablet, existing), "ds-tablet-1000");
    }

    #[test]
    fn test_next_is_strictly_greater_than_all_prior() {
        let existing = vec!["ds-pass-012".to_string(), "ds-pass-7".to_string()];
        let next = next_number(ApprovalPrefix::Pass, &existing);
        let suffix: u64 = next.rsplit('-').next().unwrap().parse().unwrap();
        assert!(existing
            .iter()
            .all(|n| n.rsplit('-').next().unwrap().parse::<u64>().unwrap() < suffix));
    }

    #[test]
    fn test_suffix_beyond_u64_keeps_counting() {
        let existing = ["ds-phone-18446744073709551615", "ds-phone-002"];
        assert_eq!(
            next_number(ApprovalPrefix::Phone, existing),
            "ds-phone-18446744073709551616"
        );

        let existing = ["ds-phone-99999999999999999999999", "ds-phone-5"];
        assert_eq!(
            next_number(ApprovalPrefix::Phone, existing),
            "ds-phone-100000000000000000000000"
        );
    }

    #[test]
    fn test_leading_zeros_do_not_inflate_order() {
        let existing = ["ds-pass-0000000009", "ds-pass-010"];
        assert_eq!(next_number(ApprovalPrefix::Pass, existing), "ds-pass-011");

        let existing = ["ds-pass-000"];
        assert_eq!(next_number(ApprovalPrefix::Pass, existing), "ds-pass-001");
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(ApprovalPrefix::Doc.like_pattern(), "ds-doc-%");
    }
}
