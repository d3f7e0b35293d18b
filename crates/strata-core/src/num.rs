//! Revision-number algebra.
//!
//! A revision number is a dotted sequence of non-negative integer fields,
//! e.g. `1.4` or `1.2.1.3`. A number with an even field count names one
//! revision; an odd field count names a branch (the path down to, but
//! excluding, the per-branch revision counter). The trunk is branch `1`
//! (or whatever the first field of `head` is), `1.2.1` is the first branch
//! rooted at revision `1.2`, and `1.2.1.3` is the third revision on it.
//!
//! Fields are kept as their original digit strings: comparison is numeric
//! (leading zeros ignored) and increment is decimal string arithmetic, so
//! fields never overflow a machine integer and the codec can round-trip
//! the text it read.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{StrataError, StrataResult};

/// A parsed dotted revision or branch number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevNum {
    fields: Vec<String>,
}

/// Numeric comparison of two digit-string fields, ignoring leading zeros.
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl RevNum {
    /// Parse a dotted number. Rejects empty input, empty fields, and
    /// non-digit characters.
    pub fn parse(text: &str) -> StrataResult<RevNum> {
        if text.is_empty() {
            return Err(StrataError::Semantic("empty revision number".to_string()));
        }
        let mut fields = Vec::new();
        for field in text.split('.') {
            if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(StrataError::Semantic(format!(
                    "bad revision number `{text}`"
                )));
            }
            fields.push(field.to_string());
        }
        Ok(RevNum { fields })
    }

    /// Number of dot-separated fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// An even field count names one revision.
    pub fn is_revision(&self) -> bool {
        self.fields.len() % 2 == 0
    }

    /// An odd field count names a branch.
    pub fn is_branch(&self) -> bool {
        self.fields.len() % 2 == 1
    }

    /// The i-th field as its digit string.
    pub fn field(&self, i: usize) -> Option<&str> {
        self.fields.get(i).map(String::as_str)
    }

    /// Compare only the i-th fields of two numbers. A missing field sorts
    /// as larger than any present one, which pushes "no match" entries to
    /// the end of a sorted walk.
    pub fn cmp_field(&self, other: &RevNum, i: usize) -> Ordering {
        match (self.fields.get(i), other.fields.get(i)) {
            (Some(a), Some(b)) => cmp_digits(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Add one to the last field. All-nines fields grow a digit
    /// (`1.999` increments to `1.1000`); the carry never crosses a dot.
    pub fn increment(&self) -> RevNum {
        let mut fields = self.fields.clone();
        if let Some(last) = fields.last_mut() {
            *last = increment_digits(last);
        }
        RevNum { fields }
    }

    /// For a revision number, the branch it lies on (drop the last field).
    /// `None` for a branch number or a single-field number.
    pub fn branch_of(&self) -> Option<RevNum> {
        if self.is_revision() && self.fields.len() >= 2 {
            Some(RevNum {
                fields: self.fields[..self.fields.len() - 1].to_vec(),
            })
        } else {
            None
        }
    }

    /// The first `k` fields, joined by dots.
    pub fn prefix(&self, k: usize) -> RevNum {
        let k = k.min(self.fields.len());
        RevNum {
            fields: self.fields[..k].to_vec(),
        }
    }

    /// True if `prefix` is a field-wise prefix of this number.
    pub fn starts_with(&self, prefix: &RevNum) -> bool {
        prefix.fields.len() <= self.fields.len()
            && prefix
                .fields
                .iter()
                .zip(&self.fields)
                .all(|(a, b)| cmp_digits(a, b) == Ordering::Equal)
    }

    /// A new number with one more field appended.
    pub fn append(&self, field: &str) -> RevNum {
        let mut fields = self.fields.clone();
        fields.push(field.to_string());
        RevNum { fields }
    }

    /// The last field as its digit string.
    pub fn last_field(&self) -> &str {
        self.fields
            .last()
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Decimal string increment.
fn increment_digits(digits: &str) -> String {
    let mut out: Vec<u8> = digits.as_bytes().to_vec();
    for b in out.iter_mut().rev() {
        if *b == b'9' {
            *b = b'0';
        } else {
            *b += 1;
            return String::from_utf8(out).expect("digits stay ascii");
        }
    }
    out.insert(0, b'1');
    String::from_utf8(out).expect("digits stay ascii")
}

impl Ord for RevNum {
    /// Field-wise numeric comparison; a number that runs out of fields
    /// while the other still has one sorts first. An absent *field* sorts
    /// largest, but that case only arises in [`RevNum::cmp_field`].
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.fields.iter().zip(&other.fields) {
            match cmp_digits(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.fields.len().cmp(&other.fields.len())
    }
}

impl PartialOrd for RevNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join("."))
    }
}

impl FromStr for RevNum {
    type Err = StrataError;

    fn from_str(s: &str) -> StrataResult<RevNum> {
        RevNum::parse(s)
    }
}

impl Serialize for RevNum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> RevNum {
        RevNum::parse(s).unwrap()
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(RevNum::parse("").is_err());
        assert!(RevNum::parse("1..2").is_err());
        assert!(RevNum::parse(".1").is_err());
        assert!(RevNum::parse("1.2.").is_err());
        assert!(RevNum::parse("1.x").is_err());
    }

    #[test]
    fn test_field_count_and_kind() {
        assert_eq!(n("1.4").field_count(), 2);
        assert!(n("1.4").is_revision());
        assert!(n("1.2.1").is_branch());
        assert!(n("1").is_branch());
        assert!(n("1.2.1.3").is_revision());
    }

    #[test]
    fn test_compare_is_numeric_not_lexicographic() {
        assert!(n("1.9") < n("1.10"));
        assert!(n("1.2") > n("1"));
        assert!(n("2.1") > n("1.99"));
        assert_eq!(n("1.04").cmp(&n("1.4")), Ordering::Equal);
    }

    #[test]
    fn test_cmp_field() {
        assert_eq!(n("1.9.2").cmp_field(&n("1.10.1"), 1), Ordering::Less);
        // An absent field sorts largest.
        assert_eq!(n("1.2").cmp_field(&n("1.2.5"), 2), Ordering::Greater);
        assert_eq!(n("1.2.5").cmp_field(&n("1.2"), 2), Ordering::Less);
        assert_eq!(n("1.2").cmp_field(&n("1.2"), 5), Ordering::Equal);
    }

    #[test]
    fn test_increment() {
        assert_eq!(n("1.9").increment().to_string(), "1.10");
        assert_eq!(n("1.999").increment().to_string(), "1.1000");
        assert_eq!(n("2.0").increment().to_string(), "2.1");
        for s in ["1.1", "1.9", "3.999", "1.2.1.9"] {
            let v = n(s);
            assert!(v < v.increment(), "{s} should sort below its increment");
        }
    }

    #[test]
    fn test_branch_of_and_prefix() {
        assert_eq!(n("1.2.1.3").branch_of().unwrap().to_string(), "1.2.1");
        assert_eq!(n("1.4").branch_of().unwrap().to_string(), "1");
        assert!(n("1.2.1").branch_of().is_none());
        assert_eq!(n("1.2.1.3").prefix(2).to_string(), "1.2");
    }

    #[test]
    fn test_starts_with() {
        assert!(n("1.2.1.3").starts_with(&n("1.2.1")));
        assert!(n("1.2.01.3").starts_with(&n("1.2.1")));
        assert!(!n("1.3.1.1").starts_with(&n("1.2")));
    }
}
