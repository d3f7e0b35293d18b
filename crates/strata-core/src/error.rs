//! Error types for strata operations.

use std::fmt;
use std::io;

/// All possible strata errors.
///
/// The variants split into two severities (see [`StrataError::is_fatal`]):
/// fatal errors abort the current file's transaction outright, while
/// non-fatal ones are reported and let a batch driver move on to the next
/// file with a nonzero final status.
#[derive(Debug)]
pub enum StrataError {
    /// Structural parse failure in a store file, with the input line number.
    Format { line: u32, msg: String },
    /// A revision, branch, or predicate could not be resolved.
    Semantic(String),
    /// The revision is locked by someone else (`holder`), or — when a lock
    /// is required — nobody holds one (`holder` is `None`).
    LockConflict {
        rev: String,
        holder: Option<String>,
    },
    /// A requested revision number is not greater than the number it must
    /// extend.
    Numbering { given: String, required: String },
    /// A stored diff script is malformed or addresses lines out of range.
    CorruptDiff(String),
    /// An I/O error occurred.
    Io(io::Error),
}

impl StrataError {
    /// Fatal errors abort the current file's transaction and guarantee the
    /// on-disk store is untouched; non-fatal errors are reported and the
    /// batch continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StrataError::Format { .. } | StrataError::CorruptDiff(_) | StrataError::Io(_)
        )
    }
}

impl fmt::Display for StrataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrataError::Format { line, msg } => write!(f, "store format error, line {line}: {msg}"),
            StrataError::Semantic(msg) => write!(f, "{msg}"),
            StrataError::LockConflict {
                rev,
                holder: Some(holder),
            } => write!(f, "revision {rev} is locked by {holder}"),
            StrataError::LockConflict { rev, holder: None } => {
                write!(f, "no lock set on revision {rev}")
            }
            StrataError::Numbering { given, required } => {
                write!(f, "revision {given} too low; must be higher than {required}")
            }
            StrataError::CorruptDiff(msg) => write!(f, "corrupt diff script: {msg}"),
            StrataError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for StrataError {}

impl From<io::Error> for StrataError {
    fn from(e: io::Error) -> Self {
        StrataError::Io(e)
    }
}

/// Convenience alias for Results in strata.
pub type StrataResult<T> = Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_split() {
        assert!(StrataError::CorruptDiff("x".into()).is_fatal());
        assert!(StrataError::Format {
            line: 3,
            msg: "x".into()
        }
        .is_fatal());
        assert!(!StrataError::Semantic("x".into()).is_fatal());
        assert!(!StrataError::Numbering {
            given: "1.2".into(),
            required: "1.3".into()
        }
        .is_fatal());
        assert!(!StrataError::LockConflict {
            rev: "1.2".into(),
            holder: Some("mel".into())
        }
        .is_fatal());
    }

    #[test]
    fn test_lock_conflict_display() {
        let held = StrataError::LockConflict {
            rev: "1.4".into(),
            holder: Some("kay".into()),
        };
        assert_eq!(held.to_string(), "revision 1.4 is locked by kay");

        let missing = StrataError::LockConflict {
            rev: "1.4".into(),
            holder: None,
        };
        assert_eq!(missing.to_string(), "no lock set on revision 1.4");
    }
}
