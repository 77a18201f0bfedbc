//! Tagged per-height record updates.
//!
//! The external source distinguishes "nothing changed at this height" from
//! "this height explicitly has zero records". Conflating the two under a
//! null-versus-empty-collection convention is an easy bug, so the
//! distinction is a first-class variant here.

use serde::{Deserialize, Serialize};

/// One height's worth of records for a single collection kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordBatch<R> {
    /// The caller asserts the collection is unchanged from the previous
    /// height. The store resolves this to an identical-to link.
    NoChange,
    /// The collection is explicitly empty at this height.
    Empty,
    /// The full collection valid at this height.
    Explicit(Vec<R>),
}

impl<R> RecordBatch<R> {
    /// The explicit records, if this batch carries any.
    ///
    /// Returns `Some(&[])` for [`Empty`](Self::Empty) and `None` for
    /// [`NoChange`](Self::NoChange): `Empty` is a real (zero-element)
    /// collection, `NoChange` is the absence of a signal.
    pub fn explicit_records(&self) -> Option<&[R]> {
        match self {
            Self::NoChange => None,
            Self::Empty => Some(&[]),
            Self::Explicit(records) => Some(records),
        }
    }

    /// Whether this batch is a no-change assertion.
    pub const fn is_no_change(&self) -> bool {
        matches!(self, Self::NoChange)
    }

    /// Map the record type, preserving the variant.
    pub fn map<T>(self, f: impl FnMut(R) -> T) -> RecordBatch<T> {
        match self {
            Self::NoChange => RecordBatch::NoChange,
            Self::Empty => RecordBatch::Empty,
            Self::Explicit(records) => RecordBatch::Explicit(records.into_iter().map(f).collect()),
        }
    }
}

impl<R> From<Vec<R>> for RecordBatch<R> {
    /// A vector is always an explicit collection; an empty vector becomes
    /// [`RecordBatch::Empty`].
    fn from(records: Vec<R>) -> Self {
        if records.is_empty() {
            Self::Empty
        } else {
            Self::Explicit(records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_change_has_no_records() {
        let batch: RecordBatch<u8> = RecordBatch::NoChange;
        assert!(batch.explicit_records().is_none());
        assert!(batch.is_no_change());
    }

    #[test]
    fn empty_is_an_explicit_zero_collection() {
        let batch: RecordBatch<u8> = RecordBatch::Empty;
        assert_eq!(batch.explicit_records(), Some(&[][..]));
        assert!(!batch.is_no_change());
    }

    #[test]
    fn vec_conversion_normalizes_empty() {
        assert_eq!(RecordBatch::<u8>::from(vec![]), RecordBatch::Empty);
        assert_eq!(
            RecordBatch::from(vec![7u8]),
            RecordBatch::Explicit(vec![7u8])
        );
    }
}
