use std::fmt::Display;

/// Which bound of a window request was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeViolation {
    /// `begin` or `end` is below zero.
    NegativeIndex,
    /// `begin` is greater than `end`.
    Reversed,
    /// `end` is not a column of the matrix.
    PastEnd,
}

impl Display for RangeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeViolation::NegativeIndex => write!(f, "indices must not be negative"),
            RangeViolation::Reversed => write!(f, "begin index is greater than end index"),
            RangeViolation::PastEnd => write!(f, "end index is past the last column"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid window [{begin}, {end}]{}: {violation}", for_columns(.column_count))]
    InvalidRange {
        begin: i64,
        end: i64,
        /// `None` when the window was rejected before any matrix was seen.
        column_count: Option<usize>,
        violation: RangeViolation,
    },
    #[error("expected a rectangular matrix. The first row has {expected} elements, but row {row} has {actual}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("a {rows}x{cols} matrix needs {} elements, but the buffer holds {actual}", .rows * .cols)]
    BufferLength {
        rows: usize,
        cols: usize,
        actual: usize,
    },
    #[error("cannot tell the column count of a matrix with no rows")]
    NoRows,
    #[error("extraction cancelled after {rows_done} rows")]
    Cancelled { rows_done: usize },
}

impl Error {
    pub(crate) fn invalid_range(
        begin: i64,
        end: i64,
        column_count: usize,
        violation: RangeViolation,
    ) -> Self {
        Error::InvalidRange {
            begin,
            end,
            column_count: Some(column_count),
            violation,
        }
    }
}

fn for_columns(column_count: &Option<usize>) -> String {
    match column_count {
        Some(count) => format!(" for {count} columns"),
        None => String::new(),
    }
}

#[cfg(test)]
#[test]
fn test_invalid_range_message_names_indices() {
    let error = Error::invalid_range(5, 2, 10, RangeViolation::Reversed);
    let message = error.to_string();
    assert!(message.contains("[5, 2]"));
    assert!(message.contains("10 columns"));
    assert!(message.contains("greater than"));
}

#[cfg(test)]
#[test]
fn test_invalid_range_without_columns() {
    let error = Error::InvalidRange {
        begin: -1,
        end: 2,
        column_count: None,
        violation: RangeViolation::NegativeIndex,
    };
    assert_eq!(
        error.to_string(),
        "invalid window [-1, 2]: indices must not be negative"
    );
}
