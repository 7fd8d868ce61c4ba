use std::{fmt::Display, ops::Range};

use crate::{Error, RangeViolation};

/// An inclusive range of columns, `[begin, end]`.
///
/// A `Window` is always ordered. Whether it fits a particular matrix is
/// checked separately with [`Window::validate`], since the same window is
/// usually applied to many files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    begin: usize,
    end: usize,
}

impl Window {
    /// Accepts signed indices so a negative request is reported instead of
    /// wrapping around.
    pub fn new(begin: i64, end: i64) -> Result<Self, Error> {
        let invalid = |violation| Error::InvalidRange {
            begin,
            end,
            column_count: None,
            violation,
        };
        if begin < 0 || end < 0 {
            return Err(invalid(RangeViolation::NegativeIndex));
        }
        if begin > end {
            return Err(invalid(RangeViolation::Reversed));
        }
        let (Ok(begin), Ok(end)) = (usize::try_from(begin), usize::try_from(end)) else {
            return Err(invalid(RangeViolation::PastEnd));
        };
        Ok(Self { begin, end })
    }

    /// Build a window and check it against `column_count` in one step.
    pub fn checked(begin: i64, end: i64, column_count: usize) -> Result<Self, Error> {
        match Self::new(begin, end) {
            Ok(window) => window.validate(column_count).map(|()| window),
            Err(Error::InvalidRange {
                begin,
                end,
                violation,
                ..
            }) => Err(Error::invalid_range(begin, end, column_count, violation)),
            Err(other) => Err(other),
        }
    }

    /// Check that every column of the window exists in a matrix with
    /// `column_count` columns.
    pub fn validate(&self, column_count: usize) -> Result<(), Error> {
        if self.end >= column_count {
            return Err(Error::invalid_range(
                self.begin as i64,
                self.end as i64,
                column_count,
                RangeViolation::PastEnd,
            ));
        }
        Ok(())
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of columns selected. Never zero.
    pub fn len(&self) -> usize {
        self.end - self.begin + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The window as a half-open column range.
    pub fn columns(&self) -> Range<usize> {
        self.begin..self.end + 1
    }
}

impl Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}

#[cfg(test)]
#[test]
fn test_window_bounds() {
    let window = Window::new(1000, 1999).unwrap();
    assert_eq!(window.len(), 1000);
    assert_eq!(window.columns(), 1000..2000);
    assert_eq!(window.to_string(), "[1000, 1999]");
    assert!(window.validate(2000).is_ok());
    assert!(window.validate(1999).is_err());

    let single = Window::new(4, 4).unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single.columns(), 4..5);
}

#[cfg(test)]
#[test]
fn test_window_rejections() {
    let violation = |result: Result<Window, Error>| match result {
        Err(Error::InvalidRange { violation, .. }) => violation,
        other => panic!("expected an invalid range, got {other:?}"),
    };
    assert_eq!(violation(Window::new(-1, 2)), RangeViolation::NegativeIndex);
    assert_eq!(violation(Window::new(0, -3)), RangeViolation::NegativeIndex);
    assert_eq!(violation(Window::new(5, 2)), RangeViolation::Reversed);
    assert_eq!(violation(Window::checked(0, 5, 5)), RangeViolation::PastEnd);
    assert_eq!(violation(Window::checked(0, 0, 0)), RangeViolation::PastEnd);
}

#[cfg(test)]
#[test]
fn test_checked_window_reports_column_count() {
    assert_eq!(
        Window::checked(-1, 2, 8).unwrap_err(),
        Error::InvalidRange {
            begin: -1,
            end: 2,
            column_count: Some(8),
            violation: RangeViolation::NegativeIndex,
        }
    );
}

#[cfg(test)]
#[test]
fn test_unchecked_window_has_no_column_count() {
    let error = Window::new(-1, 2).unwrap_err();
    assert!(matches!(
        error,
        Error::InvalidRange {
            column_count: None,
            ..
        }
    ));
    assert!(!error.to_string().contains("columns"));
}
