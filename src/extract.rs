use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::debug;
use rayon::prelude::*;

use crate::{DataType, Error, Matrix, RangeViolation, Window};

/// Rows handed to a single rayon task at a time.
const MIN_ROWS_PER_TASK: usize = 64;

/// Copy the columns `begin..=end` of every row of `matrix` into a new matrix.
///
/// The result has shape `(matrix.rows(), end - begin + 1)`, the same element
/// type as the input and its own storage. A matrix with no rows produces a
/// result with no rows; the window is still checked against the column count.
pub fn extract<D: DataType>(matrix: &Matrix<D>, begin: i64, end: i64) -> Result<Matrix<D>, Error> {
    let window = Window::checked(begin, end, matrix.cols())?;
    WindowExtractor::new(window).run(matrix)
}

/// Configurable extraction of one window.
///
/// ```
/// use poi_window::{Matrix, Window, WindowExtractor};
///
/// let traces = Matrix::new(&[[1, 2, 3, 4, 5], [6, 7, 8, 9, 10]]).unwrap();
/// let pois = WindowExtractor::new(Window::new(1, 3).unwrap())
///     .parallel(true)
///     .run(&traces)
///     .unwrap();
/// assert_eq!(pois, Matrix::new(&[[2, 3, 4], [7, 8, 9]]).unwrap());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WindowExtractor<'c> {
    window: Window,
    parallel: bool,
    cancel: Option<&'c AtomicBool>,
}

impl<'c> WindowExtractor<'c> {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            parallel: false,
            cancel: None,
        }
    }

    /// Split the rows across the rayon thread pool.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Stop with [`Error::Cancelled`] once `flag` is set. The flag is read
    /// before each row is copied.
    pub fn cancel_flag(mut self, flag: &'c AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn run<D: DataType>(&self, matrix: &Matrix<D>) -> Result<Matrix<D>, Error> {
        let window = self.window;
        let [rows, cols] = matrix.shape();
        window.validate(cols)?;
        debug!(
            "extracting columns {window} from a {rows}x{cols} {} matrix",
            matrix.datatype()
        );

        let view = matrix
            .view()
            .slice([0..rows, window.columns()])
            .ok_or_else(|| {
                Error::invalid_range(
                    window.begin() as i64,
                    window.end() as i64,
                    cols,
                    RangeViolation::PastEnd,
                )
            })?;

        if self.cancel.is_none() && !self.parallel {
            return Ok(view.to_matrix());
        }
        self.copy_rows(matrix, |_| self.is_cancelled())
    }

    /// Copy the window row by row, asking `should_stop` with the row index
    /// before each row.
    fn copy_rows<D, F>(&self, matrix: &Matrix<D>, should_stop: F) -> Result<Matrix<D>, Error>
    where
        D: DataType,
        F: Fn(usize) -> bool + Sync,
    {
        let columns = self.window.columns();
        let width = self.window.len();
        let [rows, cols] = matrix.shape();
        let input = matrix.as_slice();
        let mut output = Matrix::zeros(rows, width);

        if !self.parallel {
            let output_rows = output.as_mut_slice().chunks_exact_mut(width);
            for (row, (src, dst)) in input.chunks_exact(cols).zip(output_rows).enumerate() {
                if should_stop(row) {
                    return Err(Error::Cancelled { rows_done: row });
                }
                dst.copy_from_slice(&src[columns.clone()]);
            }
            return Ok(output);
        }

        let rows_done = AtomicUsize::new(0);
        output
            .as_mut_slice()
            .par_chunks_exact_mut(width)
            .with_min_len(MIN_ROWS_PER_TASK)
            .enumerate()
            .try_for_each(|(row, dst)| {
                if should_stop(row) {
                    return Err(());
                }
                let start = row * cols;
                dst.copy_from_slice(&input[start + columns.start..start + columns.end]);
                rows_done.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .map_err(|()| Error::Cancelled {
                rows_done: rows_done.load(Ordering::Relaxed),
            })?;
        Ok(output)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
