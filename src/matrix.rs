use std::{
    fmt::{Debug, Display},
    ops::{Index, IndexMut, Range},
};

use bytemuck::{AnyBitPattern, NoUninit};

use crate::{layout::Layout, Error};

/// A fixed width numeric element a matrix can hold.
pub trait DataType: NoUninit + AnyBitPattern + Debug + Display + PartialEq + Send + Sync {
    const DATATYPE: DataTypeEnum;
}

/// The runtime tag of an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTypeEnum {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DataTypeEnum {
    /// Width of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataTypeEnum::I8 | DataTypeEnum::U8 => 1,
            DataTypeEnum::I16 | DataTypeEnum::U16 => 2,
            DataTypeEnum::I32 | DataTypeEnum::U32 | DataTypeEnum::F32 => 4,
            DataTypeEnum::I64 | DataTypeEnum::U64 | DataTypeEnum::F64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataTypeEnum::I8 => "int8",
            DataTypeEnum::U8 => "uint8",
            DataTypeEnum::I16 => "int16",
            DataTypeEnum::U16 => "uint16",
            DataTypeEnum::I32 => "int32",
            DataTypeEnum::U32 => "uint32",
            DataTypeEnum::I64 => "int64",
            DataTypeEnum::U64 => "uint64",
            DataTypeEnum::F32 => "float32",
            DataTypeEnum::F64 => "float64",
        }
    }
}

impl Display for DataTypeEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! impl_data_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl DataType for $ty {
                const DATATYPE: DataTypeEnum = DataTypeEnum::$variant;
            }
        )*
    };
}

impl_data_type!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

/// A dense row-major matrix that owns its elements.
#[derive(Clone, PartialEq)]
pub struct Matrix<D> {
    rows: usize,
    cols: usize,
    data: Vec<D>,
}

pub trait IntoMatrix<D> {
    fn into_matrix(self) -> Result<Matrix<D>, Error>;
}

// Fixed width rows know their column count even when there are no rows.
impl<D: DataType, const C: usize> IntoMatrix<D> for &[[D; C]] {
    fn into_matrix(self) -> Result<Matrix<D>, Error> {
        Ok(Matrix {
            rows: self.len(),
            cols: C,
            data: self.iter().flatten().copied().collect(),
        })
    }
}

impl<D: DataType, const R: usize, const C: usize> IntoMatrix<D> for &[[D; C]; R] {
    fn into_matrix(self) -> Result<Matrix<D>, Error> {
        IntoMatrix::<D>::into_matrix(self.as_slice())
    }
}

impl<D: DataType> IntoMatrix<D> for &[Vec<D>] {
    fn into_matrix(self) -> Result<Matrix<D>, Error> {
        let cols = self.first().ok_or(Error::NoRows)?.len();
        let mut data = Vec::with_capacity(self.len() * cols);
        for (row, inner) in self.iter().enumerate() {
            if inner.len() != cols {
                return Err(Error::Ragged {
                    row,
                    expected: cols,
                    actual: inner.len(),
                });
            }
            data.extend_from_slice(inner);
        }
        Ok(Matrix {
            rows: self.len(),
            cols,
            data,
        })
    }
}

impl<D: DataType> IntoMatrix<D> for &Vec<Vec<D>> {
    fn into_matrix(self) -> Result<Matrix<D>, Error> {
        IntoMatrix::<D>::into_matrix(self.as_slice())
    }
}

impl<D: DataType> Matrix<D> {
    /// Build a matrix from nested rows. Every row must have the same length.
    pub fn new(data: impl IntoMatrix<D>) -> Result<Self, Error> {
        data.into_matrix()
    }

    /// Wrap a row-major buffer of `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<D>) -> Result<Self, Error> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(Error::BufferLength {
                rows,
                cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![D::zeroed(); rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn datatype(&self) -> DataTypeEnum {
        D::DATATYPE
    }

    pub fn layout(&self) -> Layout<2> {
        Layout::contiguous(self.shape())
    }

    pub fn get(&self, index: [usize; 2]) -> Option<&D> {
        let index = self.layout().linear_index(index)?;
        self.data.get(index)
    }

    pub fn get_mut(&mut self, index: [usize; 2]) -> Option<&mut D> {
        let index = self.layout().linear_index(index)?;
        self.data.get_mut(index)
    }

    pub fn row(&self, row: usize) -> Option<&[D]> {
        if row >= self.rows {
            return None;
        }
        let start = row * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    pub fn as_slice(&self) -> &[D] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [D] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<D> {
        self.data
    }

    pub fn view(&self) -> MatrixView<'_, D> {
        MatrixView {
            data: &self.data,
            layout: self.layout(),
        }
    }
}

impl<D: DataType> Index<[usize; 2]> for Matrix<D> {
    type Output = D;

    fn index(&self, index: [usize; 2]) -> &Self::Output {
        let [row, col] = index;
        let [rows, cols] = self.shape();
        self.get(index).unwrap_or_else(|| {
            panic!("index [{row}, {col}] is out of bounds for a {rows}x{cols} matrix")
        })
    }
}

impl<D: DataType> IndexMut<[usize; 2]> for Matrix<D> {
    fn index_mut(&mut self, index: [usize; 2]) -> &mut Self::Output {
        let [row, col] = index;
        let [rows, cols] = self.shape();
        self.get_mut(index).unwrap_or_else(|| {
            panic!("index [{row}, {col}] is out of bounds for a {rows}x{cols} matrix")
        })
    }
}

impl<D: DataType> Debug for Matrix<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.view().rows()).finish()
    }
}

/// A borrowed, possibly strided window into a matrix.
#[derive(Clone, Copy)]
pub struct MatrixView<'a, D> {
    data: &'a [D],
    layout: Layout<2>,
}

impl<'a, D: DataType> MatrixView<'a, D> {
    /// A view of `data` addressed through `layout`. Returns `None` if the
    /// layout reaches past the end of `data` or its rows are not contiguous.
    pub(crate) fn from_parts(data: &'a [D], layout: Layout<2>) -> Option<Self> {
        let [rows, cols] = *layout.shape();
        let [row_stride, col_stride] = *layout.strides();
        if rows > 0 && cols > 0 {
            if col_stride != 1 {
                return None;
            }
            let last = layout.offset() + (rows - 1) * row_stride + cols;
            if last > data.len() {
                return None;
            }
        }
        Some(Self { data, layout })
    }

    /// Narrow the view. Returns `None` if a range is reversed or reaches past
    /// the current shape.
    pub fn slice(&self, ranges: [Range<usize>; 2]) -> Option<Self> {
        let in_bounds = ranges
            .iter()
            .zip(self.layout.shape())
            .all(|(range, size)| range.start <= range.end && range.end <= *size);
        if !in_bounds {
            return None;
        }
        Some(Self {
            data: self.data,
            layout: self.layout.slice(ranges),
        })
    }

    pub fn shape(&self) -> [usize; 2] {
        *self.layout.shape()
    }

    pub fn layout(&self) -> &Layout<2> {
        &self.layout
    }

    pub fn get(&self, index: [usize; 2]) -> Option<&'a D> {
        self.data.get(self.layout.linear_index(index)?)
    }

    /// One contiguous slice per row of the view.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &'a [D]> + '_ {
        let [rows, cols] = self.shape();
        let [row_stride, _] = *self.layout.strides();
        let offset = self.layout.offset();
        let data = self.data;
        (0..rows).map(move |row| {
            let start = offset + row * row_stride;
            &data[start..start + cols]
        })
    }

    /// Copy the view into a new matrix that owns its elements.
    pub fn to_matrix(&self) -> Matrix<D> {
        let [rows, cols] = self.shape();
        let mut data = Vec::with_capacity(rows * cols);
        for row in self.rows() {
            data.extend_from_slice(row);
        }
        Matrix { rows, cols, data }
    }
}

impl<D: DataType> Debug for MatrixView<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rows()).finish()
    }
}

#[cfg(test)]
#[test]
fn test_matrix_from_rows() {
    let matrix = Matrix::new(&[[1., 2.], [3., 4.], [5., 6.]]).unwrap();
    assert_eq!(matrix.shape(), [3, 2]);
    assert_eq!(matrix.datatype(), DataTypeEnum::F64);
    assert_eq!(matrix[[0, 0]], 1.);
    assert_eq!(matrix[[0, 1]], 2.);
    assert_eq!(matrix[[1, 0]], 3.);
    assert_eq!(matrix[[1, 1]], 4.);
    assert_eq!(matrix[[2, 0]], 5.);
    assert_eq!(matrix[[2, 1]], 6.);
    assert_eq!(matrix.get([3, 0]), None);
    assert_eq!(matrix.get([0, 2]), None);
    assert_eq!(matrix.row(1), Some(&[3., 4.][..]));
    assert_eq!(matrix.row(3), None);
}

#[cfg(test)]
#[test]
fn test_matrix_rejects_ragged_rows() {
    let rows = vec![vec![1u8, 2, 3], vec![4, 5, 6], vec![7, 8]];
    let error = Matrix::new(&rows).unwrap_err();
    assert_eq!(
        error,
        Error::Ragged {
            row: 2,
            expected: 3,
            actual: 2
        }
    );
}

#[cfg(test)]
#[test]
fn test_zero_row_matrix_keeps_columns() {
    let matrix = Matrix::new(&[] as &[[f32; 5]]).unwrap();
    assert_eq!(matrix.shape(), [0, 5]);
    let pois = crate::extract(&matrix, 0, 2).unwrap();
    assert_eq!(pois.shape(), [0, 3]);

    let rows: Vec<Vec<f32>> = Vec::new();
    assert_eq!(Matrix::new(&rows).unwrap_err(), Error::NoRows);
}

#[cfg(test)]
#[test]
fn test_matrix_from_vec_checks_length() {
    assert!(Matrix::from_vec(2, 3, vec![0i16; 6]).is_ok());
    assert_eq!(
        Matrix::from_vec(2, 3, vec![0i16; 5]).unwrap_err(),
        Error::BufferLength {
            rows: 2,
            cols: 3,
            actual: 5
        }
    );
    let empty = Matrix::<f32>::from_vec(0, 7, Vec::new()).unwrap();
    assert_eq!(empty.shape(), [0, 7]);
}

#[cfg(test)]
#[test]
fn test_matrix_view_slice() {
    let matrix = Matrix::new(&[[1, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12]]).unwrap();
    let view = matrix.view().slice([1..3, 1..3]).unwrap();
    assert_eq!(view.shape(), [2, 2]);
    assert_eq!(view.get([0, 0]), Some(&6));
    assert_eq!(view.get([1, 1]), Some(&11));
    assert_eq!(view.get([2, 0]), None);
    assert_eq!(
        view.rows().collect::<Vec<_>>(),
        vec![&[6, 7][..], &[10, 11][..]]
    );
    assert_eq!(
        view.to_matrix(),
        Matrix::new(&[[6, 7], [10, 11]]).unwrap()
    );

    assert!(matrix.view().slice([0..4, 0..1]).is_none());
    assert!(matrix.view().slice([0..1, 3..5]).is_none());
}

#[cfg(test)]
#[test]
fn test_matrix_debug() {
    let matrix = Matrix::new(&[[1u32, 2], [3, 4]]).unwrap();
    assert_eq!(format!("{matrix:?}"), "[[1, 2], [3, 4]]");
}
