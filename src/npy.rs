//! Reading and writing numpy `.npy` files.
//!
//! Trace files are usually large 2-D arrays whose element type is only known
//! once the header has been read, so besides the typed [`read_matrix`] and
//! [`write_matrix`] this module offers [`AnyMatrix`], which picks the element
//! type from the file, and [`describe`], which reports the shape of an array
//! of any rank.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::debug;
use ndarray::{Array2, ArrayD, ArrayView2};
use ndarray_npy::{
    read_npy, write_npy, ReadNpyError, ReadableElement, WritableElement, WriteNpyError,
};

use crate::{
    DataType, DataTypeEnum, Error, GpuError, GpuWindowExtractor, Matrix, Window, WindowExtractor,
};

#[derive(Debug, thiserror::Error)]
pub enum ArrayIoError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ReadNpyError,
    },
    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: WriteNpyError,
    },
    #[error("{} holds a {actual}-D array, expected a matrix", .path.display())]
    WrongRank { path: PathBuf, actual: usize },
    #[error("{} holds an element type that is not a fixed width integer or float", .path.display())]
    UnsupportedDtype { path: PathBuf },
    #[error("matrix does not match its own shape")]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Matrix(#[from] Error),
}

impl ArrayIoError {
    fn is_wrong_descriptor(&self) -> bool {
        matches!(
            self,
            ArrayIoError::Read {
                source: ReadNpyError::WrongDescriptor(_),
                ..
            }
        )
    }
}

/// Read a 2-D `.npy` file whose elements are `D`.
pub fn read_matrix<D>(path: impl AsRef<Path>) -> Result<Matrix<D>, ArrayIoError>
where
    D: DataType + ReadableElement,
{
    let path = path.as_ref();
    let array: Array2<D> = read_npy(path).map_err(|source| match source {
        ReadNpyError::WrongNdim(_, actual) => ArrayIoError::WrongRank {
            path: path.to_owned(),
            actual,
        },
        source => ArrayIoError::Read {
            path: path.to_owned(),
            source,
        },
    })?;
    let (rows, cols) = array.dim();
    let data = if array.is_standard_layout() {
        let (data, _) = array.into_raw_vec_and_offset();
        data
    } else {
        // Fortran ordered files come back column major.
        array.iter().copied().collect()
    };
    Ok(Matrix::from_vec(rows, cols, data)?)
}

/// Write `matrix` as a C ordered 2-D `.npy` file.
pub fn write_matrix<D>(path: impl AsRef<Path>, matrix: &Matrix<D>) -> Result<(), ArrayIoError>
where
    D: DataType + WritableElement,
{
    let path = path.as_ref();
    let [rows, cols] = matrix.shape();
    let view = ArrayView2::from_shape((rows, cols), matrix.as_slice())?;
    write_npy(path, &view).map_err(|source| ArrayIoError::Write {
        path: path.to_owned(),
        source,
    })?;
    debug!(
        "wrote a {rows}x{cols} {} matrix to {}",
        matrix.datatype(),
        path.display()
    );
    Ok(())
}

/// Shape and element type of an array on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayInfo {
    pub shape: Vec<usize>,
    pub datatype: DataTypeEnum,
}

impl ArrayInfo {
    /// Length of the first axis, which is the trace axis for every array in
    /// a dataset.
    pub fn rows(&self) -> Option<usize> {
        self.shape.first().copied()
    }
}

impl Display for ArrayInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, size) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{size}")?;
        }
        if self.shape.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

macro_rules! any_matrix {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        /// A matrix whose element type is chosen at run time.
        #[derive(Debug, Clone, PartialEq)]
        pub enum AnyMatrix {
            $($variant(Matrix<$ty>),)*
        }

        $(
            impl From<Matrix<$ty>> for AnyMatrix {
                fn from(matrix: Matrix<$ty>) -> Self {
                    AnyMatrix::$variant(matrix)
                }
            }
        )*

        impl AnyMatrix {
            /// Read a 2-D `.npy` file of any supported element type.
            pub fn read(path: impl AsRef<Path>) -> Result<Self, ArrayIoError> {
                let path = path.as_ref();
                $(
                    match read_matrix::<$ty>(path) {
                        Ok(matrix) => return Ok(AnyMatrix::$variant(matrix)),
                        Err(err) if err.is_wrong_descriptor() => {}
                        Err(err) => return Err(err),
                    }
                )*
                Err(ArrayIoError::UnsupportedDtype {
                    path: path.to_owned(),
                })
            }

            pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ArrayIoError> {
                match self {
                    $(AnyMatrix::$variant(matrix) => write_matrix(path, matrix),)*
                }
            }

            pub fn datatype(&self) -> DataTypeEnum {
                match self {
                    $(AnyMatrix::$variant(matrix) => matrix.datatype(),)*
                }
            }

            pub fn shape(&self) -> [usize; 2] {
                match self {
                    $(AnyMatrix::$variant(matrix) => matrix.shape(),)*
                }
            }

            pub fn info(&self) -> ArrayInfo {
                ArrayInfo {
                    shape: self.shape().to_vec(),
                    datatype: self.datatype(),
                }
            }

            pub fn extract(&self, extractor: &WindowExtractor<'_>) -> Result<Self, Error> {
                match self {
                    $(AnyMatrix::$variant(matrix) => extractor.run(matrix).map(AnyMatrix::$variant),)*
                }
            }

            pub async fn extract_gpu(
                &self,
                extractor: &GpuWindowExtractor,
                window: Window,
            ) -> Result<Self, GpuError> {
                match self {
                    $(AnyMatrix::$variant(matrix) => {
                        extractor.extract(matrix, window).await.map(AnyMatrix::$variant)
                    })*
                }
            }
        }

        /// Report the shape and element type of a `.npy` file of any rank.
        pub fn describe(path: impl AsRef<Path>) -> Result<ArrayInfo, ArrayIoError> {
            let path = path.as_ref();
            $(
                match read_npy::<_, ArrayD<$ty>>(path) {
                    Ok(array) => {
                        return Ok(ArrayInfo {
                            shape: array.shape().to_vec(),
                            datatype: <$ty as DataType>::DATATYPE,
                        })
                    }
                    Err(ReadNpyError::WrongDescriptor(_)) => {}
                    Err(source) => {
                        return Err(ArrayIoError::Read {
                            path: path.to_owned(),
                            source,
                        })
                    }
                }
            )*
            Err(ArrayIoError::UnsupportedDtype {
                path: path.to_owned(),
            })
        }
    };
}

any_matrix!(
    I8 => i8,
    U8 => u8,
    I16 => i16,
    U16 => u16,
    I32 => i32,
    U32 => u32,
    I64 => i64,
    U64 => u64,
    F32 => f32,
    F64 => f64,
);

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, ShapeBuilder};
    use tempfile::tempdir;

    #[test]
    fn test_matrix_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traces.npy");
        let matrix = Matrix::new(&[[1i16, -2, 3], [4, 5, -6]]).unwrap();
        write_matrix(&path, &matrix).unwrap();
        assert_eq!(read_matrix::<i16>(&path).unwrap(), matrix);
    }

    #[test]
    fn test_read_detects_element_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traces.npy");
        let matrix = Matrix::new(&[[0.5f32, 1.5], [2.5, 3.5]]).unwrap();
        write_matrix(&path, &matrix).unwrap();

        let any = AnyMatrix::read(&path).unwrap();
        assert_eq!(any.datatype(), DataTypeEnum::F32);
        assert_eq!(any.shape(), [2, 2]);
        assert_eq!(any, AnyMatrix::F32(matrix));
        assert!(read_matrix::<f64>(&path).unwrap_err().is_wrong_descriptor());
    }

    #[test]
    fn test_read_fortran_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fortran.npy");
        let array = Array2::from_shape_vec((2, 3).f(), vec![1u8, 4, 2, 5, 3, 6]).unwrap();
        write_npy(&path, &array).unwrap();
        assert_eq!(
            read_matrix::<u8>(&path).unwrap(),
            Matrix::new(&[[1u8, 2, 3], [4, 5, 6]]).unwrap()
        );
    }

    #[test]
    fn test_describe_any_rank() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.npy");
        write_npy(&path, &Array1::from(vec![7u32, 8, 9, 10])).unwrap();
        let info = describe(&path).unwrap();
        assert_eq!(info.shape, vec![4]);
        assert_eq!(info.datatype, DataTypeEnum::U32);
        assert_eq!(info.to_string(), "(4,)");
        assert_eq!(info.rows(), Some(4));

        assert!(matches!(
            AnyMatrix::read(&path),
            Err(ArrayIoError::WrongRank { actual: 1, .. })
        ));
        assert!(matches!(
            read_matrix::<u32>(&path),
            Err(ArrayIoError::WrongRank { actual: 1, .. })
        ));
    }

    #[test]
    fn test_unsupported_dtype() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.npy");
        write_npy(&path, &Array1::from(vec![true, false])).unwrap();
        assert!(matches!(
            describe(&path),
            Err(ArrayIoError::UnsupportedDtype { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = AnyMatrix::read(dir.path().join("missing.npy")).unwrap_err();
        assert!(matches!(err, ArrayIoError::Read { .. }));
        assert!(err.to_string().contains("missing.npy"));
    }

    #[test]
    fn test_extract_any_matrix() {
        let matrix: AnyMatrix = Matrix::new(&[[1u64, 2, 3], [4, 5, 6]]).unwrap().into();
        let window = Window::new(1, 2).unwrap();
        let pois = matrix.extract(&WindowExtractor::new(window)).unwrap();
        assert_eq!(pois, AnyMatrix::U64(Matrix::new(&[[2u64, 3], [5, 6]]).unwrap()));
        assert_eq!(pois.info().to_string(), "(2, 2)");
    }
}
