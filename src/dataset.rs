use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
    npy::{describe, AnyMatrix, ArrayInfo, ArrayIoError},
    Device, Error, GpuError, GpuWindowExtractor, Window, WindowExtractor,
};

/// File name prefix of the EasyAES acquisition campaign.
pub const DEFAULT_PREFIX: &str = "EasyAES";

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error(transparent)]
    Io(#[from] ArrayIoError),
    #[error("{array} has {rows} rows but the traces have {expected}")]
    ShapeMismatch {
        array: &'static str,
        rows: usize,
        expected: usize,
    },
    #[error(transparent)]
    Extract(#[from] Error),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// The three arrays of an acquisition campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub traces: PathBuf,
    pub plaintexts: PathBuf,
    pub pois: PathBuf,
}

impl DatasetPaths {
    /// `{prefix}.npy`, `{prefix}_plain.npy` and `{prefix}_pois.npy` inside
    /// `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>, prefix: &str) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            traces: data_dir.join(format!("{prefix}.npy")),
            plaintexts: data_dir.join(format!("{prefix}_plain.npy")),
            pois: data_dir.join(format!("{prefix}_pois.npy")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetReport {
    pub traces: ArrayInfo,
    pub plaintexts: ArrayInfo,
    pub pois: ArrayInfo,
}

impl Display for DatasetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Traces shape: {}", self.traces)?;
        writeln!(f, "Plaintexts shape: {}", self.plaintexts)?;
        write!(f, "POIs shape: {}", self.pois)
    }
}

/// Load the arrays of a dataset and report their shapes.
///
/// With `cross_check` set, the plaintexts and POIs must have as many rows as
/// there are traces.
pub fn inspect(paths: &DatasetPaths, cross_check: bool) -> Result<DatasetReport, DatasetError> {
    let report = DatasetReport {
        traces: describe(&paths.traces)?,
        plaintexts: describe(&paths.plaintexts)?,
        pois: describe(&paths.pois)?,
    };
    info!(
        "traces {} {}, plaintexts {} {}, pois {} {}",
        report.traces,
        report.traces.datatype,
        report.plaintexts,
        report.plaintexts.datatype,
        report.pois,
        report.pois.datatype
    );

    if cross_check {
        let expected = report.traces.rows().unwrap_or(0);
        for (array, info) in [("plaintexts", &report.plaintexts), ("POIs", &report.pois)] {
            let rows = info.rows().unwrap_or(0);
            if rows != expected {
                warn!("{array} are not aligned with the traces");
                return Err(DatasetError::ShapeMismatch {
                    array,
                    rows,
                    expected,
                });
            }
        }
    }

    Ok(report)
}

/// Where the window copy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Sequential,
    Parallel,
    Gpu,
}

/// Load `input`, extract `window` from every trace and save the result to
/// `output`. Returns the shape of what was written.
pub fn extract_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    window: Window,
    backend: Backend,
) -> Result<ArrayInfo, DatasetError> {
    let input = input.as_ref();
    let traces = AnyMatrix::read(input)?;
    info!(
        "loaded {} traces {} from {}",
        traces.datatype(),
        traces.info(),
        input.display()
    );

    let pois = match backend {
        Backend::Sequential | Backend::Parallel => {
            let extractor = WindowExtractor::new(window).parallel(backend == Backend::Parallel);
            traces.extract(&extractor)?
        }
        Backend::Gpu => futures::executor::block_on(extract_on_gpu(&traces, window))?,
    };

    pois.write(output.as_ref())?;
    Ok(pois.info())
}

async fn extract_on_gpu(traces: &AnyMatrix, window: Window) -> Result<AnyMatrix, GpuError> {
    let device = Device::new().await?;
    let extractor = GpuWindowExtractor::new(&device);
    traces.extract_gpu(&extractor, window).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{npy::write_matrix, Matrix};
    use ndarray::Array1;
    use tempfile::tempdir;

    fn write_dataset(dir: &Path, plaintext_rows: usize) -> DatasetPaths {
        let paths = DatasetPaths::new(dir, DEFAULT_PREFIX);
        let traces = Matrix::from_vec(4, 10, (0..40).map(|x| x as f32).collect()).unwrap();
        write_matrix(&paths.traces, &traces).unwrap();
        let plaintexts =
            Matrix::from_vec(plaintext_rows, 16, vec![0u8; plaintext_rows * 16]).unwrap();
        write_matrix(&paths.plaintexts, &plaintexts).unwrap();
        let pois = crate::extract(&traces, 2, 5).unwrap();
        write_matrix(&paths.pois, &pois).unwrap();
        paths
    }

    #[test]
    fn test_dataset_paths() {
        let paths = DatasetPaths::new("/data", "EasyAES");
        assert_eq!(paths.traces, PathBuf::from("/data/EasyAES.npy"));
        assert_eq!(paths.plaintexts, PathBuf::from("/data/EasyAES_plain.npy"));
        assert_eq!(paths.pois, PathBuf::from("/data/EasyAES_pois.npy"));
    }

    #[test]
    fn test_inspect_reports_shapes() {
        let dir = tempdir().unwrap();
        let paths = write_dataset(dir.path(), 4);
        let report = inspect(&paths, true).unwrap();
        assert_eq!(
            report.to_string(),
            "Traces shape: (4, 10)\nPlaintexts shape: (4, 16)\nPOIs shape: (4, 4)"
        );
        assert_eq!(report.plaintexts.datatype, crate::DataTypeEnum::U8);
    }

    #[test]
    fn test_cross_check_is_opt_in() {
        let dir = tempdir().unwrap();
        let paths = write_dataset(dir.path(), 3);
        assert!(inspect(&paths, false).is_ok());
        match inspect(&paths, true) {
            Err(DatasetError::ShapeMismatch {
                array,
                rows,
                expected,
            }) => {
                assert_eq!(array, "plaintexts");
                assert_eq!(rows, 3);
                assert_eq!(expected, 4);
            }
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_inspect_one_dimensional_companion() {
        let dir = tempdir().unwrap();
        let paths = write_dataset(dir.path(), 4);
        ndarray_npy::write_npy(&paths.plaintexts, &Array1::from(vec![1u8, 2, 3, 4])).unwrap();
        let report = inspect(&paths, true).unwrap();
        assert_eq!(report.plaintexts.to_string(), "(4,)");
    }

    #[test]
    fn test_extract_file() {
        let dir = tempdir().unwrap();
        let paths = write_dataset(dir.path(), 4);
        let output = dir.path().join("window.npy");
        for backend in [Backend::Sequential, Backend::Parallel] {
            let info = extract_file(&paths.traces, &output, Window::new(2, 5).unwrap(), backend)
                .unwrap();
            assert_eq!(info.shape, vec![4, 4]);
            assert_eq!(
                AnyMatrix::read(&output).unwrap(),
                AnyMatrix::read(&paths.pois).unwrap()
            );
        }
    }

    #[test]
    fn test_extract_file_rejects_window() {
        let dir = tempdir().unwrap();
        let paths = write_dataset(dir.path(), 4);
        let output = dir.path().join("window.npy");
        let result = extract_file(
            &paths.traces,
            &output,
            Window::new(8, 10).unwrap(),
            Backend::Sequential,
        );
        assert!(matches!(
            result,
            Err(DatasetError::Extract(Error::InvalidRange { .. }))
        ));
        assert!(!output.exists());
    }
}
