pub use dataset::{extract_file, inspect, Backend, DatasetError, DatasetPaths, DatasetReport};
pub use device::Device;
pub use error::{Error, RangeViolation};
pub use extract::{extract, WindowExtractor};
pub use gpu::{GpuError, GpuMatrix, GpuWindowExtractor};
pub use layout::Layout;
pub use matrix::{DataType, DataTypeEnum, IntoMatrix, Matrix, MatrixView};
pub use window::Window;

pub mod dataset;
mod device;
mod error;
mod extract;
mod gpu;
mod kernel;
mod layout;
mod matrix;
pub mod npy;
mod window;
