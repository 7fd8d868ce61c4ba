use std::{marker::PhantomData, ops::Range, sync::Arc};

use log::debug;
use wgpu::{util::DownloadBuffer, BufferDescriptor, COPY_BUFFER_ALIGNMENT};

use crate::{
    kernel::GenericKernel, layout::Layout, matrix::MatrixView, DataType, DataTypeEnum, Device,
    Error, Matrix, Window,
};

const WORKGROUP_SIZE: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter was found")]
    NoAdapter,
    #[error("failed to open the GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("failed to read back a GPU buffer: {0}")]
    BufferAsync(#[from] wgpu::BufferAsyncError),
    #[error("{datatype} elements are {} bytes wide, but the GPU path copies whole 32 bit words", .datatype.size())]
    UnsupportedElement { datatype: DataTypeEnum },
    #[error("a single row of {bytes} bytes does not fit the device buffer limit of {limit} bytes")]
    RowTooLarge { bytes: u64, limit: u64 },
    #[error("a window of {words} words is wider than one dispatch can cover ({limit} words)")]
    WindowTooWide { words: u64, limit: u64 },
    #[error(transparent)]
    Extract(#[from] Error),
}

fn words_per_element<D: DataType>() -> Result<usize, GpuError> {
    let size = D::DATATYPE.size();
    if size % 4 != 0 {
        return Err(GpuError::UnsupportedElement {
            datatype: D::DATATYPE,
        });
    }
    Ok(size / 4)
}

pub(crate) fn padded_tensor_size(size: u64) -> u64 {
    // Valid vulkan usage is
    // 1. buffer size must be a multiple of COPY_BUFFER_ALIGNMENT.
    // 2. buffer size must be greater than 0.
    // Therefore we round the value up to the nearest multiple, and ensure it's at least COPY_BUFFER_ALIGNMENT.
    let align_mask = COPY_BUFFER_ALIGNMENT - 1;
    ((size + align_mask) & !align_mask).max(COPY_BUFFER_ALIGNMENT)
}

/// A matrix stored in a GPU storage buffer.
///
/// Slicing only changes the layout; the buffer is shared between a matrix and
/// its slices.
pub struct GpuMatrix<D> {
    device: Device,
    buffer: Arc<wgpu::Buffer>,
    len: usize,
    layout: Layout<2>,
    datatype: PhantomData<D>,
}

impl<D> Clone for GpuMatrix<D> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            buffer: self.buffer.clone(),
            len: self.len,
            layout: self.layout,
            datatype: PhantomData,
        }
    }
}

impl<D: DataType> GpuMatrix<D> {
    pub fn new(device: &Device, matrix: &Matrix<D>) -> Result<Self, GpuError> {
        words_per_element::<D>()?;
        Ok(Self::upload(device, matrix.as_slice(), matrix.shape()))
    }

    fn upload(device: &Device, data: &[D], shape: [usize; 2]) -> Self {
        let unpadded_size = std::mem::size_of_val(data);
        let buffer = device.wgpu_device().create_buffer(&BufferDescriptor {
            label: None,
            size: padded_tensor_size(unpadded_size as u64),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: true,
        });
        buffer.slice(..).get_mapped_range_mut()[..unpadded_size]
            .copy_from_slice(bytemuck::cast_slice(data));
        buffer.unmap();

        Self::new_from_buffer(device, buffer, data.len(), shape)
    }

    fn empty(device: &Device, shape: [usize; 2]) -> Self {
        let len = shape.iter().product::<usize>();
        let buffer = device.wgpu_device().create_buffer(&BufferDescriptor {
            label: None,
            size: padded_tensor_size((len * D::DATATYPE.size()) as u64),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self::new_from_buffer(device, buffer, len, shape)
    }

    fn new_from_buffer(
        device: &Device,
        buffer: wgpu::Buffer,
        len: usize,
        shape: [usize; 2],
    ) -> Self {
        Self {
            device: device.clone(),
            buffer: Arc::new(buffer),
            len,
            layout: Layout::contiguous(shape),
            datatype: PhantomData,
        }
    }

    pub fn shape(&self) -> [usize; 2] {
        *self.layout.shape()
    }

    pub fn layout(&self) -> &Layout<2> {
        &self.layout
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Narrow the matrix without copying. Returns `None` if a range is
    /// reversed or reaches past the current shape.
    pub fn slice(&self, ranges: [Range<usize>; 2]) -> Option<Self> {
        let in_bounds = ranges
            .iter()
            .zip(self.layout.shape())
            .all(|(range, size)| range.start <= range.end && range.end <= *size);
        if !in_bounds {
            return None;
        }
        Some(Self {
            layout: self.layout.slice(ranges),
            ..self.clone()
        })
    }

    /// The layout in units of `u32` words, which is what the kernels index.
    fn word_layout(&self) -> Layout<2> {
        let words = D::DATATYPE.size() / 4;
        let [rows, cols] = self.shape();
        let [row_stride, col_stride] = *self.layout.strides();
        Layout::from_parts(
            self.layout.offset() * words,
            [rows, cols * words],
            [row_stride * words, col_stride],
        )
    }

    async fn download(&self) -> Result<Vec<D>, GpuError> {
        let (sender, receiver) = futures_channel::oneshot::channel();
        DownloadBuffer::read_buffer(
            self.device.wgpu_device(),
            self.device.wgpu_queue(),
            &self.buffer.slice(..),
            move |result| {
                _ = sender.send(result);
            },
        );
        self.device.poll_wait();
        let downloaded = receiver.await.map_err(|_| wgpu::BufferAsyncError)??;
        let bytes = self.len * D::DATATYPE.size();
        Ok(bytemuck::pod_collect_to_vec(&downloaded[..bytes]))
    }

    /// Copy the matrix back to host memory.
    pub async fn to_matrix(&self) -> Result<Matrix<D>, GpuError> {
        let data = self.download().await?;
        if self.layout.is_contiguous() && self.layout.element_count() == data.len() {
            let [rows, cols] = self.shape();
            return Ok(Matrix::from_vec(rows, cols, data)?);
        }
        let view = MatrixView::from_parts(&data, self.layout).ok_or(Error::BufferLength {
            rows: self.shape()[0],
            cols: self.shape()[1],
            actual: data.len(),
        })?;
        Ok(view.to_matrix())
    }
}

/// Window extraction on the GPU.
///
/// The matrix is uploaded in chunks of whole rows that fit the device's
/// storage binding limit; each chunk is copied by one dispatch of a generated
/// kernel and read back before the next one is uploaded.
pub struct GpuWindowExtractor {
    device: Device,
    kernel: GenericKernel,
    max_chunk_rows: Option<usize>,
}

impl GpuWindowExtractor {
    pub fn new(device: &Device) -> Self {
        let mut kernel = GenericKernel::new([WORKGROUP_SIZE, WORKGROUP_SIZE, 1]);
        let input = kernel.add_matrix(false);
        let output = kernel.add_matrix(true);
        let in_index = input.index("row", "col");
        let out_index = output.index("row", "col");
        let rows = output.shape(0);
        let cols = output.shape(1);
        kernel.set_body(format!(
            "\tlet row = global_id.y;\n\
             \tlet col = global_id.x;\n\
             \tif row < {rows} && col < {cols} {{\n\
             \t\t{output}[{out_index}] = {input}[{in_index}];\n\
             \t}}"
        ));

        Self {
            device: device.clone(),
            kernel,
            max_chunk_rows: None,
        }
    }

    /// Upload at most `rows` rows at a time, on top of the device limits.
    pub fn max_chunk_rows(mut self, rows: usize) -> Self {
        self.max_chunk_rows = Some(rows.max(1));
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Extract `window` from every row of `matrix`. The result is identical to
    /// the one the CPU path produces.
    pub async fn extract<D: DataType>(
        &self,
        matrix: &Matrix<D>,
        window: Window,
    ) -> Result<Matrix<D>, GpuError> {
        let [rows, cols] = matrix.shape();
        window.validate(cols)?;
        words_per_element::<D>()?;
        if rows == 0 {
            return Ok(Matrix::zeros(0, window.len()));
        }

        let chunk_rows = self.rows_per_chunk::<D>(cols, window.len())?;
        debug!(
            "extracting columns {window} from a {rows}x{cols} {} matrix on {} in chunks of {chunk_rows} rows",
            D::DATATYPE,
            self.device.adapter_info().name
        );

        let mut data = Vec::with_capacity(rows * window.len());
        for start in (0..rows).step_by(chunk_rows) {
            let end = (start + chunk_rows).min(rows);
            let chunk = GpuMatrix::upload(
                &self.device,
                &matrix.as_slice()[start * cols..end * cols],
                [end - start, cols],
            );
            let input = chunk
                .slice([0..end - start, window.columns()])
                .ok_or_else(|| {
                    Error::invalid_range(
                        window.begin() as i64,
                        window.end() as i64,
                        cols,
                        crate::RangeViolation::PastEnd,
                    )
                })?;
            let output = self.copy(&input);
            data.extend(output.download().await?);
        }

        Ok(Matrix::from_vec(rows, window.len(), data)?)
    }

    /// Materialize a possibly strided matrix into a new contiguous buffer.
    fn copy<D: DataType>(&self, input: &GpuMatrix<D>) -> GpuMatrix<D> {
        let output = GpuMatrix::empty(&self.device, input.shape());
        let in_layout = input.word_layout();
        let out_layout = output.word_layout();
        let [rows, word_cols] = *out_layout.shape();
        let [workgroup_x, workgroup_y, _] = self.kernel.workgroup_size();

        let mut encoder = self
            .device
            .wgpu_device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        self.kernel.run(
            &self.device,
            [
                (input.buffer.as_ref(), in_layout),
                (output.buffer.as_ref(), out_layout),
            ],
            &mut encoder,
            [
                (word_cols as u32).div_ceil(workgroup_x),
                (rows as u32).div_ceil(workgroup_y),
                1,
            ],
        );
        self.device.wgpu_queue().submit(Some(encoder.finish()));
        output
    }

    fn rows_per_chunk<D: DataType>(
        &self,
        cols: usize,
        window_len: usize,
    ) -> Result<usize, GpuError> {
        let limits = self.device.limits();
        let limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        let max_workgroups = u64::from(limits.max_compute_workgroups_per_dimension);

        let words = (window_len * D::DATATYPE.size() / 4) as u64;
        let word_limit = max_workgroups * u64::from(WORKGROUP_SIZE);
        if words > word_limit {
            return Err(GpuError::WindowTooWide {
                words,
                limit: word_limit,
            });
        }

        let row_bytes = (cols * D::DATATYPE.size()) as u64;
        if row_bytes > limit {
            return Err(GpuError::RowTooLarge {
                bytes: row_bytes,
                limit,
            });
        }

        let by_memory = limit / row_bytes.max(1);
        let by_dispatch = max_workgroups * u64::from(WORKGROUP_SIZE);
        let mut rows = by_memory.min(by_dispatch).max(1) as usize;
        if let Some(max_chunk_rows) = self.max_chunk_rows {
            rows = rows.min(max_chunk_rows);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Set to make a missing GPU fail the GPU tests instead of skipping them.
    const REQUIRE_GPU: &str = "POI_WINDOW_REQUIRE_GPU";

    async fn test_device() -> Option<Device> {
        match Device::new().await {
            Ok(device) => Some(device),
            Err(err) if std::env::var_os(REQUIRE_GPU).is_some() => {
                panic!("{REQUIRE_GPU} is set but no GPU is usable: {err}")
            }
            Err(err) => {
                eprintln!("SKIPPED GPU test ({err}); set {REQUIRE_GPU}=1 to fail instead");
                None
            }
        }
    }

    fn random_matrix(rows: usize, cols: usize) -> Matrix<f32> {
        let mut rng = rand::rng();
        let data = (0..rows * cols).map(|_| rng.random::<f32>()).collect();
        Matrix::from_vec(rows, cols, data).unwrap()
    }

    #[test]
    fn test_padded_tensor_size() {
        assert_eq!(padded_tensor_size(0), COPY_BUFFER_ALIGNMENT);
        assert_eq!(padded_tensor_size(1), COPY_BUFFER_ALIGNMENT);
        assert_eq!(padded_tensor_size(12), 12);
        assert_eq!(padded_tensor_size(13), 16);
    }

    #[tokio::test]
    async fn test_gpu_matrix_round_trip() {
        let Some(device) = test_device().await else {
            return;
        };
        let matrix = Matrix::new(&[[1., 2.], [3., 4.], [5., 6f32]]).unwrap();
        let gpu = GpuMatrix::new(&device, &matrix).unwrap();
        assert_eq!(gpu.to_matrix().await.unwrap(), matrix);

        let slice = gpu.slice([1..3, 1..2]).unwrap();
        assert_eq!(
            slice.to_matrix().await.unwrap(),
            Matrix::new(&[[4f32], [6.]]).unwrap()
        );
        assert!(gpu.slice([0..4, 0..1]).is_none());
    }

    #[tokio::test]
    async fn test_gpu_extract_matches_cpu() {
        let Some(device) = test_device().await else {
            return;
        };
        let extractor = GpuWindowExtractor::new(&device);
        let matrix = random_matrix(100, 300);
        let window = Window::new(17, 250).unwrap();
        let gpu = extractor.extract(&matrix, window).await.unwrap();
        let cpu = crate::WindowExtractor::new(window).run(&matrix).unwrap();
        assert_eq!(gpu, cpu);
    }

    #[tokio::test]
    async fn test_gpu_extract_in_chunks() {
        let Some(device) = test_device().await else {
            return;
        };
        let extractor = GpuWindowExtractor::new(&device).max_chunk_rows(3);
        let matrix =
            Matrix::new(&[[1, 2, 3, 4, 5], [6, 7, 8, 9, 10], [11, 12, 13, 14, 15]]).unwrap();
        let pois = extractor
            .extract(&matrix, Window::new(1, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(
            pois,
            Matrix::new(&[[2, 3, 4], [7, 8, 9], [12, 13, 14]]).unwrap()
        );

        let matrix = random_matrix(10, 9);
        let window = Window::new(0, 4).unwrap();
        let chunked = extractor.extract(&matrix, window).await.unwrap();
        assert_eq!(chunked, crate::extract(&matrix, 0, 4).unwrap());
    }

    #[tokio::test]
    async fn test_gpu_extract_wide_elements() {
        let Some(device) = test_device().await else {
            return;
        };
        let extractor = GpuWindowExtractor::new(&device);
        let matrix = Matrix::new(&[[1u64 << 40, 2, 3], [4, u64::MAX, 6]]).unwrap();
        let pois = extractor
            .extract(&matrix, Window::new(0, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(pois, Matrix::new(&[[1u64 << 40, 2], [4, u64::MAX]]).unwrap());
    }

    #[tokio::test]
    async fn test_gpu_extract_rejections() {
        let Some(device) = test_device().await else {
            return;
        };
        let extractor = GpuWindowExtractor::new(&device);
        let bytes = Matrix::new(&[[1u8, 2, 3]]).unwrap();
        assert!(matches!(
            extractor.extract(&bytes, Window::new(0, 1).unwrap()).await,
            Err(GpuError::UnsupportedElement {
                datatype: DataTypeEnum::U8
            })
        ));

        let floats = random_matrix(4, 3);
        assert!(matches!(
            extractor.extract(&floats, Window::new(1, 3).unwrap()).await,
            Err(GpuError::Extract(Error::InvalidRange { .. }))
        ));

        let empty = Matrix::<f32>::from_vec(0, 3, Vec::new()).unwrap();
        let pois = extractor
            .extract(&empty, Window::new(1, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(pois.shape(), [0, 2]);
    }
}
