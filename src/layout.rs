use std::ops::Range;

fn continuous_strides<const R: usize>(shape: [usize; R]) -> [usize; R] {
    let mut acc = 1;
    let mut strides = [0; R];
    for i in (0..R).rev() {
        strides[i] = acc;
        acc *= shape[i];
    }
    strides
}

/// The uniform block a kernel reads to address one tensor binding.
#[derive(Clone)]
pub(crate) struct TensorLayout<const R: usize> {
    pub(crate) data: Box<[u32]>,
}

impl<const R: usize> TensorLayout<R> {
    pub(crate) fn wgsl_type_definition(kernel: &mut String) {
        kernel.push_str("struct TensorLayout {\n");
        for i in 0..R {
            kernel.push_str(&format!("\tstride_{}: u32,\n", i));
        }
        for i in 0..R {
            kernel.push_str(&format!("\tshape_{}: u32,\n", i));
        }
        kernel.push_str("\toffset: u32,\n");
        kernel.push_str("}\n");
    }

    /// The block padded to a whole number of 16 byte rows, which is what
    /// uniform bindings expect.
    pub(crate) fn padded_bytes(&self) -> Vec<u8> {
        let mut words = self.data.to_vec();
        while words.len() % 4 != 0 {
            words.push(0);
        }
        bytemuck::cast_slice(&words).to_vec()
    }
}

impl<const R: usize> From<Layout<R>> for TensorLayout<R> {
    fn from(layout: Layout<R>) -> Self {
        let data = layout
            .strides
            .iter()
            .map(|x| *x as u32)
            .chain(layout.shape.iter().map(|x| *x as u32))
            .chain(std::iter::once(layout.offset as u32))
            .collect();
        Self { data }
    }
}

/// Where the elements of a strided view live inside a flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout<const R: usize> {
    offset: usize,
    shape: [usize; R],
    strides: [usize; R],
}

impl<const R: usize> Layout<R> {
    pub fn contiguous(shape: [usize; R]) -> Self {
        let strides = continuous_strides(shape);
        Self {
            offset: 0,
            shape,
            strides,
        }
    }

    pub(crate) fn from_parts(offset: usize, shape: [usize; R], strides: [usize; R]) -> Self {
        Self {
            offset,
            shape,
            strides,
        }
    }

    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.strides == continuous_strides(self.shape)
    }

    /// Narrow every axis to the given range. The ranges must already be
    /// inside the current shape.
    pub fn slice(&self, index: [Range<usize>; R]) -> Self {
        debug_assert!(index
            .iter()
            .zip(self.shape.iter())
            .all(|(range, size)| range.start <= range.end && range.end <= *size));

        let shape = std::array::from_fn(|i| index[i].len());

        let start_offset = index
            .iter()
            .zip(self.strides.iter())
            .map(|(range, stride)| *stride * range.start)
            .sum::<usize>();

        Self {
            offset: self.offset + start_offset,
            shape,
            strides: self.strides,
        }
    }

    /// Position of `index` in the backing buffer, or `None` when it falls
    /// outside the shape.
    pub fn linear_index(&self, index: [usize; R]) -> Option<usize> {
        let mut index_sum = self.offset;
        for ((index_component, &stride), &size) in
            index.into_iter().zip(self.strides.iter()).zip(self.shape.iter())
        {
            if index_component >= size {
                return None;
            }
            index_sum += stride * index_component;
        }
        Some(index_sum)
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn shape(&self) -> &[usize; R] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize; R] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
#[test]
fn test_contiguous_layout() {
    let layout = Layout::contiguous([3, 5]);
    assert_eq!(layout.strides(), &[5, 1]);
    assert_eq!(layout.offset(), 0);
    assert!(layout.is_contiguous());
    assert_eq!(layout.linear_index([2, 4]), Some(14));
    assert_eq!(layout.linear_index([3, 0]), None);
    assert_eq!(layout.linear_index([0, 5]), None);
}

#[cfg(test)]
#[test]
fn test_sliced_layout() {
    let layout = Layout::contiguous([3, 5]).slice([0..3, 1..4]);
    assert_eq!(layout.shape(), &[3, 3]);
    assert_eq!(layout.strides(), &[5, 1]);
    assert_eq!(layout.offset(), 1);
    assert!(!layout.is_contiguous());
    assert_eq!(layout.linear_index([1, 0]), Some(6));
    assert_eq!(layout.linear_index([2, 2]), Some(13));
    assert_eq!(layout.linear_index([0, 3]), None);

    let nested = layout.slice([1..3, 2..3]);
    assert_eq!(nested.offset(), 8);
    assert_eq!(nested.shape(), &[2, 1]);
    assert_eq!(nested.element_count(), 2);
}

#[cfg(test)]
#[test]
fn test_tensor_layout_block() {
    let layout: TensorLayout<2> = Layout::contiguous([3, 5]).slice([0..3, 1..4]).into();
    assert_eq!(&*layout.data, &[5, 1, 3, 3, 1]);
    assert_eq!(layout.padded_bytes().len(), 32);
}
