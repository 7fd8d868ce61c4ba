use std::fmt::Display;
use std::sync::OnceLock;

use log::trace;
use wgpu::{util::DeviceExt, BindGroupLayout, CommandEncoder, ComputePipeline};

use crate::{
    layout::{Layout, TensorLayout},
    Device,
};

/// A compute shader over 2-D `u32` word buffers.
///
/// Every matrix is bound as an `array<u32>` storage buffer followed by a
/// uniform `TensorLayout` block describing its offset, shape and strides.
/// The body sees the invocation id as `global_id`.
pub(crate) struct GenericKernel {
    workgroup_size: [u32; 3],
    matrices: Vec<MatrixBinding>,
    body: String,
    pipeline: OnceLock<(BindGroupLayout, ComputePipeline)>,
}

impl GenericKernel {
    pub(crate) fn new(workgroup_size: [u32; 3]) -> Self {
        Self {
            workgroup_size,
            matrices: Vec::new(),
            body: String::new(),
            pipeline: OnceLock::new(),
        }
    }

    pub(crate) fn set_body(&mut self, body: String) {
        self.body = body;
    }

    pub(crate) fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    pub(crate) fn add_matrix(&mut self, writable: bool) -> MatrixBinding {
        let binding = MatrixBinding {
            data: self.matrices.len() as u32 * 2,
            writable,
        };
        self.matrices.push(binding);
        binding
    }

    fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        let entry = |binding, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        self.matrices
            .iter()
            .flat_map(|matrix| {
                let read_only = !matrix.writable;
                [
                    entry(
                        matrix.data,
                        wgpu::BufferBindingType::Storage { read_only },
                    ),
                    entry(matrix.layout(), wgpu::BufferBindingType::Uniform),
                ]
            })
            .collect()
    }

    fn pipeline(&self, device: &Device) -> &(BindGroupLayout, ComputePipeline) {
        self.pipeline.get_or_init(|| {
            let wgpu_device = device.wgpu_device();
            let bind_group_layout =
                wgpu_device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: None,
                    entries: &self.layout_entries(),
                });
            let pipeline_layout =
                wgpu_device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: None,
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });
            let module = device.create_shader_module(self.source());
            let pipeline = wgpu_device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: None,
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                cache: None,
                compilation_options: Default::default(),
            });
            (bind_group_layout, pipeline)
        })
    }

    /// Record one dispatch. `matrices` are given in the order they were added.
    pub(crate) fn run<'a>(
        &self,
        device: &Device,
        matrices: impl IntoIterator<Item = (&'a wgpu::Buffer, Layout<2>)>,
        encoder: &mut CommandEncoder,
        workgroups: [u32; 3],
    ) {
        let (bind_group_layout, pipeline) = self.pipeline(device);

        let bound: Vec<_> = self
            .matrices
            .iter()
            .zip(matrices)
            .map(|(binding, (buffer, layout))| {
                let uniform = device
                    .wgpu_device()
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: None,
                        contents: &TensorLayout::from(layout).padded_bytes(),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                (binding, buffer, uniform)
            })
            .collect();
        let entries: Vec<_> = bound
            .iter()
            .flat_map(|(binding, buffer, uniform)| {
                [
                    wgpu::BindGroupEntry {
                        binding: binding.data,
                        resource: buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: binding.layout(),
                        resource: uniform.as_entire_binding(),
                    },
                ]
            })
            .collect();
        let bind_group = device
            .wgpu_device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: bind_group_layout,
                entries: &entries,
            });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let [x, y, z] = workgroups;
        pass.dispatch_workgroups(x, y, z);
    }

    pub(crate) fn source(&self) -> String {
        let mut source = String::new();
        TensorLayout::<2>::wgsl_type_definition(&mut source);
        for matrix in &self.matrices {
            source.push_str(&matrix.declaration());
        }
        let [x, y, z] = self.workgroup_size;
        source.push_str(&format!(
            "@compute @workgroup_size({x}, {y}, {z})\n\
             fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {{\n{}\n}}\n",
            self.body
        ));
        trace!("generated kernel:\n{source}");
        source
    }
}

/// The two bindings of one matrix: its words and its layout uniform.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatrixBinding {
    data: u32,
    writable: bool,
}

impl MatrixBinding {
    fn layout(&self) -> u32 {
        self.data + 1
    }

    fn layout_name(&self) -> String {
        format!("i_{}", self.layout())
    }

    /// Size of `axis` (0 for rows, 1 for word columns).
    pub(crate) fn shape(&self, axis: usize) -> String {
        format!("{}.shape_{axis}", self.layout_name())
    }

    /// A WGSL expression for the buffer position of `[row, col]`.
    pub(crate) fn index(&self, row: &str, col: &str) -> String {
        let layout = self.layout_name();
        let mut index = format!("{layout}.offset");
        for (axis, position) in [row, col].into_iter().enumerate() {
            index.push_str(&format!(" + {position} * {layout}.stride_{axis}"));
        }
        index
    }

    fn declaration(&self) -> String {
        let access = if self.writable { "read_write" } else { "read" };
        format!(
            "@group(0) @binding({data}) var<storage, {access}> {name}: array<u32>;\n\
             @group(0) @binding({layout}) var<uniform> {layout_name}: TensorLayout;\n",
            data = self.data,
            name = self,
            layout = self.layout(),
            layout_name = self.layout_name(),
        )
    }
}

impl Display for MatrixBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i_{}", self.data)
    }
}

#[cfg(test)]
#[test]
fn test_kernel_source() {
    let mut kernel = GenericKernel::new([16, 16, 1]);
    let input = kernel.add_matrix(false);
    let output = kernel.add_matrix(true);
    kernel.set_body(format!("{output}[0] = {input}[{}];", input.index("row", "col")));

    let source = kernel.source();
    assert!(source.contains("struct TensorLayout {"));
    assert!(source.contains("@group(0) @binding(0) var<storage, read> i_0: array<u32>;"));
    assert!(source.contains("@group(0) @binding(1) var<uniform> i_1: TensorLayout;"));
    assert!(source.contains("@group(0) @binding(2) var<storage, read_write> i_2: array<u32>;"));
    assert!(source.contains("@group(0) @binding(3) var<uniform> i_3: TensorLayout;"));
    assert!(source.contains("@workgroup_size(16, 16, 1)"));
    assert!(source.contains("i_2[0] = i_0[i_1.offset + row * i_1.stride_0 + col * i_1.stride_1];"));
    assert_eq!(output.shape(1), "i_3.shape_1");
}
