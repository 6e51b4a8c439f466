// gpu/buffers.rs — Run-sized device buffers and readback.
//
// All buffers are allocated once per run, sized for the largest pass, and
// reused for every pass and frame pair:
//
//   frame_a, frame_b   W×H  × vec2<f32>    current frame pair
//   shifts             W×H  × vec2<i32>    per-pixel warp from the last pass
//   tiles_a, tiles_b   max tiles × vec2<f32>
//   field_u, field_v   max grid points × f32
//   staging            2 × max grid points × f32   (MAP_READ)
//
// Passes bind sub-range prefixes of these (see `kernels::prefix`).

use num_complex::Complex32;

use crate::error::Result;
use crate::gpu::device::{GpuDevice, GpuError};
use crate::grid::PassPlan;

/// Bytes per complex sample.
pub const SAMPLE_BYTES: u64 = std::mem::size_of::<Complex32>() as u64;

/// Bytes per field component value.
pub const VALUE_BYTES: u64 = std::mem::size_of::<f32>() as u64;

pub struct PivBuffers {
    pub frame_a: wgpu::Buffer,
    pub frame_b: wgpu::Buffer,
    pub shifts: wgpu::Buffer,
    pub tiles_a: wgpu::Buffer,
    pub tiles_b: wgpu::Buffer,
    pub field_u: wgpu::Buffer,
    pub field_v: wgpu::Buffer,
    pub staging: wgpu::Buffer,
    /// Bytes in one frame (and in the shift map).
    pub frame_bytes: u64,
}

impl PivBuffers {
    pub fn new(gpu: &GpuDevice, plan: &PassPlan) -> Result<Self> {
        let pixels = (plan.frame_width() * plan.frame_height()) as u64;
        let frame_bytes = pixels * SAMPLE_BYTES;
        let tiles_bytes = plan.max_tiles_len() as u64 * SAMPLE_BYTES;
        let grid_bytes = plan.max_grid_len() as u64 * VALUE_BYTES;

        gpu.check_buffer_size("frame", frame_bytes)?;
        gpu.check_buffer_size("tiles", tiles_bytes)?;

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let readable = storage | wgpu::BufferUsages::COPY_SRC;
        let make = |label: &str, size: u64, usage: wgpu::BufferUsages| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };

        Ok(PivBuffers {
            frame_a: make("frame_a", frame_bytes, storage),
            frame_b: make("frame_b", frame_bytes, storage),
            shifts: make("shifts", frame_bytes, storage),
            tiles_a: make("tiles_a", tiles_bytes, readable),
            tiles_b: make("tiles_b", tiles_bytes, readable),
            field_u: make("field_u", grid_bytes, readable),
            field_v: make("field_v", grid_bytes, readable),
            staging: make(
                "field staging",
                2 * grid_bytes,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            ),
            frame_bytes,
        })
    }
}

/// Map the first `bytes` bytes of a MAP_READ buffer and copy them out.
pub fn map_read<T: bytemuck::Pod>(
    gpu: &GpuDevice,
    buffer: &wgpu::Buffer,
    bytes: u64,
) -> std::result::Result<Vec<T>, GpuError> {
    let slice = buffer.slice(..bytes);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| GpuError::BufferMap(e.to_string()))?
        .map_err(|e| GpuError::BufferMap(e.to_string()))?;

    let data = {
        let mapped = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&mapped).to_vec()
    };
    buffer.unmap();
    Ok(data)
}

/// Copy `bytes` bytes out of a COPY_SRC buffer through a temporary staging
/// buffer. Used for diagnostics and tests, not on the per-pass path.
pub fn read_buffer<T: bytemuck::Pod>(
    gpu: &GpuDevice,
    src: &wgpu::Buffer,
    bytes: u64,
) -> std::result::Result<Vec<T>, GpuError> {
    let rb = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &rb, 0, bytes);
    gpu.queue.submit(std::iter::once(encoder.finish()));
    map_read(gpu, &rb, bytes)
}
