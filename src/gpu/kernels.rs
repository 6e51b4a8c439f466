// gpu/kernels.rs — Compiled compute pipelines for the correlation stages.
//
// Five WGSL kernels, compiled from templates in src/shaders/:
//
//   tiling.wgsl       tile_windows   2D workgroup ({{WG_X}}×{{WG_Y}}) per sample
//   detrend.wgsl      detrend        64 invocations per window
//   cross_power.wgsl  cross_power    2D workgroup per sample
//   fft.wgsl          fft_lines      {{N}} invocations per window line
//   peak.wgsl         find_peak      {{N}} invocations per window
//
// The first three are compiled once. FFT and peak bake the window size into
// the workgroup size and shared-memory arrays, so they are compiled per
// distinct W on first use and cached in a `HashMap<usize, WindowKernels>`.
// A three-pass 64→32→16 run therefore compiles eight pipelines in total.
//
// PARAMS LAYOUT
// ─────────────
// Every kernel takes its dimensions in a small uniform struct. The Rust
// mirrors below are `#[repr(C)]` + `bytemuck::Pod` and padded to a multiple
// of 16 bytes, matching WGSL uniform layout rules field-for-field.
//
// NEW RUST CONCEPTS
// ──────────────────
// - `HashMap::entry(..).or_insert_with(..)`: compile-on-first-use cache.
// - `wgpu::BufferBinding { size: Some(..) }`: bind a sub-range of a larger
//   buffer. Buffers are sized for the run's largest pass; smaller passes
//   bind only their active prefix so `arrayLength()`-free shaders never see
//   stale tail data.

use std::collections::HashMap;
use std::num::NonZeroU64;

use log::debug;
use wgpu::util::DeviceExt;

use crate::gpu::device::GpuDevice;

// ---------------------------------------------------------------------------
// Uniform params (must match the WGSL structs exactly)
// ---------------------------------------------------------------------------

/// Layout of `TileParams` in `tiling.wgsl` (32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct TileParams {
    pub frame_width:  u32,
    pub frame_height: u32,
    pub window:       u32,
    pub shift:        u32,
    pub tiles_width:  u32,
    pub tiles_height: u32,
    pub warped:       u32,
    pub _pad:         u32,
}

/// Layout of `DetrendParams` in `detrend.wgsl` (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct DetrendParams {
    pub tiles_width: u32,
    pub window:      u32,
    pub _pad0:       u32,
    pub _pad1:       u32,
}

/// Layout of `FftParams` in `fft.wgsl` (32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct FftParams {
    pub tiles_width: u32,
    pub stride_x:    u32,
    pub stride_y:    u32,
    pub step:        u32,
    pub sign:        f32,
    pub inverse:     u32,
    pub _pad0:       u32,
    pub _pad1:       u32,
}

/// Layout of `CrossParams` in `cross_power.wgsl` (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct CrossParams {
    pub tiles_width:  u32,
    pub tiles_height: u32,
    pub window:       u32,
    pub sigma:        f32,
}

/// Layout of `PeakParams` in `peak.wgsl` (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct PeakParams {
    pub tiles_width: u32,
    pub grid_cols:   u32,
    pub subpixel:    u32,
    pub _pad:        u32,
}

// ---------------------------------------------------------------------------
// Binding helpers
// ---------------------------------------------------------------------------

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind the first `bytes` bytes of `buffer`.
pub(crate) fn prefix(buffer: &wgpu::Buffer, bytes: u64) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer,
        offset: 0,
        size: NonZeroU64::new(bytes),
    })
}

/// Upload a params struct as a fresh uniform buffer.
pub(crate) fn params_buffer<P: bytemuck::Pod>(
    gpu: &GpuDevice,
    label: &str,
    params: &P,
) -> wgpu::Buffer {
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(params),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// One compute pipeline plus the layout its bind groups are built from.
pub struct Kernel {
    pub pipeline: wgpu::ComputePipeline,
    pub bgl: wgpu::BindGroupLayout,
}

impl Kernel {
    fn compile(
        gpu: &GpuDevice,
        label: &str,
        source: String,
        entry_point: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Kernel { pipeline, bgl }
    }

    /// Bind group over `resources`, bound at 0, 1, 2, … in order.
    pub fn bind(
        &self,
        gpu: &GpuDevice,
        label: &str,
        resources: Vec<wgpu::BindingResource<'_>>,
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = resources
            .into_iter()
            .enumerate()
            .map(|(i, resource)| wgpu::BindGroupEntry { binding: i as u32, resource })
            .collect();
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.bgl,
            entries: &entries,
        })
    }

    /// Record one dispatch of this kernel in its own compute pass.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        bind_group: &wgpu::BindGroup,
        workgroups: (u32, u32),
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
    }
}

/// FFT and peak kernels specialised for one window size.
pub struct WindowKernels {
    pub fft: Kernel,
    pub peak: Kernel,
}

impl WindowKernels {
    fn compile(gpu: &GpuDevice, window: usize) -> Self {
        let n = window.to_string();
        let log2_n = window.trailing_zeros().to_string();

        let fft_src = include_str!("../shaders/fft.wgsl")
            .replace("{{N}}", &n)
            .replace("{{LOG2_N}}", &log2_n);
        let fft = Kernel::compile(
            gpu,
            "fft.wgsl",
            fft_src,
            "fft_lines",
            &[
                // 0: tiled buffer (in place)
                storage_entry(0, false),
                // 1: params
                uniform_entry(1),
            ],
        );

        let peak_src = include_str!("../shaders/peak.wgsl").replace("{{N}}", &n);
        let peak = Kernel::compile(
            gpu,
            "peak.wgsl",
            peak_src,
            "find_peak",
            &[
                // 0: correlation surface
                storage_entry(0, true),
                // 1: U accumulator
                storage_entry(1, false),
                // 2: V accumulator
                storage_entry(2, false),
                // 3: params
                uniform_entry(3),
            ],
        );

        WindowKernels { fft, peak }
    }
}

// ---------------------------------------------------------------------------
// PivKernels
// ---------------------------------------------------------------------------

/// Every pipeline the GPU engine dispatches.
///
/// Create once per run; window-specialised kernels are added lazily by
/// [`PivKernels::for_window`].
pub struct PivKernels {
    pub tiling: Kernel,
    pub detrend: Kernel,
    pub cross_power: Kernel,
    windows: HashMap<usize, WindowKernels>,
}

impl PivKernels {
    pub fn new(gpu: &GpuDevice) -> Self {
        let ws = gpu.workgroup_size;

        let tiling = Kernel::compile(
            gpu,
            "tiling.wgsl",
            ws.apply(include_str!("../shaders/tiling.wgsl")),
            "tile_windows",
            &[
                // 0: frame samples (vec2<f32>)
                storage_entry(0, true),
                // 1: per-pixel shift map (vec2<i32>)
                storage_entry(1, true),
                // 2: tiled buffer (written)
                storage_entry(2, false),
                // 3: params
                uniform_entry(3),
            ],
        );

        let detrend = Kernel::compile(
            gpu,
            "detrend.wgsl",
            include_str!("../shaders/detrend.wgsl").to_string(),
            "detrend",
            &[storage_entry(0, false), uniform_entry(1)],
        );

        let cross_power = Kernel::compile(
            gpu,
            "cross_power.wgsl",
            ws.apply(include_str!("../shaders/cross_power.wgsl")),
            "cross_power",
            &[
                // 0: spectrum A (overwritten with the cross-power)
                storage_entry(0, false),
                // 1: spectrum B
                storage_entry(1, true),
                // 2: params
                uniform_entry(2),
            ],
        );

        PivKernels {
            tiling,
            detrend,
            cross_power,
            windows: HashMap::new(),
        }
    }

    /// FFT/peak kernels for window size `window`, compiling them on first use.
    pub fn for_window(&mut self, gpu: &GpuDevice, window: usize) -> &WindowKernels {
        self.windows.entry(window).or_insert_with(|| {
            debug!("[ripiv] compiling FFT/peak kernels for W={window}");
            WindowKernels::compile(gpu, window)
        })
    }

    /// Already-compiled kernels for `window`, if any.
    pub fn window(&self, window: usize) -> Option<&WindowKernels> {
        self.windows.get(&window)
    }

    /// Window sizes with compiled kernels.
    pub fn compiled_windows(&self) -> Vec<usize> {
        let mut ws: Vec<usize> = self.windows.keys().copied().collect();
        ws.sort_unstable();
        ws
    }
}
