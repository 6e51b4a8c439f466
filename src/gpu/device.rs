// gpu/device.rs — Vulkan device setup, limits and error scopes.
//
// One `GpuDevice` is created per run and shared by every kernel. It owns:
//
//   - the adapter choice (ranked: discrete > integrated > virtual/other >
//     software), logged so a silent llvmpipe fallback is visible
//   - the limits requested from wgpu, shaped by a `DeviceProfile`
//   - the 2D workgroup size baked into the per-sample kernels
//   - `scoped()`, which turns wgpu validation/OOM errors raised while a
//     stage records and submits into `GpuError::Validation { stage }`
//
// PROFILES
// ────────
//   Native    wgpu defaults, except the storage-binding and buffer sizes
//             are raised to the adapter's. The tiled buffers of a 16 px
//             pass over a 4k frame are several hundred MiB.
//   Embedded  VideoCore-class caps (256 invocations, 128 MiB bindings),
//             requested on purpose so an oversized plan fails on the
//             workstation instead of on the target. V3D adapters always
//             get this profile.
//
// WINDOW LIMIT
// ────────────
// The FFT and peak kernels put one invocation on every line of a window,
// so W may not exceed min(max invocations, max workgroup x). `max_window()`
// returns that bound and the pass plan is checked against it before any
// buffer exists.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` drives wgpu's async adapter/device requests (and
//   `pop_error_scope`) to completion on the calling thread.
// - Field order = drop order: `_instance` is the last field so the Vulkan
//   instance is torn down after the device and queue. dzn (WSL2) crashes
//   on the reverse order.

use std::fmt;

use log::{info, warn};
use thiserror::Error;

/// Which limits to request from the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Adapter limits for buffer sizes, wgpu defaults otherwise.
    Native,
    /// Artificially small limits matching a VideoCore-class GPU.
    Embedded,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceProfile::Native => "native",
            DeviceProfile::Embedded => "embedded (capped limits)",
        })
    }
}

/// Workgroup shape of the 2D per-sample kernels (tiling, cross-power).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Fill the `{{WG_X}}` / `{{WG_Y}}` placeholders of a shader template.
    pub fn apply(&self, template: &str) -> String {
        template
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
    }

    /// 16×8 on desktop parts (x runs along tiled-buffer rows), 8×8 on
    /// embedded ones.
    fn default_for(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::Embedded => WorkgroupSize { x: 8, y: 8 },
        }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.x, self.y)
    }
}

/// An open device plus everything the kernels need to know about it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter: wgpu::AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    /// Limits the device was opened with.
    pub limits: wgpu::Limits,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Open the best Vulkan adapter with `Native` limits.
    pub fn new() -> Result<Self, GpuError> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    pub fn new_with_profile(profile: DeviceProfile) -> Result<Self, GpuError> {
        pollster::block_on(Self::open(profile))
    }

    async fn open(requested: DeviceProfile) -> Result<Self, GpuError> {
        // Validation layers in debug builds only. dzn reports itself as
        // non-compliant, so it has to be allowed explicitly.
        let mut flags = wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER;
        if cfg!(debug_assertions) {
            flags |= wgpu::InstanceFlags::VALIDATION;
        }
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let adapter = pick_adapter(&instance)?;
        let info = adapter.get_info();

        let profile = if requested == DeviceProfile::Native
            && info.name.to_ascii_lowercase().contains("v3d")
        {
            info!("[ripiv] {} is a V3D part, switching to the embedded profile", info.name);
            DeviceProfile::Embedded
        } else {
            requested
        };

        let limits = limits_for_profile(profile, &adapter.limits());
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ripiv"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let gpu = GpuDevice {
            device,
            queue,
            profile,
            adapter: info,
            workgroup_size: WorkgroupSize::default_for(profile),
            limits,
            _instance: instance,
        };
        info!("[ripiv] {gpu}");
        Ok(gpu)
    }

    /// Replace the per-sample workgroup shape; must fit the device limit.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let max = self.limits.max_compute_invocations_per_workgroup;
        if x * y > max {
            return Err(GpuError::WorkgroupTooLarge { total: x * y, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    /// Largest window side the per-line kernels can run on this device.
    pub fn max_window(&self) -> usize {
        max_window_for(&self.limits)
    }

    /// Fail early if a buffer of `size` bytes cannot be bound as storage.
    pub fn check_buffer_size(&self, label: &'static str, size: u64) -> Result<(), GpuError> {
        let max = (self.limits.max_storage_buffer_binding_size as u64)
            .min(self.limits.max_buffer_size);
        if size > max {
            return Err(GpuError::BufferTooLarge { label, size, max });
        }
        Ok(())
    }

    /// Workgroup counts covering a `w`×`h` domain. Kernels bounds-check
    /// their global id against the domain.
    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        dispatch_for(self.workgroup_size, w, h)
    }

    /// Run `f` inside validation + out-of-memory error scopes.
    ///
    /// An error captured by either scope becomes
    /// `GpuError::Validation { stage, .. }`; an error returned by `f`
    /// itself wins over both.
    pub fn scoped<T>(
        &self,
        stage: &'static str,
        f: impl FnOnce() -> Result<T, GpuError>,
    ) -> Result<T, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        let value = out?;
        match validation.or(oom) {
            Some(e) => Err(GpuError::Validation { stage, message: e.to_string() }),
            None => Ok(value),
        }
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}), profile {}, workgroup {}, max window {}",
            self.adapter.name,
            self.adapter.device_type,
            self.profile,
            self.workgroup_size,
            self.max_window()
        )
    }
}

// ---------------------------------------------------------------------------
// Adapter and limits
// ---------------------------------------------------------------------------

fn adapter_rank(kind: wgpu::DeviceType) -> u8 {
    match kind {
        wgpu::DeviceType::DiscreteGpu => 3,
        wgpu::DeviceType::IntegratedGpu => 2,
        wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => 1,
        wgpu::DeviceType::Cpu => 0,
    }
}

/// Highest-ranked Vulkan adapter; ties keep enumeration order.
fn pick_adapter(instance: &wgpu::Instance) -> Result<wgpu::Adapter, GpuError> {
    let mut best: Option<(u8, wgpu::Adapter)> = None;
    for adapter in instance.enumerate_adapters(wgpu::Backends::VULKAN) {
        let info = adapter.get_info();
        let rank = adapter_rank(info.device_type);
        info!("[ripiv] found adapter {} ({:?})", info.name, info.device_type);
        if best.as_ref().map_or(true, |(r, _)| rank > *r) {
            best = Some((rank, adapter));
        }
    }
    let (rank, adapter) = best.ok_or(GpuError::NoSuitableAdapter)?;
    if rank == 0 {
        warn!("[ripiv] only a software Vulkan renderer is available");
    }
    Ok(adapter)
}

fn limits_for_profile(profile: DeviceProfile, adapter: &wgpu::Limits) -> wgpu::Limits {
    let base = wgpu::Limits::default();
    match profile {
        DeviceProfile::Native => wgpu::Limits {
            max_storage_buffer_binding_size: adapter.max_storage_buffer_binding_size,
            max_buffer_size: adapter.max_buffer_size,
            ..base
        },
        DeviceProfile::Embedded => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_storage_buffer_binding_size: 128 << 20,
            ..base
        },
    }
}

fn max_window_for(limits: &wgpu::Limits) -> usize {
    limits
        .max_compute_invocations_per_workgroup
        .min(limits.max_compute_workgroup_size_x) as usize
}

fn dispatch_for(ws: WorkgroupSize, w: u32, h: u32) -> (u32, u32) {
    (w.div_ceil(ws.x), h.div_ceil(ws.y))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Device-level failures.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No Vulkan adapter at all; on WSL2 check `vulkaninfo`.
    #[error("no Vulkan adapter found (is a Vulkan driver installed?)")]
    NoSuitableAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("workgroup of {total} invocations exceeds the device limit of {max}")]
    WorkgroupTooLarge { total: u32, max: u32 },

    /// Captured by an error scope while `stage` was running.
    #[error("wgpu error in {stage}: {message}")]
    Validation { stage: &'static str, message: String },

    #[error("buffer map failed: {0}")]
    BufferMap(String),

    #[error("buffer '{label}' needs {size} bytes, device allows {max}")]
    BufferTooLarge { label: &'static str, size: u64, max: u64 },
}
