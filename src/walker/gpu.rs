// GPU-accelerated distinguished-point walker using wgpu compute shaders.
//
// Architecture (generalized from a fixed-header SHA256d miner to a
// variable-length, single-SHA256, DP-terminated Pollard-rho walk):
//   - Each GPU thread (lane) owns a persistent (state, start) pair and
//     repeatedly applies F, swapping onto a freshly stolen start whenever
//     it lands on a distinguished point.
//   - The WGSL compute shader implements F and the DP predicate on-GPU.
//   - Results are read back via a staging buffer after each dispatch.
//   - Falls back to the CPU reference walker (`walker::kernel`) if no GPU
//     adapter is found.

use crate::error::CoreError;
use crate::params::HashParams;
use crate::walker::kernel;
use rand::RngCore;
use std::mem::size_of;

/// Words reserved per state slot in every GPU buffer. `total_bytes` is at
/// most 27 (spec §3), so `ceil(27/4) == 7` words always suffice; unused
/// tail words for smaller configurations are simply zero and ignored.
pub const MAX_WORDS: usize = 7;

/// Threads per workgroup (must match `@workgroup_size` in the shader).
const WORKGROUP_SIZE: u32 = 256;

/// Tunable dispatch shape. `lanes` is `W`, `steps` is `S`, `max_dps` is `M`
/// from spec §4.1.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub lanes: u32,
    pub steps: u32,
    pub max_dps: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            lanes: 1 << 14, // W ~= 2^14
            steps: 1024,    // S
            max_dps: 1024,  // M, typ. MAX_DPS_PER_CALL
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParams {
    total_bytes: u32,
    prefix_bytes: u32,
    suffix_bytes: u32,
    ascii_bytes: u32,
    mask0: u32,
    mask1: u32,
    max_dps: u32,
    steps: u32,
}

const SHADER_SRC: &str = include_str!("walker.wgsl");

/// A `(start, dp)` pair read back from a completed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpPair {
    pub start: Vec<u8>,
    pub dp: Vec<u8>,
}

/// GPU-resident walker. Owns a wgpu device/queue and `W` persistent lanes.
pub struct GpuWalker {
    params: HashParams,
    config: DispatchConfig,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    params_buf: wgpu::Buffer,
    current_states_buf: wgpu::Buffer,
    start_points_buf: wgpu::Buffer,
    dp_buffer: wgpu::Buffer,
    dp_count_buf: wgpu::Buffer,
    dp_buffer_staging: wgpu::Buffer,
    dp_count_staging: wgpu::Buffer,
}

impl GpuWalker {
    /// Initialise wgpu, build the walker pipeline, and seed `W` lanes with
    /// fresh random starts. Returns an error (for the caller to fall back
    /// to the CPU walker) if no adapter is available.
    pub fn new(params: HashParams, config: DispatchConfig) -> Result<Self, String> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or("No GPU adapter found - is a GPU driver installed?")?;

        let adapter_info = adapter.get_info();
        log::info!("GPU: {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("prdp-walker"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("walker"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SRC.into()),
        });

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("walker_bgl"),
            entries: &[
                storage_entry(0, true),  // params
                storage_entry(1, false), // current_states
                storage_entry(2, false), // start_points
                storage_entry(3, false), // dp_buffer
                storage_entry(4, false), // dp_count
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("walker_pl"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("walker_cp"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        let lanes = config.lanes as usize;
        let max_dps = config.max_dps as usize;

        let params_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params"),
            size: size_of::<GpuParams>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let state_buf_size = (lanes * MAX_WORDS * size_of::<u32>()) as u64;
        let current_states = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("current_states"),
            size: state_buf_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let start_points = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("start_points"),
            size: state_buf_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let dp_buf_size = (max_dps * 2 * MAX_WORDS * size_of::<u32>()) as u64;
        let dp_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dp_buffer"),
            size: dp_buf_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let dp_buffer_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dp_buffer_staging"),
            size: dp_buf_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let dp_count_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dp_count"),
            size: size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let dp_count_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dp_count_staging"),
            size: size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("walker_bg"),
            layout: &bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: current_states.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: start_points.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: dp_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: dp_count_buf.as_entire_binding(),
                },
            ],
        });

        let gpu_params = GpuParams {
            total_bytes: params.total_bytes() as u32,
            prefix_bytes: params.prefix_bytes as u32,
            suffix_bytes: params.suffix_bytes as u32,
            ascii_bytes: params.ascii_bytes() as u32,
            mask0: params.dp_masks().0,
            mask1: params.dp_masks().1,
            max_dps: config.max_dps,
            steps: config.steps,
        };
        queue.write_buffer(&params_buf, 0, bytemuck::bytes_of(&gpu_params));

        let walker = Self {
            params,
            config,
            device,
            queue,
            pipeline,
            bind_group,
            params_buf,
            current_states_buf: current_states,
            start_points_buf: start_points,
            dp_buffer,
            dp_count_buf,
            dp_buffer_staging,
            dp_count_staging,
        };
        walker.seed_initial_lanes(&walker.current_states_buf, &walker.start_points_buf);
        Ok(walker)
    }

    fn seed_initial_lanes(&self, current_states: &wgpu::Buffer, start_points: &wgpu::Buffer) {
        let lanes = self.config.lanes as usize;
        let mut rng = rand::thread_rng();
        let mut words = vec![0u32; lanes * MAX_WORDS];
        let num_words = self.params.num_words();
        for lane in 0..lanes {
            for w in 0..num_words {
                words[lane * MAX_WORDS + w] = rng.next_u32();
            }
            // Force the MSB of word 0 high so a freshly seeded lane isn't
            // already sitting on a distinguished point (spec §4.1).
            words[lane * MAX_WORDS] |= 0x8000_0000;
        }
        let bytes = bytemuck::cast_slice(&words);
        self.queue.write_buffer(current_states, 0, bytes);
        self.queue.write_buffer(start_points, 0, bytes);
    }

    /// Run one dispatch of `S` steps across all `W` lanes, returning the
    /// `(start, dp)` pairs emitted this batch. If more DPs were emitted
    /// than `M` could hold, logs the overflow (spec §4.1 / §7 `DpOverflow`)
    /// and returns only the first `M`.
    pub fn dispatch(&mut self) -> Result<Vec<DpPair>, CoreError> {
        let max_dps = self.config.max_dps as usize;
        let num_words = self.params.num_words();

        // Pre-seed dp_buffer's "seed" half with fresh random bytes and
        // force each seed's word-0 MSB, per spec §4.1's "the host must set
        // the MSB of each new_start's word 0 to 1" requirement.
        let mut rng = rand::thread_rng();
        let mut seed_words = vec![0u32; max_dps * 2 * MAX_WORDS];
        for slot in 0..max_dps {
            let base = slot * 2 * MAX_WORDS;
            for w in 0..num_words {
                seed_words[base + w] = rng.next_u32();
            }
            seed_words[base] |= 0x8000_0000;
        }
        self.queue
            .write_buffer(&self.dp_buffer, 0, bytemuck::cast_slice(&seed_words));
        self.queue
            .write_buffer(&self.dp_count_buf, 0, bytemuck::bytes_of(&0u32));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("walker_cmd"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("walker_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            let groups = self.config.lanes.div_ceil(WORKGROUP_SIZE);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        let dp_buf_size = (max_dps * 2 * MAX_WORDS * size_of::<u32>()) as u64;
        encoder.copy_buffer_to_buffer(&self.dp_buffer, 0, &self.dp_buffer_staging, 0, dp_buf_size);
        encoder.copy_buffer_to_buffer(
            &self.dp_count_buf,
            0,
            &self.dp_count_staging,
            0,
            size_of::<u32>() as u64,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let dp_count = self.read_u32(&self.dp_count_staging)?;
        let raw = self.read_buffer(&self.dp_buffer_staging, dp_buf_size as usize)?;
        let words: &[u32] = bytemuck::cast_slice(&raw);

        let emitted = (dp_count as usize).min(max_dps);
        if dp_count as usize > max_dps {
            log::warn!(
                "dp_count {} exceeded max_dps {} this dispatch; {} DPs dropped (raise dp_bits)",
                dp_count,
                max_dps,
                dp_count as usize - max_dps
            );
        }

        let mut pairs = Vec::with_capacity(emitted);
        for slot in 0..emitted {
            let base = slot * 2 * MAX_WORDS;
            let start = unpack_words(&words[base..base + num_words], self.params.total_bytes());
            let dp = unpack_words(
                &words[base + MAX_WORDS..base + MAX_WORDS + num_words],
                self.params.total_bytes(),
            );
            pairs.push(DpPair { start, dp });
        }
        Ok(pairs)
    }

    fn read_buffer(&self, buf: &wgpu::Buffer, size: usize) -> Result<Vec<u8>, CoreError> {
        let slice = buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| CoreError::Transient("GPU readback channel closed".into()))?
            .map_err(|e| CoreError::Transient(format!("GPU buffer map failed: {:?}", e)))?;
        let data = slice.get_mapped_range()[..size].to_vec();
        drop(slice);
        buf.unmap();
        Ok(data)
    }

    fn read_u32(&self, buf: &wgpu::Buffer) -> Result<u32, CoreError> {
        let bytes = self.read_buffer(buf, size_of::<u32>())?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn params(&self) -> &HashParams {
        &self.params
    }
}

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

fn unpack_words(words: &[u32], total_bytes: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(total_bytes);
    for w in words {
        bytes.extend_from_slice(&w.to_be_bytes());
    }
    bytes.truncate(total_bytes);
    bytes
}

/// Run the walker to produce one `(start, dp)` pair, using the GPU if
/// available and falling back to the CPU reference walker otherwise. This
/// is the convenience entry point used by `mine`/`submit` CLI paths that
/// just need a single chain walked, not a sustained GPU mining session.
pub fn walk_one_cpu_fallback(params: &HashParams) -> DpPair {
    let mut rng = rand::thread_rng();
    let mut start = vec![0u8; params.total_bytes()];
    rng.fill_bytes(&mut start);
    start[0] |= 0x80;
    let (dp, _) = kernel::walk_to_dp(&start, params);
    DpPair { start, dp }
}
