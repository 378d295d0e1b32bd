use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::num::NonZeroU64;

use glam::Vec2;

use crate::renderer::casters::{classify, CasterDraw, CasterVertex, ShadowCaster};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::uniforms::{CasterUniform, EncodeUniform};
use crate::settings::FilterMode;
use crate::shadow::backend::{
    DepthPass, MomentEncoder, MomentMode, RenderTargets, TargetDesc, TargetId, TargetKind,
};
use crate::shadow::camera::ShadowCamera;
use crate::shadow::config::{AtlasBand, CasterFilter};

pub const DEPTH_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const MOMENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

/// Depth-target clear value: zero moments with a small coverage weight so
/// empty regions still normalize.
pub const NOTHING_DRAWN: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.0,
    b: 1.0 / 2048.0,
    a: 0.0,
};

#[derive(Debug)]
pub enum GpuInitError {
    Adapter(wgpu::RequestAdapterError),
    Device(wgpu::RequestDeviceError),
}

impl fmt::Display for GpuInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuInitError::Adapter(err) => write!(f, "no suitable adapter: {err}"),
            GpuInitError::Device(err) => write!(f, "device request failed: {err}"),
        }
    }
}

impl std::error::Error for GpuInitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuInitError::Adapter(err) => Some(err),
            GpuInitError::Device(err) => Some(err),
        }
    }
}

impl From<wgpu::RequestAdapterError> for GpuInitError {
    fn from(err: wgpu::RequestAdapterError) -> Self {
        GpuInitError::Adapter(err)
    }
}

impl From<wgpu::RequestDeviceError> for GpuInitError {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        GpuInitError::Device(err)
    }
}

fn align_to(size: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    size.div_ceil(alignment) * alignment
}

fn filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Point => wgpu::FilterMode::Nearest,
        FilterMode::Bilinear => wgpu::FilterMode::Linear,
    }
}

struct GpuTarget {
    desc: TargetDesc,
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth_view: Option<wgpu::TextureView>,
    sampler: wgpu::Sampler,
}

impl GpuTarget {
    fn new(device: &wgpu::Device, desc: TargetDesc) -> Self {
        let size = wgpu::Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: 1,
        };
        let (format, usage) = match desc.kind {
            TargetKind::Depth => (
                DEPTH_COLOR_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            ),
            TargetKind::Moments => (
                MOMENT_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            ),
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth_view = (desc.kind == TargetKind::Depth).then(|| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("ShadowDepthBuffer"),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_BUFFER_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        let filter = filter(desc.filter);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            desc,
            _texture: texture,
            view,
            depth_view,
            sampler,
        }
    }
}

struct DepthPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl DepthPipeline {
    const INITIAL_CAPACITY: usize = 16;

    fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ShadowCasterLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(mem::size_of::<CasterUniform>() as u64),
                },
                count: None,
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("VsmDepthShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/vsm_depth.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VsmDepthPipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("VsmDepthPipeline")
            .with_vertex_buffer(CasterVertex::layout())
            .with_color_target(DEPTH_COLOR_FORMAT)
            .with_depth_stencil(DEPTH_BUFFER_FORMAT, wgpu::CompareFunction::Less)
            .with_no_culling()
            .build();

        let stride = align_to(
            mem::size_of::<CasterUniform>() as u64,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let (buffer, bind_group) =
            Self::allocate(device, &layout, stride, Self::INITIAL_CAPACITY);

        Self {
            pipeline,
            layout,
            buffer,
            bind_group,
            stride,
            capacity: Self::INITIAL_CAPACITY,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        capacity: usize,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ShadowCasterUniforms"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ShadowCasterBindGroup"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(mem::size_of::<CasterUniform>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    fn reserve(&mut self, device: &wgpu::Device, count: usize) {
        if count <= self.capacity {
            return;
        }
        let capacity = count.next_power_of_two();
        log::debug!("Growing shadow caster uniforms to {} slots", capacity);
        let (buffer, bind_group) = Self::allocate(device, &self.layout, self.stride, capacity);
        self.buffer = buffer;
        self.bind_group = bind_group;
        self.capacity = capacity;
    }
}

struct EncodePipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

impl EncodePipeline {
    fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VsmEncodeLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(mem::size_of::<EncodeUniform>() as u64),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("VsmEncodeShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/vsm_encode.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VsmEncodePipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("VsmEncodePipeline")
            .with_color_target(MOMENT_FORMAT)
            .with_no_culling()
            .build();

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VsmEncodeUniform"),
            size: mem::size_of::<EncodeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            layout,
            uniform_buffer,
        }
    }
}

/// Shadow backend on a wgpu device. Every draw is recorded and submitted
/// right away, so calls are ordered exactly as the cascade core issues them.
pub struct WgpuShadowBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: u64,
    targets: HashMap<TargetId, GpuTarget>,
    active: Option<TargetId>,
    casters: Vec<ShadowCaster>,
    depth: DepthPipeline,
    encode: EncodePipeline,
    /// 1x1 depth-kind surface holding [`NOTHING_DRAWN`], sampled when an
    /// encode has no source.
    empty_source: GpuTarget,
}

impl WgpuShadowBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let depth = DepthPipeline::new(&device);
        let encode = EncodePipeline::new(&device);

        let empty_source = GpuTarget::new(
            &device,
            TargetDesc {
                label: "ShadowEmptySource",
                kind: TargetKind::Depth,
                width: 1,
                height: 1,
                filter: FilterMode::Point,
            },
        );
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ShadowEmptySourceClear"),
        });
        Self::clear_pass(&mut encoder, &empty_source);
        queue.submit(Some(encoder.finish()));

        Self {
            device,
            queue,
            next_id: 0,
            targets: HashMap::new(),
            active: None,
            casters: Vec::new(),
            depth,
            encode,
            empty_source,
        }
    }

    /// Creates a device without a surface, for offline rendering and tests.
    pub async fn request_headless() -> Result<Self, GpuInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("ShadowDevice"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// View of a live target, for binding the published atlas in materials.
    pub fn view(&self, target: TargetId) -> Option<&wgpu::TextureView> {
        self.targets.get(&target).map(|t| &t.view)
    }

    pub fn sampler(&self, target: TargetId) -> Option<&wgpu::Sampler> {
        self.targets.get(&target).map(|t| &t.sampler)
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    /// Adds a caster and returns its index.
    pub fn add_caster(&mut self, caster: ShadowCaster) -> usize {
        self.casters.push(caster);
        self.casters.len() - 1
    }

    fn active_of_kind(&self, kind: TargetKind) -> Option<TargetId> {
        let active = self
            .active
            .filter(|id| self.targets.get(id).is_some_and(|t| t.desc.kind == kind));
        if active.is_none() {
            log::warn!("No {:?} surface bound, draw ignored", kind);
        }
        active
    }

    fn clear_pass(encoder: &mut wgpu::CommandEncoder, target: &GpuTarget) {
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ShadowClearPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(NOTHING_DRAWN),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
}

impl RenderTargets for WgpuShadowBackend {
    fn create_target(&mut self, desc: &TargetDesc) -> TargetId {
        self.next_id += 1;
        let id = TargetId::new(self.next_id);
        self.targets.insert(id, GpuTarget::new(&self.device, *desc));
        id
    }

    fn release_target(&mut self, target: TargetId) {
        if self.targets.remove(&target).is_none() {
            log::warn!("Release of unknown target {:?}", target);
            return;
        }
        if self.active == Some(target) {
            self.active = None;
        }
    }

    fn active_surface(&self) -> Option<TargetId> {
        self.active
    }

    fn set_active_surface(&mut self, target: Option<TargetId>) {
        self.active = target;
    }
}

impl DepthPass for WgpuShadowBackend {
    fn render_depth(&mut self, camera: &ShadowCamera, casters: CasterFilter) {
        let Some(target_id) = self.active_of_kind(TargetKind::Depth) else {
            return;
        };

        let draws: Vec<(usize, CasterUniform)> = self
            .casters
            .iter()
            .enumerate()
            .filter_map(|(index, caster)| {
                match classify(caster.layer, caster.transparent, camera.culling_mask, casters) {
                    CasterDraw::Skip => None,
                    CasterDraw::Solid => Some((index, CasterUniform::new(camera, caster.model, false))),
                    CasterDraw::Dithered => {
                        Some((index, CasterUniform::new(camera, caster.model, true)))
                    }
                }
            })
            .collect();

        self.depth.reserve(&self.device, draws.len());
        let stride = self.depth.stride as usize;
        if !draws.is_empty() {
            let mut bytes = vec![0u8; stride * draws.len()];
            for (slot, (_, uniform)) in draws.iter().enumerate() {
                let start = slot * stride;
                bytes[start..start + mem::size_of::<CasterUniform>()]
                    .copy_from_slice(bytemuck::bytes_of(uniform));
            }
            self.queue.write_buffer(&self.depth.buffer, 0, &bytes);
        }

        let Some(target) = self.targets.get(&target_id) else {
            return;
        };
        let Some(depth_view) = target.depth_view.as_ref() else {
            return;
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("VsmDepthEncoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("VsmDepthPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(NOTHING_DRAWN),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.depth.pipeline);
            for (slot, (index, _)) in draws.iter().enumerate() {
                let mesh = &self.casters[*index].mesh;
                pass.set_bind_group(0, &self.depth.bind_group, &[(slot * stride) as u32]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
                pass.set_index_buffer(mesh.index_buffer().slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count(), 0, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

impl MomentEncoder for WgpuShadowBackend {
    fn encode(&mut self, source: Option<TargetId>, band: AtlasBand, mode: MomentMode, texel: Vec2) {
        let Some(destination_id) = self.active_of_kind(TargetKind::Moments) else {
            return;
        };
        let Some(destination) = self.targets.get(&destination_id) else {
            return;
        };

        let source = match source.map(|id| (id, self.targets.get(&id))) {
            None => &self.empty_source,
            Some((_, Some(target))) if target.desc.kind == TargetKind::Depth => target,
            Some((id, _)) => {
                log::warn!("Encode source {:?} is not a depth target, using empty source", id);
                &self.empty_source
            }
        };

        let (start, end) = band.rows(destination.desc.height);
        if end <= start {
            log::warn!("Empty atlas band {:?}, encode ignored", band);
            return;
        }

        let uniform = EncodeUniform::new(texel, mode == MomentMode::Squared);
        self.queue
            .write_buffer(&self.encode.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VsmEncodeBindGroup"),
            layout: &self.encode.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.encode.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&source.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("VsmEncodeEncoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("VsmEncodePass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &destination.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_viewport(
                0.0,
                start as f32,
                destination.desc.width as f32,
                (end - start) as f32,
                0.0,
                1.0,
            );
            pass.set_pipeline(&self.encode.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::casters::CasterMesh;
    use crate::settings::ShadowSettings;
    use crate::shadow::params::ParameterStore;
    use crate::shadow::scheduler::CascadedShadows;
    use glam::{Mat4, Vec3};
    use std::sync::Arc;

    #[test]
    fn caster_slots_respect_offset_alignment() {
        assert_eq!(align_to(208, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(300, 256), 512);
        assert_eq!(align_to(208, 0), 208);
    }

    #[test]
    fn filter_modes_map_to_wgpu() {
        assert_eq!(filter(FilterMode::Point), wgpu::FilterMode::Nearest);
        assert_eq!(filter(FilterMode::Bilinear), wgpu::FilterMode::Linear);
    }

    // Needs a GPU adapter.
    #[test]
    #[ignore]
    fn full_sweep_on_device() {
        let Ok(mut backend) = pollster::block_on(WgpuShadowBackend::request_headless()) else {
            return;
        };
        let mesh = Arc::new(CasterMesh::cuboid(backend.device(), Vec3::splat(1.0)));
        for i in 0..20 {
            let model = Mat4::from_translation(Vec3::new(i as f32 * 3.0, 0.0, 0.0));
            backend.add_caster(ShadowCaster::opaque(mesh.clone(), model));
        }

        let settings = ShadowSettings {
            resolution: 64,
            cascade_count: 3,
            follow_reference: false,
            ..ShadowSettings::default()
        };
        let mut shadows = CascadedShadows::new(backend, ParameterStore::new(), settings);
        assert!(shadows.update_full());

        let targets = shadows.debug_targets();
        let linear = targets.current.unwrap().linear.id;
        assert!(shadows.backend().view(linear).is_some());
        assert_eq!(shadows.backend().live_targets(), 3);
    }
}
