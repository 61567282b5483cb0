//! wgpu rendering engine
//!
//! Samples up to four plane textures, converts to RGB with the picture's
//! decode matrix, applies the user color adjustments and draws into the
//! destination rectangle of the target. Subpicture overlays are drawn on
//! top with premultiplied alpha blending.

use wgpu::util::DeviceExt;

use crate::gpu::wgpu_backend::{WgpuGpu, WgpuPlaneTexture, WgpuTarget};
use crate::gpu::{Image, Rect, RenderTarget, Renderer};
use crate::settings::{ColorAdjust, RenderParams, ScalerKind, ToneMapping};
use crate::video::colorspace::{ColorRepr, DecodeTransform};
use crate::video::Chroma;

// ═══════════════════════════════════════════════════════════════════════════════
// SHADER PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// How the fragment shader interprets the bound planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    /// Y, Cb, Cr in separate planes (plus optional alpha)
    Planar = 0,
    /// Y plane and an interleaved CbCr plane
    SemiPlanar = 1,
    /// A single packed RGBA plane
    Packed = 2,
    /// Luma only
    Gray = 3,
}

impl DrawMode {
    pub fn for_chroma(chroma: Chroma) -> Self {
        match chroma {
            Chroma::Rgba | Chroma::Bgra => DrawMode::Packed,
            Chroma::Nv12 => DrawMode::SemiPlanar,
            Chroma::Gray8 => DrawMode::Gray,
            _ => DrawMode::Planar,
        }
    }

    /// Number of planes the shader samples in this mode
    pub fn required_planes(self) -> usize {
        match self {
            DrawMode::Planar => 3,
            DrawMode::SemiPlanar => 2,
            DrawMode::Packed | DrawMode::Gray => 1,
        }
    }
}

/// Uniform block shared by video and overlay draws
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PlaneUniforms {
    /// Decode matrix rows, xyz used
    pub matrix: [[f32; 4]; 3],
    /// Decode offset, xyz used
    pub offset: [f32; 4],
    /// UV shift of plane 1 (xy) and plane 2 (zw)
    pub chroma_shift: [f32; 4],
    /// UV shift of the alpha plane (xy)
    pub alpha_shift: [f32; 4],
    /// Sampled source area in normalized coordinates: u0, v0, u1, v1
    pub src_rect: [f32; 4],
    /// Brightness, contrast, saturation, gamma
    pub adjust: [f32; 4],
    /// Hue, draw mode, has alpha plane, target is sRGB
    pub misc: [f32; 4],
}

impl PlaneUniforms {
    pub fn new(
        mode: DrawMode,
        transform: &DecodeTransform,
        adjust: &ColorAdjust,
        src_rect: [f32; 4],
        output_srgb: bool,
    ) -> Self {
        let row = |r: usize| {
            [
                transform.matrix[r][0],
                transform.matrix[r][1],
                transform.matrix[r][2],
                0.0,
            ]
        };
        Self {
            matrix: [row(0), row(1), row(2)],
            offset: [transform.offset[0], transform.offset[1], transform.offset[2], 0.0],
            chroma_shift: [0.0; 4],
            alpha_shift: [0.0; 4],
            src_rect,
            adjust: [
                adjust.brightness,
                adjust.contrast,
                adjust.saturation,
                adjust.gamma.max(0.01),
            ],
            misc: [adjust.hue, mode as u32 as f32, 0.0, if output_srgb { 1.0 } else { 0.0 }],
        }
    }

    /// Parameters for drawing an RGBA overlay bitmap as-is
    pub fn overlay(src_rect: [f32; 4], output_srgb: bool) -> Self {
        let identity = ColorRepr {
            system: crate::video::colorspace::ColorSystem::Rgb,
            levels: crate::video::colorspace::ColorLevels::Pc,
            alpha: crate::video::colorspace::AlphaMode::Premultiplied,
            sample_depth: 8,
            color_depth: 8,
        }
        .decode_transform();
        Self::new(
            DrawMode::Packed,
            &identity,
            &ColorAdjust::default(),
            src_rect,
            output_srgb,
        )
    }
}

/// Clip `dst` to the target and shrink the sampled area to match
///
/// `src` is normalized u0, v0, u1, v1. Returns the visible viewport and
/// the part of the source that lands in it, `None` when nothing shows.
pub fn visible_mapping(dst: Rect, target_width: u32, target_height: u32, src: [f32; 4]) -> Option<(Rect, [f32; 4])> {
    let bounds = Rect::new(0, 0, target_width as i32, target_height as i32);
    let visible = dst.intersect(&bounds)?;

    let dw = dst.width() as f32;
    let dh = dst.height() as f32;
    let su = src[2] - src[0];
    let sv = src[3] - src[1];
    let mapped = [
        src[0] + (visible.x0 - dst.x0) as f32 / dw * su,
        src[1] + (visible.y0 - dst.y0) as f32 / dh * sv,
        src[0] + (visible.x1 - dst.x0) as f32 / dw * su,
        src[1] + (visible.y1 - dst.y0) as f32 / dh * sv,
    ];
    Some((visible, mapped))
}

/// Filter for scaling `src` pixels onto `dst` pixels
pub fn select_scaler(params: &RenderParams, src: Rect, dst: Rect) -> ScalerKind {
    let upscaling = dst.width() as i64 * dst.height() as i64 >= src.width() as i64 * src.height() as i64;
    if upscaling {
        params.upscaler
    } else {
        params.downscaler
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

struct Pipeline {
    format: wgpu::TextureFormat,
    pipeline: wgpu::RenderPipeline,
}

/// Draws uploaded pictures onto swapchain targets
pub struct WgpuRenderer {
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipeline: Option<Pipeline>,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    /// Bound to plane slots the current mode does not use
    dummy_view: wgpu::TextureView,
    warned_unsupported: bool,
}

impl WgpuRenderer {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Vout Plane Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/yuv_planes.wgsl").into()),
        });

        let sampler = |label: &str, filter: wgpu::FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("Vout Linear Sampler", wgpu::FilterMode::Linear);
        let nearest_sampler = sampler("Vout Nearest Sampler", wgpu::FilterMode::Nearest);

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Vout Plane Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
                texture_entry(5),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Vout Plane Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let dummy = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Vout Dummy Plane"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let dummy_view = dummy.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            shader,
            bind_group_layout,
            pipeline_layout,
            pipeline: None,
            linear_sampler,
            nearest_sampler,
            dummy_view,
            warned_unsupported: false,
        }
    }

    fn ensure_pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) {
        if self.pipeline.as_ref().is_some_and(|p| p.format == format) {
            return;
        }
        tracing::debug!(?format, "Creating plane pipeline");

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Vout Plane Pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        self.pipeline = Some(Pipeline { format, pipeline });
    }

    fn warn_unsupported(&mut self, params: &RenderParams) {
        if self.warned_unsupported {
            return;
        }
        if params.deband || params.sigmoidize || params.dither || params.peak_detect || params.tone_mapping != ToneMapping::Auto {
            tracing::warn!(
                deband = params.deband,
                sigmoidize = params.sigmoidize,
                dither = params.dither,
                peak_detect = params.peak_detect,
                tone_mapping = ?params.tone_mapping,
                "Render options not available in this renderer, ignoring"
            );
            self.warned_unsupported = true;
        }
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        uniforms: &PlaneUniforms,
        sampler: &wgpu::Sampler,
        views: [&wgpu::TextureView; 4],
    ) -> wgpu::BindGroup {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vout Plane Uniforms"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Vout Plane Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(views[1]),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(views[2]),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(views[3]),
                },
            ],
        })
    }

    fn video_draw(
        &self,
        device: &wgpu::Device,
        image: &Image<'_, WgpuPlaneTexture>,
        src_uv: [f32; 4],
        sampler: &wgpu::Sampler,
        params: &RenderParams,
        output_srgb: bool,
    ) -> Option<wgpu::BindGroup> {
        let mode = DrawMode::for_chroma(image.chroma);
        if image.planes.len() < mode.required_planes() {
            tracing::error!(
                chroma = ?image.chroma,
                planes = image.planes.len(),
                "Image is missing planes"
            );
            return None;
        }

        let mut uniforms = PlaneUniforms::new(
            mode,
            &image.repr.decode_transform(),
            &params.color,
            src_uv,
            output_srgb,
        );

        let uv_shift = |i: usize| {
            image.planes.get(i).map_or([0.0, 0.0], |p| {
                [
                    p.shift_x / p.texture.width.max(1) as f32,
                    p.shift_y / p.texture.height.max(1) as f32,
                ]
            })
        };
        let [s1x, s1y] = uv_shift(1);
        let [s2x, s2y] = match mode {
            DrawMode::Planar => uv_shift(2),
            _ => [0.0, 0.0],
        };
        uniforms.chroma_shift = [s1x, s1y, s2x, s2y];

        let has_alpha = mode == DrawMode::Planar && image.planes.len() > 3;
        if has_alpha {
            let [ax, ay] = uv_shift(3);
            uniforms.alpha_shift = [ax, ay, 0.0, 0.0];
            uniforms.misc[2] = 1.0;
        }

        let view = |i: usize| image.planes.get(i).map_or(&self.dummy_view, |p| &p.texture.view);
        let views = match mode {
            DrawMode::Planar => [view(0), view(1), view(2), if has_alpha { view(3) } else { &self.dummy_view }],
            DrawMode::SemiPlanar => [view(0), view(1), &self.dummy_view, &self.dummy_view],
            DrawMode::Packed | DrawMode::Gray => [view(0), &self.dummy_view, &self.dummy_view, &self.dummy_view],
        };

        Some(self.bind_group(device, &uniforms, sampler, views))
    }
}

impl Renderer<WgpuGpu> for WgpuRenderer {
    fn render(
        &mut self,
        gpu: &WgpuGpu,
        image: &Image<'_, WgpuPlaneTexture>,
        target: &RenderTarget<'_, WgpuTarget>,
        params: &RenderParams,
    ) -> bool {
        let ctx = gpu.context();
        let device = &ctx.device;
        self.warn_unsupported(params);

        if image.width == 0 || image.height == 0 || image.src_rect.width() <= 0 || image.src_rect.height() <= 0 {
            tracing::error!("Cannot render an empty image");
            return false;
        }

        let (w, h) = (image.width as f32, image.height as f32);
        let src_uv = [
            image.src_rect.x0 as f32 / w,
            image.src_rect.y0 as f32 / h,
            image.src_rect.x1 as f32 / w,
            image.src_rect.y1 as f32 / h,
        ];

        self.ensure_pipeline(device, target.fbo.format);
        let output_srgb = target.fbo.format.is_srgb();
        let sampler = match select_scaler(params, image.src_rect, target.dst_rect) {
            ScalerKind::Nearest => &self.nearest_sampler,
            ScalerKind::Bilinear => &self.linear_sampler,
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut draws: Vec<(Rect, wgpu::BindGroup, Option<wgpu::Texture>)> = Vec::new();
        if let Some((viewport, uv)) = visible_mapping(target.dst_rect, target.width, target.height, src_uv) {
            match self.video_draw(device, image, uv, sampler, params, output_srgb) {
                Some(bind_group) => draws.push((viewport, bind_group, None)),
                None => {
                    let _ = pollster::block_on(device.pop_error_scope());
                    return false;
                }
            }
        }

        for overlay in target.overlays {
            let Some((viewport, uv)) = visible_mapping(overlay.rect, target.width, target.height, [0.0, 0.0, 1.0, 1.0]) else {
                continue;
            };
            let size = wgpu::Extent3d {
                width: overlay.width,
                height: overlay.height,
                depth_or_array_layers: 1,
            };
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Vout Overlay Texture"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            ctx.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &overlay.rgba,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(overlay.width * 4),
                    rows_per_image: Some(overlay.height),
                },
                size,
            );
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let uniforms = PlaneUniforms::overlay(uv, output_srgb);
            let bind_group = self.bind_group(
                device,
                &uniforms,
                &self.linear_sampler,
                [&view, &self.dummy_view, &self.dummy_view, &self.dummy_view],
            );
            draws.push((viewport, bind_group, Some(texture)));
        }

        if let Some(pipeline) = self.pipeline.as_ref() {
            ctx.with_encoder(|encoder| {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Vout Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.fbo.view,
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
                pass.set_pipeline(&pipeline.pipeline);
                for (rect, bind_group, _) in &draws {
                    pass.set_viewport(
                        rect.x0 as f32,
                        rect.y0 as f32,
                        rect.width() as f32,
                        rect.height() as f32,
                        0.0,
                        1.0,
                    );
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.draw(0..3, 0..1);
                }
            });
        }

        match pollster::block_on(device.pop_error_scope()) {
            Some(e) => {
                tracing::error!("Render failed: {}", e);
                false
            }
            None => true,
        }
    }
}
