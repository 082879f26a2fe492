// renderer.rs — wgpu 渲染后端：球体网格 + 全景纹理，窗口与离屏两种目标

use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};

use image::{Rgba, RgbImage, RgbaImage};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{PanoramaError, Result};
use crate::export::FrameRenderer;
use crate::mesh::{self, Vertex};
use crate::projector::ViewProjection;

pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniform {
    projection: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
}

impl From<&ViewProjection> for CameraUniform {
    fn from(camera: &ViewProjection) -> Self {
        Self {
            projection: camera.proj.to_cols_array_2d(),
            view: camera.view.to_cols_array_2d(),
        }
    }
}

/// Fit a panorama into the GPU texture limit and pad short images to 2:1.
///
/// Images shorter than `width / 2` are placed at the bottom of a black
/// canvas so the missing sky samples as black.
pub fn prepare_panorama(img: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    let img = if src_w > max_dimension || src_h > max_dimension {
        let scale = max_dimension as f32 / src_w.max(src_h) as f32;
        let new_w = ((src_w as f32 * scale) as u32).max(1);
        let new_h = ((src_h as f32 * scale) as u32).max(1);
        log::warn!(
            "panorama {src_w}x{src_h} exceeds GPU limit {max_dimension}, scaled to {new_w}x{new_h}"
        );
        image::imageops::resize(&img, new_w, new_h, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let (w, h) = img.dimensions();
    let target_h = w / 2;
    if target_h > 0 && h < target_h {
        let mut canvas = RgbaImage::from_pixel(w, target_h, Rgba([0, 0, 0, 255]));
        image::imageops::replace(&mut canvas, &img, 0, i64::from(target_h - h));
        canvas
    } else {
        img
    }
}

/// Sphere mesh, panorama texture and the bind group layouts shared by every
/// render target.
pub struct PanoramaScene {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    camera_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    texture: wgpu::Texture,
    texture_bind_group: wgpu::BindGroup,
    texture_size: (u32, u32),
}

impl PanoramaScene {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue, image: &RgbaImage) -> Self {
        let sphere = mesh::build_sphere(mesh::SPHERE_RADIUS, mesh::LAT_SEGMENTS, mesh::LON_SEGMENTS);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sphere_vertices"),
            contents: bytemuck::cast_slice(&sphere.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sphere_indices"),
            contents: bytemuck::cast_slice(&sphere.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("camera_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat, // 经度方向循环
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let (texture, texture_bind_group) =
            create_panorama_texture(device, &texture_layout, &sampler, image.dimensions());
        let mut scene = Self {
            vertex_buffer,
            index_buffer,
            index_count: sphere.index_count(),
            camera_layout,
            texture_layout,
            sampler,
            texture,
            texture_bind_group,
            texture_size: image.dimensions(),
        };
        scene.write_texture(queue, image);
        scene
    }

    /// Replace the panorama. Same-sized frames (video) reuse the texture.
    fn set_image(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, image: &RgbaImage) {
        if image.dimensions() != self.texture_size {
            let (texture, bind_group) =
                create_panorama_texture(device, &self.texture_layout, &self.sampler, image.dimensions());
            self.texture = texture;
            self.texture_bind_group = bind_group;
            self.texture_size = image.dimensions();
        }
        self.write_texture(queue, image);
    }

    fn write_texture(&self, queue: &wgpu::Queue, image: &RgbaImage) {
        let (width, height) = image.dimensions();
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

fn create_panorama_texture(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    (width, height): (u32, u32),
) -> (wgpu::Texture, wgpu::BindGroup) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("panorama_texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("panorama_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    });
    (texture, bind_group)
}

/// Device, queue and the loaded scene. Exactly one exists per process.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    scene: PanoramaScene,
}

impl GpuContext {
    pub async fn new(adapter: &wgpu::Adapter, panorama: RgbaImage) -> Result<Self> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("panorama_device"),
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| PanoramaError::GraphicsSetup(e.to_string()))?;

        let image = prepare_panorama(panorama, device.limits().max_texture_dimension_2d);
        let scene = PanoramaScene::new(&device, &queue, &image);
        Ok(Self {
            device,
            queue,
            scene,
        })
    }

    pub fn upload_panorama(&mut self, panorama: RgbaImage) {
        let image = prepare_panorama(panorama, self.device.limits().max_texture_dimension_2d);
        self.scene.set_image(&self.device, &self.queue, &image);
    }
}

/// Shared home of the single graphics context.
///
/// The render loop borrows it briefly each frame through [`ContextSlot::with`];
/// an export takes it out for its whole run through [`ContextSlot::lease`].
pub struct ContextSlot<T = GpuContext> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for ContextSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ContextSlot<T> {
    pub fn new(ctx: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(ctx))),
        }
    }

    pub fn is_leased(&self) -> bool {
        self.lock().is_none()
    }

    /// Run `f` on the context unless it is leased out.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }

    /// Move the context out for the duration of `f`. It goes back into the
    /// slot when `f` returns, fails or panics.
    pub fn lease<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut lease = Lease {
            home: &self.inner,
            ctx: self.lock().take(),
        };
        match lease.ctx.as_mut() {
            Some(ctx) => f(ctx),
            None => Err(PanoramaError::ExportAlreadyInProgress),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        lock_slot(&self.inner)
    }
}

fn lock_slot<T>(slot: &Mutex<Option<T>>) -> MutexGuard<'_, Option<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Lease<'a, T> {
    home: &'a Mutex<Option<T>>,
    ctx: Option<T>,
}

impl<T> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            *lock_slot(self.home) = Some(ctx);
        }
    }
}

/// Pipeline, camera uniform and depth buffer for one color target.
struct ScenePass {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    depth_view: wgpu::TextureView,
}

impl ScenePass {
    async fn new(ctx: &GpuContext, format: wgpu::TextureFormat, width: u32, height: u32) -> Result<Self> {
        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::include_wgsl!("shader.wgsl"));
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("panorama_pipeline_layout"),
            bind_group_layouts: &[&ctx.scene.camera_layout, &ctx.scene.texture_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("panorama_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[Vertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // 球内（透视）和球外（小行星 / 水晶球）都要看到
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        if let Some(err) = device.pop_error_scope().await {
            log::error!("shader/pipeline creation failed: {err}");
            return Err(PanoramaError::GraphicsSetup(err.to_string()));
        }

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("camera_buffer"),
            size: std::mem::size_of::<CameraUniform>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera_bind_group"),
            layout: &ctx.scene.camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        Ok(Self {
            pipeline,
            camera_buffer,
            camera_bind_group,
            depth_view: create_depth_view(device, width, height),
        })
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.depth_view = create_depth_view(device, width, height);
    }

    fn record(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        camera: &ViewProjection,
    ) {
        ctx.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[CameraUniform::from(camera)]),
        );

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("panorama_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: true,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: false,
                }),
                stencil_ops: None,
            }),
        });

        let scene = &ctx.scene;
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, &scene.texture_bind_group, &[]);
        pass.set_vertex_buffer(0, scene.vertex_buffer.slice(..));
        pass.set_index_buffer(scene.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..scene.index_count, 0, 0..1);
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

/// Interactive window target with the egui overlay.
pub struct Renderer {
    surface: wgpu::Surface,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,
    slot: ContextSlot,
    pass: ScenePass,
    /// Resize arrived while the context was leased.
    surface_dirty: bool,

    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Renderer {
    pub async fn new(window: Arc<Window>, panorama: RgbaImage, vsync: bool) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // SAFETY: the window is kept alive by the event loop for the renderer's lifetime.
        let surface = unsafe { instance.create_surface(window.as_ref()) }
            .map_err(|e| PanoramaError::GraphicsSetup(e.to_string()))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| PanoramaError::GraphicsSetup("no suitable GPU adapter".into()))?;
        log::info!("using adapter {:?}", adapter.get_info().name);

        let ctx = GpuContext::new(&adapter, panorama).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| PanoramaError::GraphicsSetup("surface reports no formats".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&ctx.device, &config);

        let pass = ScenePass::new(&ctx, format, config.width, config.height).await?;

        let egui_ctx = egui::Context::default();
        let mut egui_state = egui_winit::State::new(window.as_ref());
        egui_state.set_pixels_per_point(window.scale_factor() as f32);
        let egui_renderer = egui_wgpu::Renderer::new(&ctx.device, format, None, 1);

        Ok(Self {
            surface,
            config,
            size,
            slot: ContextSlot::new(ctx),
            pass,
            surface_dirty: false,
            egui_ctx,
            egui_state,
            egui_renderer,
        })
    }

    /// Handle to the graphics context for exports.
    pub fn context_slot(&self) -> ContextSlot {
        self.slot.clone()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface_dirty = true;
        let slot = self.slot.clone();
        slot.with(|ctx| self.apply_surface_config(ctx));
    }

    fn apply_surface_config(&mut self, ctx: &GpuContext) {
        self.surface.configure(&ctx.device, &self.config);
        self.pass.resize(&ctx.device, self.config.width, self.config.height);
        self.surface_dirty = false;
    }

    /// Reconfigure after `SurfaceError::Lost`.
    pub fn reconfigure(&mut self) {
        self.resize(self.size);
    }

    /// Upload a new panorama frame. Skipped while an export holds the context.
    pub fn upload_panorama(&mut self, panorama: RgbaImage) -> bool {
        self.slot.with(|ctx| ctx.upload_panorama(panorama)).is_some()
    }

    /// Draw the scene and the overlay. Returns `Ok(false)` when the frame
    /// was skipped because an export holds the graphics context.
    pub fn render_with_ui(
        &mut self,
        window: &Window,
        camera: &ViewProjection,
        run_ui: impl FnOnce(&egui::Context),
    ) -> std::result::Result<bool, wgpu::SurfaceError> {
        let slot = self.slot.clone();
        match slot.with(|ctx| self.draw(ctx, window, camera, run_ui)) {
            Some(result) => result.map(|()| true),
            None => {
                log::trace!("graphics context leased to export, frame skipped");
                Ok(false)
            }
        }
    }

    fn draw(
        &mut self,
        ctx: &GpuContext,
        window: &Window,
        camera: &ViewProjection,
        run_ui: impl FnOnce(&egui::Context),
    ) -> std::result::Result<(), wgpu::SurfaceError> {
        if self.surface_dirty {
            self.apply_surface_config(ctx);
        }

        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });

        self.pass.record(ctx, &mut encoder, &view, camera);

        let raw_input = self.egui_state.take_egui_input(window);
        let full_output = self.egui_ctx.run(raw_input, run_ui);
        self.egui_state
            .handle_platform_output(window, &self.egui_ctx, full_output.platform_output);
        let clipped_primitives = self.egui_ctx.tessellate(full_output.shapes);
        let screen_descriptor = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&ctx.device, &ctx.queue, *id, delta);
        }
        self.egui_renderer.update_buffers(
            &ctx.device,
            &ctx.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer
                .render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

/// Bytes per row of a readback buffer, rounded up to wgpu's copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Drop row padding and alpha from a mapped RGBA readback.
pub fn rgba_rows_to_rgb(data: &[u8], width: u32, height: u32, padded_row: u32) -> Result<RgbImage> {
    let row_bytes = 4 * width as usize;
    let padded_row = padded_row as usize;
    if padded_row < row_bytes || data.len() < padded_row * height as usize {
        return Err(PanoramaError::Encode(format!(
            "readback holds {} bytes, expected {}",
            data.len(),
            padded_row * height as usize
        )));
    }

    let mut rgb = Vec::with_capacity(3 * width as usize * height as usize);
    for row in data.chunks(padded_row).take(height as usize) {
        for px in row[..row_bytes].chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| PanoramaError::Encode("readback size mismatch".into()))
}

/// Offscreen color + depth target at the export resolution, read back after
/// every frame.
pub struct OffscreenRenderer<'a> {
    ctx: &'a GpuContext,
    pass: ScenePass,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
}

impl<'a> OffscreenRenderer<'a> {
    pub fn new(ctx: &'a GpuContext, width: u32, height: u32) -> Result<Self> {
        let max = ctx.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            log::error!("cannot build {width}x{height} export target (limit {max})");
            return Err(PanoramaError::FramebufferIncomplete(format!(
                "{width}x{height} is outside 1..={max}"
            )));
        }

        let pass = pollster::block_on(ScenePass::new(ctx, TEXTURE_FORMAT, width, height))?;

        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let color = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("export_color"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let padded_row = padded_bytes_per_row(width);
        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("export_readback"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            log::error!("export target creation failed: {err}");
            return Err(PanoramaError::FramebufferIncomplete(err.to_string()));
        }

        Ok(Self {
            ctx,
            pass,
            color,
            color_view,
            readback,
            width,
            height,
            padded_row,
        })
    }

    fn read_back(&self) -> Result<RgbImage> {
        let slice = self.readback.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.ctx.device.poll(wgpu::Maintain::Wait);

        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PanoramaError::Encode(format!("readback failed: {e}"))),
            Err(_) => return Err(PanoramaError::Encode("readback was never mapped".into())),
        }

        let image = {
            let data = slice.get_mapped_range();
            rgba_rows_to_rgb(&data, self.width, self.height, self.padded_row)
        };
        self.readback.unmap();
        image
    }
}

impl FrameRenderer for OffscreenRenderer<'_> {
    fn render(&mut self, camera: &ViewProjection) -> Result<RgbImage> {
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("export_encoder"),
            });
        self.pass.record(self.ctx, &mut encoder, &self.color_view, camera);
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.read_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1920), 7680);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_readback_strips_padding_and_alpha() {
        let (w, h) = (2u32, 2u32);
        let padded = padded_bytes_per_row(w);
        let mut data = vec![0xEEu8; (padded * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let i = (y * padded + x * 4) as usize;
                data[i..i + 4].copy_from_slice(&[x as u8, y as u8, 7, 255]);
            }
        }
        let img = rgba_rows_to_rgb(&data, w, h, padded).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 0), &image::Rgb([1, 0, 7]));
        assert_eq!(img.get_pixel(0, 1), &image::Rgb([0, 1, 7]));
    }

    #[test]
    fn test_short_readback_is_encode_error() {
        let err = rgba_rows_to_rgb(&[0; 16], 2, 2, 256).unwrap_err();
        assert!(matches!(err, PanoramaError::Encode(_)));
    }

    #[test]
    fn test_prepare_pads_short_panorama() {
        let img = RgbaImage::from_pixel(8, 2, Rgba([9, 9, 9, 255]));
        let out = prepare_panorama(img, 4096);
        assert_eq!(out.dimensions(), (8, 4));
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(out.get_pixel(0, 3), &Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn test_prepare_scales_to_limit() {
        let img = RgbaImage::new(64, 32);
        let out = prepare_panorama(img, 16);
        assert_eq!(out.dimensions(), (16, 8));
    }

    #[test]
    fn test_lease_moves_context_out_and_back() {
        let slot = ContextSlot::new(7u32);
        let seen = slot
            .lease(|ctx| {
                assert!(slot.is_leased());
                assert_eq!(slot.with(|c| *c), None);
                *ctx += 1;
                Ok(*ctx)
            })
            .unwrap();
        assert_eq!(seen, 8);
        assert!(!slot.is_leased());
        assert_eq!(slot.with(|c| *c), Some(8));
    }

    #[test]
    fn test_lease_returns_context_on_failure() {
        let slot = ContextSlot::new(1u32);
        let err = slot
            .lease(|_| -> Result<()> { Err(PanoramaError::Encode("boom".into())) })
            .unwrap_err();
        assert!(matches!(err, PanoramaError::Encode(_)));
        assert_eq!(slot.with(|c| *c), Some(1));
    }

    #[test]
    fn test_nested_lease_is_rejected() {
        let slot = ContextSlot::new(0u32);
        let inner = slot.lease(|_| Ok(slot.lease(|_| Ok(()))));
        assert!(matches!(inner, Ok(Err(PanoramaError::ExportAlreadyInProgress))));
    }

    #[test]
    fn test_lease_survives_panic() {
        let slot = ContextSlot::new(3u32);
        let worker = slot.clone();
        let joined = std::thread::spawn(move || {
            let _ = worker.lease(|_| -> Result<()> { panic!("export crashed") });
        })
        .join();
        assert!(joined.is_err());
        assert_eq!(slot.with(|c| *c), Some(3));
    }
}
