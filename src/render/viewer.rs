use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wgpu::SurfaceError;
use wgpu::util::DeviceExt;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId, WindowLevel},
};

use crate::config::{CanvasSize, Configuration};
use crate::events::EngineCommand;
use crate::media::MediaDecoderFactory;
use crate::processing::convert::PresentationBuffer;
use crate::scheduler::{LatestFrame, PlaybackScheduler};

#[derive(Debug)]
pub enum ViewerEvent {
    Command(EngineCommand),
    Cancelled,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

const QUAD: [Vertex; 4] = [
    Vertex {
        pos: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    Vertex {
        pos: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    Vertex {
        pos: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    Vertex {
        pos: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
];

/// Canvas size for the session: configured, else monitor, else window.
pub fn resolve_canvas(
    configured: Option<CanvasSize>,
    monitor: Option<PhysicalSize<u32>>,
    window: PhysicalSize<u32>,
) -> CanvasSize {
    if let Some(canvas) = configured {
        return canvas;
    }
    let size = monitor
        .filter(|m| m.width > 0 && m.height > 0)
        .unwrap_or(window);
    CanvasSize {
        width: size.width.max(1),
        height: size.height.max(1),
    }
}

struct CanvasTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl CanvasTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("canvas"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    fn write(&self, queue: &wgpu::Queue, buffer: &PresentationBuffer) {
        queue.write_texture(
            self.texture.as_image_copy(),
            &buffer.pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * buffer.width),
                rows_per_image: Some(buffer.height),
            },
            wgpu::Extent3d {
                width: buffer.width,
                height: buffer.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

struct Gpu {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bind_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    vbuf: wgpu::Buffer,
    canvas: CanvasTexture,
}

impl Gpu {
    fn new(window: Arc<Window>, canvas: CanvasSize) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to acquire GPU adapter")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no texture formats")?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("wallpaper-device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        }))
        .context("failed to acquire GPU device")?;

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            "wallpaper surface configured",
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("canvas-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let vbuf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("backdrop-shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                "shaders/backdrop.wgsl"
            ))),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("canvas-bind-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
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

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("backdrop-pipeline-layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("backdrop-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        let canvas = CanvasTexture::new(&device, canvas.width, canvas.height);
        let bind_group = make_bind_group(&device, &bind_layout, &canvas.view, &sampler);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            pipeline,
            bind_layout,
            bind_group,
            sampler,
            vbuf,
            canvas,
        })
    }

    fn upload(&mut self, buffer: &PresentationBuffer) {
        if (buffer.width, buffer.height) != (self.canvas.width, self.canvas.height) {
            debug!(
                width = buffer.width,
                height = buffer.height,
                "reallocating canvas texture"
            );
            self.canvas = CanvasTexture::new(&self.device, buffer.width, buffer.height);
            self.bind_group = make_bind_group(
                &self.device,
                &self.bind_layout,
                &self.canvas.view,
                &self.sampler,
            );
        }
        self.canvas.write(&self.queue, buffer);
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.config.width = size.width.max(1);
        self.config.height = size.height.max(1);
        self.surface.configure(&self.device, &self.config);
        debug!(
            width = self.config.width,
            height = self.config.height,
            "wallpaper surface resized"
        );
    }
}

fn make_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("canvas-bind-group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

struct WallpaperApp {
    cfg: Configuration,
    cancel: CancellationToken,
    initial: Option<PathBuf>,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    scheduler: Option<PlaybackScheduler<LatestFrame>>,
    queued: Vec<EngineCommand>,
}

impl WallpaperApp {
    fn new(cfg: Configuration, initial: Option<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            cfg,
            cancel,
            initial,
            window: None,
            gpu: None,
            scheduler: None,
            queued: Vec::new(),
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }
        let attrs = WindowAttributes::default()
            .with_title("live wallpaper")
            .with_decorations(false)
            .with_window_level(WindowLevel::AlwaysOnBottom)
            .with_fullscreen(Some(Fullscreen::Borderless(None)));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                window.set_cursor_visible(false);
                let window = Arc::new(window);
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create wallpaper window");
                None
            }
        }
    }

    fn start_engine(&mut self, window: &Window) -> Result<()> {
        let monitor = window.current_monitor().map(|m| m.size());
        let canvas = resolve_canvas(self.cfg.canvas, monitor, window.inner_size());
        info!(width = canvas.width, height = canvas.height, "canvas fixed for session");

        let mut gpu = Gpu::new(
            self.window.clone().context("window missing")?,
            canvas,
        )?;
        gpu.upload(&PresentationBuffer::solid(
            canvas.width,
            canvas.height,
            self.cfg.background_color,
        ));
        self.gpu = Some(gpu);

        let factory = Box::new(MediaDecoderFactory::new(self.cfg.decoder.clone()));
        let mut scheduler = PlaybackScheduler::new(factory, canvas, &self.cfg, LatestFrame::default());
        if let Some(path) = self.initial.take() {
            if let Err(err) = scheduler.apply(EngineCommand::Load(path)) {
                error!(error = %err, "initial background unavailable");
            }
        }
        for command in self.queued.drain(..) {
            if let Err(err) = scheduler.apply(command) {
                warn!(error = %err, "command failed");
            }
        }
        self.scheduler = Some(scheduler);
        Ok(())
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        let frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Outdated | SurfaceError::Lost | SurfaceError::Other) => {
                info!("wallpaper surface lost; reconfiguring");
                if let Some(window) = self.window.as_ref() {
                    gpu.resize(window.inner_size());
                }
                return;
            }
            Err(SurfaceError::OutOfMemory) => {
                error!("wallpaper surface out of memory; exiting event loop");
                event_loop.exit();
                return;
            }
            Err(SurfaceError::Timeout) => {
                warn!("wallpaper surface acquisition timed out");
                return;
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("wallpaper-encoder"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("wallpaper-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&gpu.pipeline);
            rpass.set_bind_group(0, &gpu.bind_group, &[]);
            rpass.set_vertex_buffer(0, gpu.vbuf.slice(..));
            rpass.draw(0..4, 0..1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match self.scheduler.as_mut() {
            Some(scheduler) => {
                if let Err(err) = scheduler.apply(command) {
                    warn!(error = %err, "command failed");
                }
            }
            None => self.queued.push(command),
        }
    }
}

impl ApplicationHandler<ViewerEvent> for WallpaperApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }
        let Some(window) = self.create_window(event_loop) else {
            event_loop.exit();
            return;
        };
        if self.scheduler.is_none() {
            if let Err(err) = self.start_engine(&window) {
                error!(error = ?err, "failed to start wallpaper engine");
                event_loop.exit();
                return;
            }
        }
        window.request_redraw();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("wallpaper window close requested");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Released => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        info!("escape pressed; exiting");
                        event_loop.exit();
                    }
                    PhysicalKey::Code(KeyCode::Space) => {
                        self.handle_command(EngineCommand::TogglePause);
                    }
                    _ => {}
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.resize(size);
                }
                window.request_redraw();
            }
            WindowEvent::RedrawRequested => self.draw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };

        scheduler.poll(Instant::now());
        if let Some(buffer) = scheduler.sink_mut().take() {
            if let Some(gpu) = self.gpu.as_mut() {
                gpu.upload(&buffer);
            }
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }

        match scheduler.next_wakeup() {
            Some(deadline) => event_loop.set_control_flow(ControlFlow::WaitUntil(deadline)),
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Command(command) => self.handle_command(command),
            ViewerEvent::Cancelled => {
                info!("wallpaper received cancellation event");
                event_loop.exit();
            }
        }
    }
}

/// Run the wallpaper window on the calling thread until it closes or
/// `cancel` fires. Must be called from within a tokio runtime.
pub fn run_windowed(
    cfg: Configuration,
    initial: Option<PathBuf>,
    mut commands: mpsc::Receiver<EngineCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build wallpaper event loop")?;
    let proxy = event_loop.create_proxy();

    let forward_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = proxy.send_event(ViewerEvent::Cancelled);
                        break;
                    }
                    Some(command) = commands.recv() => {
                        if proxy.send_event(ViewerEvent::Command(command)).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    };

    let mut app = WallpaperApp::new(cfg, initial, cancel);
    let run_result = event_loop.run_app(&mut app);
    forward_task.abort();

    run_result.context("wallpaper event loop failed")
}
