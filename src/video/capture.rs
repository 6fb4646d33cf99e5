//! Capture targets for frame export
//!
//! A capture target is an offscreen surface the render loop draws into
//! between `bind()` and `unbind()`. Its contents are copied back to the CPU
//! asynchronously through a small set of readback slots so the render loop
//! never waits on the GPU:
//!
//! 1. Tick N: copy the target into slot A and start mapping it
//! 2. Tick N+1: poll slot A (non-blocking), copy into slot B
//! 3. Tick N+2: read slot A if mapped, poll slot B, reuse slot A
//!
//! `RenderTarget` is the wgpu implementation. `MemoryTarget` is a CPU
//! framebuffer with a configurable readback latency for headless export.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Number of staging buffers used ping-pong
pub const READBACK_SLOTS: usize = 2;

/// Byte order of captured pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureFormat {
    #[default]
    Rgba8,
    Bgra8,
}

impl CaptureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        4
    }

    fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            CaptureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            CaptureFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        }
    }

    /// Swizzle packed pixels to RGBA in place
    pub fn to_rgba_in_place(self, pixels: &mut [u8]) {
        if self == CaptureFormat::Bgra8 {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
    }
}

/// Result of polling an asynchronous readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackStatus {
    /// Pixels were copied into the caller's buffer; the slot is free again
    Ready,
    /// Still in flight
    Pending,
    /// The readback failed or was never issued; the slot is free again
    Failed,
}

/// Offscreen surface the exporter reads frames from
pub trait CaptureTarget {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn pixel_format(&self) -> CaptureFormat;

    /// Make this the active render target
    fn bind(&mut self);

    fn unbind(&mut self);

    fn is_bound(&self) -> bool;

    /// Reallocate at a new size, dropping in-flight readbacks
    fn resize(&mut self, width: u32, height: u32);

    fn slot_count(&self) -> usize {
        READBACK_SLOTS
    }

    /// Start copying the current contents into `slot`. False if the slot is busy.
    fn begin_readback(&mut self, slot: usize) -> bool;

    /// Collect a readback into `out` as tightly packed rows.
    /// With `wait` the call blocks until the readback resolves.
    fn poll_readback(&mut self, slot: usize, out: &mut Vec<u8>, wait: bool) -> ReadbackStatus;

    /// Synchronous readback of the current contents
    fn read_pixels(&mut self, out: &mut Vec<u8>) -> bool;
}

/// Row pitch of a buffer copy, padded to wgpu's alignment
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strip row padding from a mapped buffer into `out`
fn unpad_rows(data: &[u8], padded: u32, unpadded: u32, height: u32, out: &mut Vec<u8>) {
    out.clear();
    if padded == unpadded {
        out.extend_from_slice(&data[..(unpadded * height) as usize]);
        return;
    }
    for row in 0..height {
        let start = (row * padded) as usize;
        out.extend_from_slice(&data[start..start + unpadded as usize]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    /// Free for a new copy
    Available,
    /// Copy submitted and `map_async` requested
    Mapping,
}

/// A staging buffer with its state
struct StagingBuffer {
    buffer: wgpu::Buffer,
    state: BufferState,
    /// Set by the map callback on success
    map_complete: Arc<AtomicBool>,
    /// Set by the map callback on failure
    map_failed: Arc<AtomicBool>,
}

impl StagingBuffer {
    fn reset_flags(&self) {
        self.map_complete.store(false, Ordering::Release);
        self.map_failed.store(false, Ordering::Release);
    }
}

/// wgpu render target with asynchronous readback
pub struct RenderTarget {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: CaptureFormat,
    width: u32,
    height: u32,
    /// Bytes per row in the staging buffers (with padding for wgpu alignment)
    bytes_per_row: u32,
    /// Bytes per row of pixel data
    unpadded_bytes_per_row: u32,
    staging_buffers: Vec<StagingBuffer>,
    bound: bool,
}

impl RenderTarget {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        width: u32,
        height: u32,
        format: CaptureFormat,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let (texture, view) = Self::create_texture(&device, width, height, format);
        let staging_buffers = Self::create_staging_buffers(&device, width, height);

        Self {
            device,
            queue,
            texture,
            view,
            format,
            width,
            height,
            bytes_per_row: padded_bytes_per_row(width),
            unpadded_bytes_per_row: width * 4,
            staging_buffers,
            bound: false,
        }
    }

    fn create_texture(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: CaptureFormat,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Capture Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.texture_format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_staging_buffers(device: &wgpu::Device, width: u32, height: u32) -> Vec<StagingBuffer> {
        let buffer_size = (padded_bytes_per_row(width) * height) as u64;

        (0..READBACK_SLOTS)
            .map(|i| StagingBuffer {
                buffer: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Capture Staging Buffer {}", i)),
                    size: buffer_size,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                }),
                state: BufferState::Available,
                map_complete: Arc::new(AtomicBool::new(false)),
                map_failed: Arc::new(AtomicBool::new(false)),
            })
            .collect()
    }

    /// View to render into while bound
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl CaptureTarget for RenderTarget {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_format(&self) -> CaptureFormat {
        self.format
    }

    fn bind(&mut self) {
        self.bound = true;
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn resize(&mut self, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.width && height == self.height {
            return;
        }

        // Let outstanding map callbacks fire before the buffers are dropped
        let _ = self.device.poll(wgpu::Maintain::Wait);

        let (texture, view) = Self::create_texture(&self.device, width, height, self.format);
        self.texture = texture;
        self.view = view;
        self.staging_buffers = Self::create_staging_buffers(&self.device, width, height);
        self.width = width;
        self.height = height;
        self.bytes_per_row = padded_bytes_per_row(width);
        self.unpadded_bytes_per_row = width * 4;

        tracing::debug!("Resized capture target to {}x{}", width, height);
    }

    fn begin_readback(&mut self, slot: usize) -> bool {
        let Some(staging) = self.staging_buffers.get_mut(slot) else {
            return false;
        };
        if staging.state != BufferState::Available {
            return false;
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Capture Readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        staging.reset_flags();
        let map_complete = staging.map_complete.clone();
        let map_failed = staging.map_failed.clone();
        staging
            .buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| match result {
                Ok(()) => map_complete.store(true, Ordering::Release),
                Err(_) => map_failed.store(true, Ordering::Release),
            });
        staging.state = BufferState::Mapping;
        true
    }

    fn poll_readback(&mut self, slot: usize, out: &mut Vec<u8>, wait: bool) -> ReadbackStatus {
        let Some(staging) = self.staging_buffers.get(slot) else {
            return ReadbackStatus::Failed;
        };
        if staging.state != BufferState::Mapping {
            return ReadbackStatus::Failed;
        }

        let maintain = if wait { wgpu::Maintain::Wait } else { wgpu::Maintain::Poll };
        let _ = self.device.poll(maintain);

        let staging = &mut self.staging_buffers[slot];
        if staging.map_failed.load(Ordering::Acquire) {
            tracing::warn!("Capture readback {} failed to map", slot);
            staging.state = BufferState::Available;
            staging.reset_flags();
            return ReadbackStatus::Failed;
        }
        if !staging.map_complete.load(Ordering::Acquire) {
            return ReadbackStatus::Pending;
        }

        {
            let data = staging.buffer.slice(..).get_mapped_range();
            unpad_rows(&data, self.bytes_per_row, self.unpadded_bytes_per_row, self.height, out);
        }
        staging.buffer.unmap();
        staging.state = BufferState::Available;
        staging.reset_flags();
        ReadbackStatus::Ready
    }

    fn read_pixels(&mut self, out: &mut Vec<u8>) -> bool {
        let Some(slot) = self
            .staging_buffers
            .iter()
            .position(|s| s.state == BufferState::Available)
        else {
            return false;
        };
        self.begin_readback(slot) && self.poll_readback(slot, out, true) == ReadbackStatus::Ready
    }
}

/// Readback in flight on a `MemoryTarget`
#[derive(Debug)]
struct PendingCopy {
    data: Vec<u8>,
    /// Polls left before the copy resolves
    remaining: u32,
    failed: bool,
}

/// CPU framebuffer implementing `CaptureTarget`
///
/// Readbacks resolve after `latency` non-blocking polls, mimicking a GPU
/// that is a few frames behind.
#[derive(Debug)]
pub struct MemoryTarget {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: CaptureFormat,
    latency: u32,
    slots: [Option<PendingCopy>; READBACK_SLOTS],
    bound: bool,
    fail_next: bool,
}

impl MemoryTarget {
    pub fn new(width: u32, height: u32, format: CaptureFormat) -> Self {
        Self {
            pixels: vec![0; (width as usize) * (height as usize) * 4],
            width,
            height,
            format,
            latency: 0,
            slots: [None, None],
            bound: false,
            fail_next: false,
        }
    }

    /// Number of pending polls before a readback resolves
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Draw directly into the framebuffer
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Copy a full frame into the framebuffer
    pub fn draw(&mut self, frame: &[u8]) {
        let len = self.pixels.len().min(frame.len());
        self.pixels[..len].copy_from_slice(&frame[..len]);
    }

    /// Make the next issued readback fail
    pub fn fail_next_readback(&mut self) {
        self.fail_next = true;
    }

    pub fn pending_readbacks(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl CaptureTarget for MemoryTarget {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_format(&self) -> CaptureFormat {
        self.format
    }

    fn bind(&mut self) {
        self.bound = true;
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0; (width as usize) * (height as usize) * 4];
        self.slots = [None, None];
    }

    fn begin_readback(&mut self, slot: usize) -> bool {
        let Some(entry) = self.slots.get_mut(slot) else {
            return false;
        };
        if entry.is_some() {
            return false;
        }
        *entry = Some(PendingCopy {
            data: self.pixels.clone(),
            remaining: self.latency,
            failed: std::mem::take(&mut self.fail_next),
        });
        true
    }

    fn poll_readback(&mut self, slot: usize, out: &mut Vec<u8>, wait: bool) -> ReadbackStatus {
        let Some(entry) = self.slots.get_mut(slot) else {
            return ReadbackStatus::Failed;
        };
        let Some(copy) = entry.as_mut() else {
            return ReadbackStatus::Failed;
        };

        if copy.failed {
            *entry = None;
            return ReadbackStatus::Failed;
        }
        if !wait && copy.remaining > 0 {
            copy.remaining -= 1;
            return ReadbackStatus::Pending;
        }

        if let Some(copy) = entry.take() {
            out.clear();
            out.extend_from_slice(&copy.data);
        }
        ReadbackStatus::Ready
    }

    fn read_pixels(&mut self, out: &mut Vec<u8>) -> bool {
        out.clear();
        out.extend_from_slice(&self.pixels);
        true
    }
}
