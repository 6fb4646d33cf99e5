//! Presentation targets for converted frames
//!
//! The player hands every presented frame to a `TextureSink` as tightly
//! packed RGBA. `TextureUpload` writes into a wgpu texture; `PixelBuffer`
//! keeps a CPU copy for headless use.

/// Receiver of presented RGBA frames
pub trait TextureSink {
    /// Upload `width * height * 4` bytes of RGBA. Returns false if the frame was
    /// not accepted; the previous contents stay in place.
    fn upload_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> bool;
}

/// A GPU texture for displaying video frames
///
/// Bind groups are created by the renderer from `view()`.
pub struct VideoTexture {
    /// The GPU texture
    texture: wgpu::Texture,
    /// Texture view for binding
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl VideoTexture {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let (texture, view) = Self::create_texture(device, width, height);
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    fn create_texture(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Video Texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            // Rgba8UnormSrgb for gamma-correct display
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        (texture, view)
    }

    /// Write RGBA data covering the whole texture
    ///
    /// Returns false without touching the texture on a size mismatch.
    pub fn upload_raw(&self, queue: &wgpu::Queue, data: &[u8], width: u32, height: u32) -> bool {
        if width != self.width || height != self.height {
            tracing::warn!(
                "Frame {}x{} doesn't match video texture {}x{}",
                width,
                height,
                self.width,
                self.height
            );
            return false;
        }
        if data.len() < (width as usize) * (height as usize) * 4 {
            tracing::warn!("Frame data too small for {}x{} texture", width, height);
            return false;
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        true
    }

    /// Recreate the texture at a new size
    ///
    /// Bind groups referencing the old view must be rebuilt.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }

        let (texture, view) = Self::create_texture(device, width, height);
        self.texture = texture;
        self.view = view;
        self.width = width;
        self.height = height;

        tracing::debug!("Resized video texture to {}x{}", width, height);
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        wgpu::TextureFormat::Rgba8UnormSrgb
    }
}

/// Borrowed texture + queue pair used as a player sink for one tick
pub struct TextureUpload<'a> {
    pub texture: &'a VideoTexture,
    pub queue: &'a wgpu::Queue,
}

impl<'a> TextureUpload<'a> {
    pub fn new(texture: &'a VideoTexture, queue: &'a wgpu::Queue) -> Self {
        Self { texture, queue }
    }
}

impl TextureSink for TextureUpload<'_> {
    fn upload_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> bool {
        self.texture.upload_raw(self.queue, pixels, width, height)
    }
}

/// CPU-side RGBA frame buffer
#[derive(Debug, Default, Clone)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Frames accepted so far
    uploads: u64,
}

impl PixelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn upload_count(&self) -> u64 {
        self.uploads
    }
}

impl TextureSink for PixelBuffer {
    fn upload_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> bool {
        let size = (width as usize) * (height as usize) * 4;
        if pixels.len() < size {
            return false;
        }
        self.data.clear();
        self.data.extend_from_slice(&pixels[..size]);
        self.width = width;
        self.height = height;
        self.uploads += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_keeps_last_frame() {
        let mut buffer = PixelBuffer::new();
        assert!(buffer.upload_frame(&[1; 16], 2, 2));
        assert!(buffer.upload_frame(&[7; 16], 2, 2));
        assert_eq!(buffer.upload_count(), 2);
        assert_eq!(buffer.data(), &[7; 16]);
        assert_eq!((buffer.width(), buffer.height()), (2, 2));
    }

    #[test]
    fn test_pixel_buffer_rejects_short_frame() {
        let mut buffer = PixelBuffer::new();
        assert!(buffer.upload_frame(&[3; 4], 1, 1));
        assert!(!buffer.upload_frame(&[9; 8], 2, 2));
        assert_eq!(buffer.data(), &[3; 4]);
        assert_eq!(buffer.upload_count(), 1);
    }
}
