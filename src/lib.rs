//! Immersive Media Library
//!
//! Threaded video playback and frame capture/export for Immersive Server.
//! A background decode thread feeds a bounded frame queue that the render loop
//! drains against a playback clock; the export side reads rendered frames back
//! from the GPU and muxes them into a compressed file.

pub mod error;
pub mod settings;
pub mod telemetry;
pub mod video;

pub use error::{MediaError, Result};
pub use settings::{ExportSettings, MediaSettings, PlayerSettings};
pub use telemetry::{ExportStats, PlaybackStats};
pub use video::{
    CaptureFormat, CaptureTarget, DecodeSession, Decoded, DecodedFrame, DecoderParams, EncodeSession, EncoderParams,
    FrameConverter, FramePool, FrameRingBuffer, MemoryTarget, PixelBuffer, PlaybackClock, PlaybackStatus,
    ReadbackStatus, RenderTarget, StreamInfo, TextureSink, TextureUpload, TimeBase, VideoExporter, VideoPlayer,
    VideoSeeker, VideoSink, VideoSource, VideoTexture,
};
