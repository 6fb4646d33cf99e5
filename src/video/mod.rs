//! Video playback and export
//!
//! Decode side: `DecodeSession` → decode thread → `FrameRingBuffer` →
//! `VideoPlayer::update` → `TextureSink`.
//!
//! Export side: `CaptureTarget` → async readback → `VideoExporter::unbind`
//! → `EncodeSession`.

mod capture;
mod clock;
mod codec;
mod decoder;
mod encoder;
mod exporter;
mod frame;
mod player;
mod ring;
mod seeker;
mod texture;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{
    padded_bytes_per_row, CaptureFormat, CaptureTarget, MemoryTarget, ReadbackStatus, RenderTarget, READBACK_SLOTS,
};
pub use clock::{PlaybackClock, PlaybackStatus};
pub use codec::{Decoded, FrameConverter, StreamInfo, TimeBase, VideoSink, VideoSource};
pub use decoder::{DecodeSession, DecoderParams, RgbaConverter};
pub use encoder::{EncodeSession, EncoderParams};
pub use exporter::VideoExporter;
pub use frame::{DecodedFrame, FramePool};
pub use player::VideoPlayer;
pub use ring::FrameRingBuffer;
pub use seeker::VideoSeeker;
pub use texture::{PixelBuffer, TextureSink, TextureUpload, VideoTexture};
