//! Transformable media frame model
//!
//! Frames are opaque in-flight media units handed over by the transport
//! pipeline. Common fields (direction, SSRC, RTP timestamp, payload) are
//! shared by both media kinds; video frames additionally carry their codec
//! tag and key-frame flag.

use bytes::Bytes;

/// Direction of a frame on the media transport path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Outbound frame, to be encrypted
    Sender,
    /// Inbound frame, to be decrypted
    Receiver,
    /// Direction unknown; such frames are discarded
    Unknown,
}

/// Media kind serviced by a transformer. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// Audio frames
    Audio,
    /// Video frames
    Video,
}

/// Video codec tag carried by video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// VP8
    Vp8,
    /// VP9
    Vp9,
    /// H.264 / AVC
    H264,
    /// AV1
    Av1,
    /// Any codec without special framing treatment
    Generic,
}

/// Video-specific frame fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameInfo {
    /// Codec of the bitstream in the payload
    pub codec: VideoCodec,
    /// Whether this frame is a key frame
    pub is_key_frame: bool,
}

/// An in-flight media unit.
///
/// The payload is replaced exactly once per transformer pass, at the end of
/// a successful encrypt or decrypt; a frame that fails mid-path is dropped
/// unmodified.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    direction: FrameDirection,
    ssrc: u32,
    timestamp: u32,
    payload: Bytes,
    video: Option<VideoFrameInfo>,
}

impl MediaFrame {
    /// Create an audio frame.
    pub fn audio(
        direction: FrameDirection,
        ssrc: u32,
        timestamp: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self { direction, ssrc, timestamp, payload: payload.into(), video: None }
    }

    /// Create a video frame.
    pub fn video(
        direction: FrameDirection,
        ssrc: u32,
        timestamp: u32,
        payload: impl Into<Bytes>,
        info: VideoFrameInfo,
    ) -> Self {
        Self { direction, ssrc, timestamp, payload: payload.into(), video: Some(info) }
    }

    /// Direction of this frame on the transport path.
    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    /// RTP synchronization source identifier.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// RTP timestamp.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Current payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Video-specific fields, `None` for audio frames.
    pub fn video_info(&self) -> Option<VideoFrameInfo> {
        self.video
    }

    /// Replace the payload with transformed bytes.
    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }
}
