//! Codec-aware frame partitioning
//!
//! Each codec needs a few leading bytes left in the clear so that routers
//! and decoders can still classify the frame: the Opus TOC byte for audio,
//! the VP8 payload descriptor, the H.264 NAL prefix of the first slice.

use crate::{
    frame::{MediaFrame, MediaType, VideoCodec},
    h264::{self, NaluType},
};

/// Number of leading payload bytes that must remain unencrypted.
///
/// Audio frames always keep one byte. Video depends on the codec: AV1 keeps
/// nothing, VP8 keeps its payload descriptor (10 bytes on key frames, 3
/// otherwise), and H.264 keeps everything up to and including the first two
/// bytes of the first slice or IDR NAL unit.
pub fn unencrypted_prefix(frame: &MediaFrame, media_type: MediaType) -> u8 {
    match media_type {
        MediaType::Audio => 1,
        MediaType::Video => {
            let Some(info) = frame.video_info() else {
                return 0;
            };
            match info.codec {
                VideoCodec::Av1 => 0,
                VideoCodec::Vp8 => {
                    if info.is_key_frame {
                        10
                    } else {
                        3
                    }
                },
                VideoCodec::H264 => first_slice_prefix(frame.payload()),
                VideoCodec::Vp9 | VideoCodec::Generic => 0,
            }
        },
    }
}

/// True iff this transformer services H.264 video.
pub fn frame_is_h264(frame: &MediaFrame, media_type: MediaType) -> bool {
    media_type == MediaType::Video
        && frame.video_info().is_some_and(|info| info.codec == VideoCodec::H264)
}

/// True iff the data contains an RBSP emulation prevention sequence.
pub fn needs_rbsp_unescape(data: &[u8]) -> bool {
    data.windows(3).any(|window| window == [0x00, 0x00, 0x03])
}

fn first_slice_prefix(data: &[u8]) -> u8 {
    for index in h264::find_nalu_indices(data) {
        let Some(&header) = data.get(index.payload_start_offset) else {
            continue;
        };
        match NaluType::from_header(header) {
            NaluType::Slice | NaluType::Idr => {
                // The prefix travels in a single byte of the trailer scheme.
                return (index.payload_start_offset + 2) as u8;
            },
            NaluType::Other(_) => {},
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDirection, VideoFrameInfo};

    fn video_frame(codec: VideoCodec, is_key_frame: bool, payload: Vec<u8>) -> MediaFrame {
        MediaFrame::video(
            FrameDirection::Sender,
            1,
            0,
            payload,
            VideoFrameInfo { codec, is_key_frame },
        )
    }

    #[test]
    fn audio_keeps_one_byte() {
        let frame = MediaFrame::audio(FrameDirection::Sender, 1, 0, vec![0u8; 20]);
        assert_eq!(unencrypted_prefix(&frame, MediaType::Audio), 1);
    }

    #[test]
    fn av1_keeps_nothing() {
        let frame = video_frame(VideoCodec::Av1, true, vec![0u8; 20]);
        assert_eq!(unencrypted_prefix(&frame, MediaType::Video), 0);
    }

    #[test]
    fn vp8_prefix_depends_on_key_frame() {
        let key = video_frame(VideoCodec::Vp8, true, vec![0u8; 20]);
        let delta = video_frame(VideoCodec::Vp8, false, vec![0u8; 20]);
        assert_eq!(unencrypted_prefix(&key, MediaType::Video), 10);
        assert_eq!(unencrypted_prefix(&delta, MediaType::Video), 3);
    }

    #[test]
    fn other_codecs_keep_nothing() {
        let frame = video_frame(VideoCodec::Vp9, true, vec![0u8; 20]);
        assert_eq!(unencrypted_prefix(&frame, MediaType::Video), 0);
        let frame = video_frame(VideoCodec::Generic, false, vec![0u8; 20]);
        assert_eq!(unencrypted_prefix(&frame, MediaType::Video), 0);
    }

    #[test]
    fn h264_prefix_covers_first_idr_nal() {
        // SPS at offset 4, IDR slice at offset 10: prefix = 10 + 2.
        let payload = vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x65, 0x88, 0x84];
        let frame = video_frame(VideoCodec::H264, true, payload);
        assert_eq!(unencrypted_prefix(&frame, MediaType::Video), 12);
    }

    #[test]
    fn h264_prefix_covers_first_non_idr_slice() {
        let payload = vec![0, 0, 1, 0x41, 0x9A, 0x10];
        let frame = video_frame(VideoCodec::H264, false, payload);
        assert_eq!(unencrypted_prefix(&frame, MediaType::Video), 5);
    }

    #[test]
    fn h264_without_slice_keeps_nothing() {
        // Parameter sets only, no slice data.
        let payload = vec![0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68, 0xCE];
        let frame = video_frame(VideoCodec::H264, false, payload);
        assert_eq!(unencrypted_prefix(&frame, MediaType::Video), 0);
    }

    #[test]
    fn h264_detection() {
        let h264 = video_frame(VideoCodec::H264, false, vec![]);
        let vp8 = video_frame(VideoCodec::Vp8, false, vec![]);
        let audio = MediaFrame::audio(FrameDirection::Sender, 1, 0, vec![]);

        assert!(frame_is_h264(&h264, MediaType::Video));
        assert!(!frame_is_h264(&vp8, MediaType::Video));
        assert!(!frame_is_h264(&audio, MediaType::Audio));
    }

    #[test]
    fn unescape_detection() {
        assert!(needs_rbsp_unescape(&[0xFF, 0x00, 0x00, 0x03, 0x01]));
        assert!(!needs_rbsp_unescape(&[0xFF, 0x00, 0x00, 0x04]));
        assert!(!needs_rbsp_unescape(&[0x00, 0x03]));
        assert!(!needs_rbsp_unescape(&[]));
    }
}
