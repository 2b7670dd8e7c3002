//! Companion serial framing.
//!
//! Both directions use marker-delimited frames over the byte stream:
//!
//! ```text
//! marker (1)   '>' (0x3E) host -> radio, '<' (0x3C) radio -> host
//! length (2)   payload length, little-endian
//! payload      command or response/push body
//! ```
//!
//! Stray bytes between frames (boot chatter on serial) are discarded
//! while scanning for the next marker.

/// Host-to-radio frame marker.
pub const MARKER_COMMAND: u8 = b'>';
/// Radio-to-host frame marker.
pub const MARKER_REPLY: u8 = b'<';

/// Upper bound on a frame payload; anything larger is stream corruption.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Wrap a command payload for transmission to the radio.
pub fn encode_command(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(3 + payload.len());
    frame.push(MARKER_COMMAND);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental decoder for radio-to-host frames.
///
/// Feed arbitrary byte chunks; complete frame payloads come out in
/// arrival order.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain any complete frames.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            // Drop noise before the next marker.
            match self.buf.iter().position(|&b| b == MARKER_REPLY) {
                Some(0) => {}
                Some(idx) => {
                    self.buf.drain(..idx);
                }
                None => {
                    self.buf.clear();
                    break;
                }
            }

            if self.buf.len() < 3 {
                break;
            }
            let len = u16::from_le_bytes([self.buf[1], self.buf[2]]) as usize;
            if len > MAX_FRAME_SIZE {
                // Corrupt length: skip this marker and rescan.
                self.buf.drain(..1);
                continue;
            }
            if self.buf.len() < 3 + len {
                break;
            }

            frames.push(self.buf[3..3 + len].to_vec());
            self.buf.drain(..3 + len);
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![MARKER_REPLY];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_encode_command() {
        let frame = encode_command(&[0x01, 0x02]);
        assert_eq!(frame, vec![b'>', 0x02, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_single_frame() {
        let mut acc = FrameAccumulator::new();
        let frames = acc.push(&reply_frame(b"hello"));
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut acc = FrameAccumulator::new();
        let frame = reply_frame(b"split-payload");

        assert!(acc.push(&frame[..4]).is_empty());
        let frames = acc.push(&frame[4..]);
        assert_eq!(frames, vec![b"split-payload".to_vec()]);
    }

    #[test]
    fn test_two_frames_one_chunk() {
        let mut acc = FrameAccumulator::new();
        let mut bytes = reply_frame(b"one");
        bytes.extend_from_slice(&reply_frame(b"two"));

        let frames = acc.push(&bytes);
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_noise_before_marker_discarded() {
        let mut acc = FrameAccumulator::new();
        let mut bytes = b"boot noise\r\n".to_vec();
        bytes.extend_from_slice(&reply_frame(b"payload"));

        let frames = acc.push(&bytes);
        assert_eq!(frames, vec![b"payload".to_vec()]);
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut acc = FrameAccumulator::new();
        let frames = acc.push(&reply_frame(b""));
        assert_eq!(frames, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_corrupt_length_resyncs() {
        let mut acc = FrameAccumulator::new();
        // Marker followed by an absurd length, then a good frame.
        let mut bytes = vec![MARKER_REPLY, 0xFF, 0xFF];
        bytes.extend_from_slice(&reply_frame(b"ok"));

        let frames = acc.push(&bytes);
        assert_eq!(frames, vec![b"ok".to_vec()]);
    }
}
