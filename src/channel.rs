//! Framing layer: turns a byte stream into self-delimited, checksummed
//! frames and back. Corruption and spurious magic-byte matches are resynced
//! past rather than treated as fatal.

use thiserror::Error;

use crate::buffer::{Buffer, RingBuffer, SegmentBuffer};
use crate::hash::hash_ly;

const MAGIC: u16 = 0x00AB;
pub(crate) const HEADER_SIZE: usize = 8; // magic:u16 + size:u16 + checksum:u32

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ChannelHeader {
    size: u16,
    checksum: u32,
}

impl ChannelHeader {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        out[2..4].copy_from_slice(&self.size.to_le_bytes());
        out[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Returns `None` if the magic bytes don't match.
    fn decode(bytes: &[u8]) -> Option<Self> {
        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        if magic != MAGIC {
            return None;
        }
        let size = u16::from_le_bytes([bytes[2], bytes[3]]);
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Some(Self { size, checksum })
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("payload of {0} bytes exceeds the maximum frame size of {1} bytes")]
    TooLarge(usize, usize),
}

/// A candidate frame boundary found while scanning the ring buffer. It may
/// turn out to be noise that merely happened to look like a header.
#[derive(Clone, Copy, Debug)]
struct DecodingInstance {
    /// Offset (from the current start of the ring buffer) of the header.
    header_offset: usize,
    header: ChannelHeader,
}

impl DecodingInstance {
    fn body_begin(&self) -> usize {
        self.header_offset + HEADER_SIZE
    }

    fn body_end(&self) -> usize {
        self.body_begin() + self.header.size as usize
    }
}

/// Stateful frame decoder. Persists scan progress and candidate frame
/// boundaries across calls to [`Channel::decode`].
pub struct Channel {
    max_frame_size: usize,
    /// How far into the ring buffer we have already scanned for magic
    /// bytes, relative to the ring's current start.
    scan_pos: usize,
    instances: Vec<DecodingInstance>,
}

impl Channel {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scan_pos: 0,
            instances: Vec::new(),
        }
    }

    /// Prepends a channel header to `payload`. The payload itself is not
    /// copied; only a small header segment is pushed to the front.
    pub fn encode(&self, mut payload: SegmentBuffer) -> Result<SegmentBuffer, ChannelError> {
        let size = payload.len();
        if size > self.max_frame_size {
            return Err(ChannelError::TooLarge(size, self.max_frame_size));
        }
        let checksum = hash_ly(payload.merge().as_slice());
        let header = ChannelHeader {
            size: size as u16,
            checksum,
        };
        payload.push_front(Buffer::from(&header.encode()[..]));
        Ok(payload)
    }

    /// Scans `ring` for newly-arrived bytes and returns every frame that can
    /// be fully decoded right now, in arrival order. Consumed bytes (frames
    /// and any bytes identified as unrecoverable noise) are removed from
    /// `ring`.
    pub fn decode(&mut self, ring: &mut RingBuffer) -> Vec<Buffer> {
        let mut frames = Vec::new();

        loop {
            self.scan(ring);

            match self.take_earliest_ready(ring) {
                Some(Ready::Frame(buf, consumed)) => {
                    ring.skip(consumed);
                    self.advance(consumed);
                    frames.push(buf);
                }
                Some(Ready::Corrupt) => {
                    // Only the offending instance is dropped; scanning
                    // already passed its header byte, so no ring bytes need
                    // to be skipped here.
                    continue;
                }
                None => break,
            }
        }

        frames
    }

    fn scan(&mut self, ring: &RingBuffer) {
        while self.scan_pos + HEADER_SIZE <= ring.size() {
            if let Some(bytes) = ring.peek(self.scan_pos, HEADER_SIZE) {
                if let Some(header) = ChannelHeader::decode(&bytes) {
                    if header.size as usize <= self.max_frame_size {
                        self.instances.push(DecodingInstance {
                            header_offset: self.scan_pos,
                            header,
                        });
                    }
                }
            }
            self.scan_pos += 1;
        }
    }

    /// Picks the earliest instance whose body has fully arrived, verifies
    /// it, and reports the outcome. Corrupt instances are removed from
    /// `self.instances` before returning so the next call picks the next
    /// earliest one.
    fn take_earliest_ready(&mut self, ring: &RingBuffer) -> Option<Ready> {
        let (idx, _) = self
            .instances
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.body_end() <= ring.size())
            .min_by_key(|(_, inst)| inst.header_offset)?;

        let inst = self.instances.remove(idx);
        let body = ring.peek(inst.body_begin(), inst.header.size as usize)?;

        if hash_ly(&body) == inst.header.checksum {
            Some(Ready::Frame(Buffer::from(body.as_slice()), inst.body_end()))
        } else {
            Some(Ready::Corrupt)
        }
    }

    /// Shifts all bookkeeping by `consumed` bytes after the ring buffer's
    /// start moves forward.
    fn advance(&mut self, consumed: usize) {
        self.scan_pos = self.scan_pos.saturating_sub(consumed);
        self.instances.retain_mut(|inst| {
            if inst.header_offset < consumed {
                false
            } else {
                inst.header_offset -= consumed;
                true
            }
        });
    }
}

enum Ready {
    Frame(Buffer, usize),
    Corrupt,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(payload: &[u8]) -> Vec<u8> {
        let channel = Channel::new(4096);
        let seg = channel
            .encode(SegmentBuffer::from_buffer(Buffer::from(payload)))
            .unwrap();
        seg.merge().as_slice().to_vec()
    }

    #[test]
    fn test_round_trip_single_frame() {
        let frame = encode_frame(b"hello");
        let mut ring = RingBuffer::new(256);
        ring.write(&frame);

        let mut channel = Channel::new(4096);
        let frames = channel.decode(&mut ring);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), b"hello");
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_decode() {
        let mut bytes = encode_frame(b"one");
        bytes.extend(encode_frame(b"two"));
        let mut ring = RingBuffer::new(256);
        ring.write(&bytes);

        let mut channel = Channel::new(4096);
        let frames = channel.decode(&mut ring);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_slice(), b"one");
        assert_eq!(frames[1].as_slice(), b"two");
    }

    #[test]
    fn test_garbage_before_valid_frame_is_skipped() {
        let mut bytes = vec![0xAB, 0x00, 0x05, 0x00, 1, 2, 3, 4]; // looks like a header, wrong checksum
        bytes.extend([9, 9, 9, 9, 9]); // bogus body
        bytes.extend(encode_frame(b"real"));
        let mut ring = RingBuffer::new(256);
        ring.write(&bytes);

        let mut channel = Channel::new(4096);
        let frames = channel.decode(&mut ring);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), b"real");
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let frame = encode_frame(b"partial payload");
        let mut ring = RingBuffer::new(256);
        ring.write(&frame[..frame.len() - 2]);

        let mut channel = Channel::new(4096);
        assert!(channel.decode(&mut ring).is_empty());

        ring.write(&frame[frame.len() - 2..]);
        let frames = channel.decode(&mut ring);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), b"partial payload");
    }

    #[test]
    fn test_oversized_declared_frame_is_ignored() {
        let mut channel = Channel::new(8);
        let big_header = ChannelHeader {
            size: 4096,
            checksum: 0,
        };
        let mut bytes = big_header.encode().to_vec();
        bytes.extend(encode_frame(b"ok"));
        let mut ring = RingBuffer::new(8192);
        ring.write(&bytes);

        let frames = channel.decode(&mut ring);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), b"ok");
    }
}
