use std::sync::{Arc, Mutex};

use crate::error::{InspectError, Result};

const MB: u64 = 1024 * 1024;

/// At-rest payload transform applied before bytes land in the buffer.
///
/// The core never implements a cipher itself; hosts install one when the
/// capture store must be encrypted at rest. The transform may grow the
/// payload (e.g. an AEAD tag).
pub trait BufferCipher: Send + Sync {
    fn seal(&self, payload: &mut Vec<u8>);
}

/// Successful append: the slot offset inside the ring and the packet id
/// assigned to the stored frame (the post-append write position).
#[derive(Debug, Clone, Copy)]
pub struct Appended {
    pub offset: u64,
    pub packet_id: u64,
}

struct RingInner {
    buf: Vec<u8>,
    /// Absolute write position; only ever grows.
    write_pos: u64,
    /// Absolute read position; `write_pos - read_pos` is the used span.
    read_pos: u64,
    cipher: Option<Arc<dyn BufferCipher>>,
}

/// Fixed-size byte ring storing raw frames back to back.
///
/// Single mutex over positions and the wrap copy; producers append,
/// the poll loop reads slots back and advances the read position once
/// the consumer callback returns.
pub struct RingBuffer {
    inner: Mutex<RingInner>,
    size: u64,
}

impl RingBuffer {
    pub fn new(size_mb: u32) -> Result<Self> {
        if size_mb == 0 {
            return Err(InspectError::InvalidArgument("ring size must be nonzero".into()));
        }
        let size = u64::from(size_mb) * MB;
        let len = usize::try_from(size)
            .map_err(|_| InspectError::InvalidArgument("ring size overflows usize".into()))?;
        Ok(Self {
            inner: Mutex::new(RingInner {
                buf: vec![0u8; len],
                write_pos: 0,
                read_pos: 0,
                cipher: None,
            }),
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a frame. Fails with `CapacityExhausted` when the remaining
    /// capacity cannot hold it; the caller counts the drop.
    pub fn append(&self, data: &[u8]) -> Result<Appended> {
        if data.is_empty() {
            return Err(InspectError::InvalidArgument("empty payload".into()));
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let sealed;
        let payload: &[u8] = match &inner.cipher {
            Some(cipher) => {
                let mut tmp = data.to_vec();
                cipher.seal(&mut tmp);
                sealed = tmp;
                &sealed
            }
            None => data,
        };

        let len = payload.len() as u64;
        let available = self.size - (inner.write_pos - inner.read_pos);
        if available < len {
            return Err(InspectError::CapacityExhausted("ring buffer full"));
        }

        let offset = inner.write_pos % self.size;
        let off = offset as usize;
        let size = self.size as usize;
        if off + payload.len() <= size {
            inner.buf[off..off + payload.len()].copy_from_slice(payload);
        } else {
            let first = size - off;
            inner.buf[off..].copy_from_slice(&payload[..first]);
            inner.buf[..payload.len() - first].copy_from_slice(&payload[first..]);
        }

        inner.write_pos += len;
        Ok(Appended { offset, packet_id: inner.write_pos })
    }

    /// Borrow a stored slot for the duration of `f`.
    ///
    /// The view is valid until a later `consume` advances the read
    /// position past it; wrapped slots are stitched before the call.
    pub fn with_slot<R>(&self, offset: u64, len: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let off = offset as usize;
        let size = self.size as usize;
        if off + len <= size {
            f(&inner.buf[off..off + len])
        } else {
            let first = size - off;
            let mut stitched = Vec::with_capacity(len);
            stitched.extend_from_slice(&inner.buf[off..]);
            stitched.extend_from_slice(&inner.buf[..len - first]);
            f(&stitched)
        }
    }

    /// Advance the read position, releasing `len` bytes for reuse.
    pub fn consume(&self, len: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.read_pos = (inner.read_pos + len).min(inner.write_pos);
    }

    pub fn used(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.write_pos - inner.read_pos
    }

    pub fn used_pct(&self) -> u64 {
        self.used() * 100 / self.size
    }

    pub fn set_cipher(&self, cipher: Option<Arc<dyn BufferCipher>>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cipher = cipher;
    }

    pub fn encrypted(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cipher.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_increasing_packet_ids() {
        let ring = RingBuffer::new(1).unwrap();
        let a = ring.append(&[1, 2, 3]).unwrap();
        let b = ring.append(&[4, 5]).unwrap();
        assert_eq!(a.packet_id, 3);
        assert_eq!(b.packet_id, 5);
        assert!(b.packet_id > a.packet_id);
    }

    #[test]
    fn append_drops_when_full() {
        let ring = RingBuffer::new(1).unwrap();
        let chunk = vec![0u8; 512 * 1024];
        ring.append(&chunk).unwrap();
        ring.append(&chunk).unwrap();
        // Third append exceeds 1 MiB of unconsumed data.
        assert!(matches!(
            ring.append(&[0u8; 1]),
            Err(InspectError::CapacityExhausted(_))
        ));
        assert_eq!(ring.used(), 1024 * 1024);
    }

    #[test]
    fn consume_frees_capacity() {
        let ring = RingBuffer::new(1).unwrap();
        let chunk = vec![0u8; 1024 * 1024];
        ring.append(&chunk).unwrap();
        assert!(ring.append(&[1]).is_err());
        ring.consume(chunk.len() as u64);
        assert!(ring.append(&[1]).is_ok());
    }

    #[test]
    fn wraparound_preserves_bytes() {
        let ring = RingBuffer::new(1).unwrap();
        let size = ring.size();

        // Fill most of the ring, consume it, then append across the seam.
        let filler = vec![0xAAu8; (size - 4) as usize];
        ring.append(&filler).unwrap();
        ring.consume(filler.len() as u64);

        let data: Vec<u8> = (0u8..16).collect();
        let slot = ring.append(&data).unwrap();
        assert_eq!(slot.offset, size - 4);

        ring.with_slot(slot.offset, data.len(), |bytes| {
            assert_eq!(bytes, data.as_slice());
        });
    }

    #[test]
    fn used_never_exceeds_size() {
        let ring = RingBuffer::new(1).unwrap();
        let chunk = vec![0u8; 300 * 1024];
        for _ in 0..8 {
            let _ = ring.append(&chunk);
        }
        assert!(ring.used() <= ring.size());
    }

    #[test]
    fn cipher_hook_transforms_payload() {
        struct Xor;
        impl BufferCipher for Xor {
            fn seal(&self, payload: &mut Vec<u8>) {
                for b in payload.iter_mut() {
                    *b ^= 0xFF;
                }
            }
        }

        let ring = RingBuffer::new(1).unwrap();
        ring.set_cipher(Some(Arc::new(Xor)));
        assert!(ring.encrypted());

        let slot = ring.append(&[0x00, 0x0F]).unwrap();
        ring.with_slot(slot.offset, 2, |bytes| {
            assert_eq!(bytes, &[0xFF, 0xF0]);
        });
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(RingBuffer::new(0).is_err());
    }
}
