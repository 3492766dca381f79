use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Bounded tail buffer for child process output.
///
/// Keeps the last `cap` bytes pushed and remembers whether anything was
/// dropped, so a record can say its captured output is partial.
pub struct RingBytes {
    inner: Mutex<RingInner>,
    cap: usize,
}

struct RingInner {
    buf: VecDeque<u8>,
    total: u64,
}

impl RingBytes {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RingInner {
                buf: VecDeque::with_capacity(cap.min(64 * 1024)),
                total: 0,
            }),
            cap,
        })
    }

    fn lock(&self) -> MutexGuard<'_, RingInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, data: &[u8]) {
        let mut g = self.lock();
        g.total = g.total.saturating_add(data.len() as u64);
        let data = if data.len() > self.cap {
            &data[data.len() - self.cap..]
        } else {
            data
        };
        let overflow = g
            .buf
            .len()
            .saturating_add(data.len())
            .saturating_sub(self.cap);
        if overflow > 0 {
            g.buf.drain(..overflow);
        }
        g.buf.extend(data);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let g = self.lock();
        let mut vec = Vec::with_capacity(g.buf.len());
        vec.extend(g.buf.iter().copied());
        vec
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }

    /// Total bytes ever pushed, including dropped ones.
    pub fn total(&self) -> u64 {
        self.lock().total
    }

    pub fn truncated(&self) -> bool {
        let g = self.lock();
        g.total > g.buf.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_tail() {
        let ring = RingBytes::new(4);
        ring.push(b"ab");
        ring.push(b"cdef");
        assert_eq!(ring.to_bytes(), b"cdef");
        assert_eq!(ring.total(), 6);
        assert!(ring.truncated());
    }

    #[test]
    fn oversized_chunk_is_cut() {
        let ring = RingBytes::new(3);
        ring.push(b"0123456");
        assert_eq!(ring.to_string_lossy(), "456");
    }

    #[test]
    fn small_output_is_not_truncated() {
        let ring = RingBytes::new(16);
        ring.push(b"hello");
        assert!(!ring.truncated());
    }
}
