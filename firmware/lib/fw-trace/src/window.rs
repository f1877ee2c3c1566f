use fw_sync::SpinLock;

/// Size of the trace window shared with the host.
pub const TRACE_WINDOW_SIZE: usize = 4096;

/// The window the host debug interface reads.
pub static WINDOW: TraceWindow<TRACE_WINDOW_SIZE> = TraceWindow::new();

struct Ring<const N: usize> {
    buf: [u8; N],
    /// Next write position.
    head: usize,
    /// Valid bytes, at most `N`.
    len: usize,
    /// Bytes overwritten before the host read them.
    lost: usize,
}

/// A byte ring that overwrites its oldest content when full.
pub struct TraceWindow<const N: usize> {
    ring: SpinLock<Ring<N>>,
}

impl<const N: usize> Default for TraceWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TraceWindow<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: SpinLock::new(Ring {
                buf: [0; N],
                head: 0,
                len: 0,
                lost: 0,
            }),
        }
    }

    pub fn write_bytes(&self, bytes: &[u8]) {
        if N == 0 {
            return;
        }
        self.ring.with_critical(|r| {
            for &b in bytes {
                r.buf[r.head] = b;
                r.head = (r.head + 1) % N;
                if r.len == N {
                    r.lost += 1;
                } else {
                    r.len += 1;
                }
            }
        });
    }

    /// Copy the buffered bytes, oldest first, into `out`. Returns the count copied.
    pub fn snapshot(&self, out: &mut [u8]) -> usize {
        self.ring.with_critical(|r| {
            let start = (r.head + N - r.len) % N.max(1);
            let n = r.len.min(out.len());
            for (i, slot) in out.iter_mut().take(n).enumerate() {
                *slot = r.buf[(start + i) % N];
            }
            n
        })
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.with_critical(|r| r.len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes overwritten since the last [`clear`](Self::clear).
    #[must_use]
    pub fn lost(&self) -> usize {
        self.ring.with_critical(|r| r.lost)
    }

    pub fn clear(&self) {
        self.ring.with_critical(|r| {
            r.head = 0;
            r.len = 0;
            r.lost = 0;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_bytes_when_full() {
        let w = TraceWindow::<8>::new();
        w.write_bytes(b"abcdef");
        let mut out = [0u8; 8];
        assert_eq!(w.snapshot(&mut out), 6);
        assert_eq!(&out[..6], b"abcdef");

        w.write_bytes(b"ghijk");
        assert_eq!(w.len(), 8);
        assert_eq!(w.lost(), 3);
        assert_eq!(w.snapshot(&mut out), 8);
        assert_eq!(&out, b"defghijk");
    }

    #[test]
    fn snapshot_truncates_to_output() {
        let w = TraceWindow::<8>::new();
        w.write_bytes(b"xyz");
        let mut out = [0u8; 2];
        assert_eq!(w.snapshot(&mut out), 2);
        assert_eq!(&out, b"xy");
        w.clear();
        assert!(w.is_empty());
    }
}
