/// Reusable byte buffer for frame payloads.
///
/// The buffer only ever grows: clearing or overwriting it with a smaller
/// payload keeps the allocation, so a client that has seen one large frame
/// never reallocates for subsequent frames of the same size. Length is always
/// bounded by capacity.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop the contents but keep the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Grow the allocation so at least `total` bytes fit. Never shrinks.
    pub fn reserve_total(&mut self, total: usize) {
        if total > self.data.capacity() {
            self.data.reserve(total - self.data.len());
        }
    }

    /// Replace the contents with `src`, growing as needed.
    pub fn assign(&mut self, src: &[u8]) {
        self.reserve_total(src.len());
        self.data.clear();
        self.data.extend_from_slice(src);
    }

    /// Append `src`, growing as needed.
    pub fn extend_from_slice(&mut self, src: &[u8]) {
        self.data.extend_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let buf = FrameBuffer::new();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
        assert!(buf.as_slice().is_empty());
    }

    #[test]
    fn assign_replaces_contents() {
        let mut buf = FrameBuffer::new();
        buf.assign(b"first frame");
        assert_eq!(buf.as_slice(), b"first frame");

        buf.assign(b"second");
        assert_eq!(buf.as_slice(), b"second");
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut buf = FrameBuffer::new();
        buf.assign(&[0u8; 4096]);
        let cap = buf.capacity();
        assert!(cap >= 4096);

        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn capacity_is_monotone() {
        let mut buf = FrameBuffer::new();
        let mut last_cap = 0;
        for size in [16usize, 4096, 128, 8192, 64] {
            buf.assign(&vec![0xAB; size]);
            assert!(buf.capacity() >= last_cap, "buffer must never shrink");
            assert!(buf.len() <= buf.capacity());
            last_cap = buf.capacity();
        }
    }

    #[test]
    fn reserve_total_grows_without_touching_length() {
        let mut buf = FrameBuffer::new();
        buf.assign(b"abc");
        buf.reserve_total(1024);
        assert!(buf.capacity() >= 1024);
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    fn extend_appends() {
        let mut buf = FrameBuffer::new();
        buf.extend_from_slice(b"GET /");
        buf.extend_from_slice(b" HTTP/1.1\r\n");
        assert_eq!(buf.as_slice(), b"GET / HTTP/1.1\r\n");
    }
}
