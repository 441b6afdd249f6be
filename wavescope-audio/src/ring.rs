//! Growable circular byte buffer.
//!
//! No audio semantics: callers move raw bytes (or f32 samples through the
//! typed helpers) and the buffer only guarantees order. All logical offsets
//! are relative to the front of the live region and wrap modulo capacity.
//! Reading more than is buffered is a contract violation and asserts;
//! writes never fail, they grow the storage.
//!
//! Growth doubles the capacity (or jumps straight to the requested size).
//! When the live region wraps past the end of storage, growing must slide
//! the wrapped tail up by the capacity delta, otherwise the old tail and
//! the new free space would interleave and reads would come back reordered.

/// Growable ring buffer over raw bytes.
#[derive(Default)]
pub struct RingBuffer {
    data: Vec<u8>,
    size: usize,
    start_pos: usize,
    end_pos: usize,
}

#[inline]
fn f32s_as_bytes(samples: &[f32]) -> &[u8] {
    // f32 -> u8 reinterpretation is always valid and u8 has no alignment
    unsafe { std::slice::from_raw_parts(samples.as_ptr() as *const u8, samples.len() * 4) }
}

#[inline]
fn f32s_as_bytes_mut(samples: &mut [f32]) -> &mut [u8] {
    unsafe {
        std::slice::from_raw_parts_mut(samples.as_mut_ptr() as *mut u8, samples.len() * 4)
    }
}

impl RingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut rb = Self::new();
        rb.reserve(capacity);
        rb
    }

    /// Logical bytes in use.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Drop all contents, keeping the storage.
    pub fn clear(&mut self) {
        self.size = 0;
        self.start_pos = 0;
        self.end_pos = 0;
    }

    // Slide the wrapped tail up by the capacity delta so the live region
    // stays contiguous in logical order. Only needed when the region wraps
    // (end at or before start, start not at zero).
    fn reorder(&mut self, old_capacity: usize, new_capacity: usize) {
        if self.size == 0 || self.start_pos == 0 || self.end_pos > self.start_pos {
            return;
        }
        let difference = new_capacity - old_capacity;
        self.data
            .copy_within(self.start_pos..old_capacity, self.start_pos + difference);
        self.start_pos += difference;
    }

    fn ensure_capacity(&mut self) {
        let old_capacity = self.data.len();
        if self.size <= old_capacity {
            return;
        }
        let mut new_capacity = old_capacity * 2;
        if self.size > new_capacity {
            new_capacity = self.size;
        }
        self.data.resize(new_capacity, 0);
        self.reorder(old_capacity, new_capacity);
    }

    /// Grow storage to at least `capacity` bytes without changing contents.
    pub fn reserve(&mut self, capacity: usize) {
        let old_capacity = self.data.len();
        if capacity <= old_capacity {
            return;
        }
        self.data.resize(capacity, 0);
        self.reorder(old_capacity, capacity);
    }

    /// Extend the logical size to `size`, zero-filling the new region at
    /// the back. No-op if the buffer is already that large.
    pub fn upsize(&mut self, size: usize) {
        if size <= self.size {
            return;
        }
        let add_size = size - self.size;
        self.size = size;
        self.ensure_capacity();

        let capacity = self.data.len();
        let new_end_pos = self.end_pos + add_size;
        if new_end_pos > capacity {
            let back_size = capacity - self.end_pos;
            let loop_size = add_size - back_size;
            if back_size > 0 {
                self.data[self.end_pos..capacity].fill(0);
            }
            self.data[..loop_size].fill(0);
            self.end_pos = new_end_pos - capacity;
        } else {
            self.data[self.end_pos..new_end_pos].fill(0);
            self.end_pos = new_end_pos;
        }
    }

    /// Overwrite `data.len()` bytes at logical offset `position`, growing
    /// (with the upsize zero-fill) when the write extends past the current
    /// size.
    pub fn place(&mut self, position: usize, data: &[u8]) {
        let end_point = position + data.len();
        if end_point > self.size {
            self.upsize(end_point);
        }

        let capacity = self.data.len();
        let mut pos = position + self.start_pos;
        if pos >= capacity {
            pos -= capacity;
        }

        let data_end_pos = pos + data.len();
        if data_end_pos > capacity {
            let back_size = data_end_pos - capacity;
            let loop_size = data.len() - back_size;
            self.data[pos..capacity].copy_from_slice(&data[..loop_size]);
            self.data[..back_size].copy_from_slice(&data[loop_size..]);
        } else {
            self.data[pos..data_end_pos].copy_from_slice(data);
        }
    }

    pub fn push_back(&mut self, data: &[u8]) {
        self.size += data.len();
        self.ensure_capacity();

        let capacity = self.data.len();
        let new_end_pos = self.end_pos + data.len();
        if new_end_pos > capacity {
            let back_size = capacity - self.end_pos;
            let loop_size = data.len() - back_size;
            if back_size > 0 {
                self.data[self.end_pos..capacity].copy_from_slice(&data[..back_size]);
            }
            self.data[..loop_size].copy_from_slice(&data[back_size..]);
            self.end_pos = new_end_pos - capacity;
        } else {
            self.data[self.end_pos..new_end_pos].copy_from_slice(data);
            self.end_pos = new_end_pos;
        }
    }

    pub fn push_front(&mut self, data: &[u8]) {
        self.size += data.len();
        self.ensure_capacity();

        let capacity = self.data.len();
        if self.size == data.len() {
            self.start_pos = 0;
            self.end_pos = data.len();
            self.data[..data.len()].copy_from_slice(data);
        } else if self.start_pos < data.len() {
            let back_size = data.len() - self.start_pos;
            if self.start_pos > 0 {
                self.data[..self.start_pos].copy_from_slice(&data[back_size..]);
            }
            self.start_pos = capacity - back_size;
            self.data[self.start_pos..capacity].copy_from_slice(&data[..back_size]);
        } else {
            self.start_pos -= data.len();
            self.data[self.start_pos..self.start_pos + data.len()].copy_from_slice(data);
        }
    }

    /// Append `count` zero bytes.
    pub fn push_back_zero(&mut self, count: usize) {
        self.size += count;
        self.ensure_capacity();

        let capacity = self.data.len();
        let new_end_pos = self.end_pos + count;
        if new_end_pos > capacity {
            let back_size = capacity - self.end_pos;
            let loop_size = count - back_size;
            if back_size > 0 {
                self.data[self.end_pos..capacity].fill(0);
            }
            self.data[..loop_size].fill(0);
            self.end_pos = new_end_pos - capacity;
        } else {
            self.data[self.end_pos..new_end_pos].fill(0);
            self.end_pos = new_end_pos;
        }
    }

    /// Prepend `count` zero bytes.
    pub fn push_front_zero(&mut self, count: usize) {
        self.size += count;
        self.ensure_capacity();

        let capacity = self.data.len();
        if self.size == count {
            self.start_pos = 0;
            self.end_pos = count;
            self.data[..count].fill(0);
        } else if self.start_pos < count {
            let back_size = count - self.start_pos;
            if self.start_pos > 0 {
                self.data[..self.start_pos].fill(0);
            }
            self.start_pos = capacity - back_size;
            self.data[self.start_pos..capacity].fill(0);
        } else {
            self.start_pos -= count;
            self.data[self.start_pos..self.start_pos + count].fill(0);
        }
    }

    /// Copy the oldest `out.len()` bytes without consuming them.
    pub fn peek_front(&self, out: &mut [u8]) {
        assert!(out.len() <= self.size, "peek past buffered data");
        let capacity = self.data.len();
        let start_size = capacity - self.start_pos;
        if start_size < out.len() {
            let rest = out.len() - start_size;
            out[..start_size].copy_from_slice(&self.data[self.start_pos..]);
            out[start_size..].copy_from_slice(&self.data[..rest]);
        } else {
            out.copy_from_slice(&self.data[self.start_pos..self.start_pos + out.len()]);
        }
    }

    /// Copy the newest `out.len()` bytes without consuming them.
    pub fn peek_back(&self, out: &mut [u8]) {
        assert!(out.len() <= self.size, "peek past buffered data");
        let capacity = self.data.len();
        let back_size = if self.end_pos > 0 { self.end_pos } else { capacity };
        if back_size < out.len() {
            let front_size = out.len() - back_size;
            let front_start = capacity - front_size;
            out[front_size..].copy_from_slice(&self.data[..back_size]);
            out[..front_size].copy_from_slice(&self.data[front_start..]);
        } else {
            out.copy_from_slice(&self.data[back_size - out.len()..back_size]);
        }
    }

    /// Copy and consume the oldest `out.len()` bytes.
    pub fn pop_front(&mut self, out: &mut [u8]) {
        self.peek_front(out);
        self.discard_front(out.len());
    }

    /// Copy and consume the newest `out.len()` bytes.
    pub fn pop_back(&mut self, out: &mut [u8]) {
        self.peek_back(out);
        self.discard_back(out.len());
    }

    /// Consume `count` bytes from the front without copying them out.
    pub fn discard_front(&mut self, count: usize) {
        assert!(count <= self.size, "discard past buffered data");
        self.size -= count;
        if self.size == 0 {
            self.start_pos = 0;
            self.end_pos = 0;
            return;
        }
        self.start_pos += count;
        if self.start_pos >= self.data.len() {
            self.start_pos -= self.data.len();
        }
    }

    /// Consume `count` bytes from the back without copying them out.
    pub fn discard_back(&mut self, count: usize) {
        assert!(count <= self.size, "discard past buffered data");
        self.size -= count;
        if self.size == 0 {
            self.start_pos = 0;
            self.end_pos = 0;
            return;
        }
        if self.end_pos <= count {
            self.end_pos = self.data.len() - (count - self.end_pos);
        } else {
            self.end_pos -= count;
        }
    }

    /// Wrap-aware reference into the live region, or None past the end.
    pub fn element_at(&self, index: usize) -> Option<&u8> {
        if index >= self.size {
            return None;
        }
        let mut offset = self.start_pos + index;
        if offset >= self.data.len() {
            offset -= self.data.len();
        }
        Some(&self.data[offset])
    }

    // --- f32 sample helpers; every pipeline caller moves f32 samples ---

    /// Buffered length in f32 samples.
    #[inline]
    pub fn len_f32(&self) -> usize {
        self.size / 4
    }

    pub fn push_back_f32(&mut self, samples: &[f32]) {
        self.push_back(f32s_as_bytes(samples));
    }

    pub fn push_front_zero_f32(&mut self, count: usize) {
        self.push_front_zero(count * 4);
    }

    pub fn push_back_zero_f32(&mut self, count: usize) {
        self.push_back_zero(count * 4);
    }

    pub fn peek_back_f32(&self, out: &mut [f32]) {
        self.peek_back(f32s_as_bytes_mut(out));
    }

    pub fn peek_front_f32(&self, out: &mut [f32]) {
        self.peek_front(f32s_as_bytes_mut(out));
    }

    pub fn pop_front_f32(&mut self, out: &mut [f32]) {
        self.pop_front(f32s_as_bytes_mut(out));
    }

    pub fn discard_front_f32(&mut self, count: usize) {
        self.discard_front(count * 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_tracks_net_bytes() {
        let mut rb = RingBuffer::new();
        rb.push_back(&[1, 2, 3]);
        rb.push_front(&[0]);
        assert_eq!(rb.len(), 4);
        rb.discard_front(2);
        assert_eq!(rb.len(), 2);
        rb.push_back_zero(10);
        assert_eq!(rb.len(), 12);
        rb.discard_back(12);
        assert_eq!(rb.len(), 0);
        assert!(rb.is_empty());
    }

    #[test]
    fn peek_then_pop_yields_identical_bytes() {
        let mut rb = RingBuffer::new();
        rb.push_back(&[9, 8, 7, 6, 5]);
        let mut peeked = [0u8; 5];
        let mut popped = [0u8; 5];
        rb.peek_front(&mut peeked);
        rb.pop_front(&mut popped);
        assert_eq!(peeked, popped);
        assert_eq!(peeked, [9, 8, 7, 6, 5]);
    }

    #[test]
    fn pop_to_empty_resets_positions() {
        let mut rb = RingBuffer::new();
        rb.push_back(&[1, 2, 3, 4]);
        rb.discard_front(1);
        let mut out = [0u8; 3];
        rb.pop_front(&mut out);
        assert_eq!(rb.len(), 0);
        // a fresh push after emptying starts at the origin again
        rb.push_back(&[5]);
        assert_eq!(rb.element_at(0), Some(&5));
    }

    #[test]
    fn push_front_precedes_existing_data() {
        let mut rb = RingBuffer::new();
        rb.push_back(&[3, 4]);
        rb.push_front(&[1, 2]);
        let mut out = [0u8; 4];
        rb.peek_front(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn wrapped_growth_preserves_read_order() {
        // Build a wrapped live region, then force growth and verify every
        // byte comes back in push order.
        let mut rb = RingBuffer::with_capacity(8);
        rb.push_back(&[0; 5]);
        rb.discard_front(4); // one leftover byte keeps the region offset

        let n = 40u8;
        for i in 1..=n {
            rb.push_back(&[i]); // wraps at 8 and grows repeatedly
        }
        assert_eq!(rb.len(), n as usize + 1);
        rb.discard_front(1); // drop the leftover byte
        let mut out = vec![0u8; n as usize];
        rb.pop_front(&mut out);
        let expect: Vec<u8> = (1..=n).collect();
        assert_eq!(out, expect);
    }

    #[test]
    fn growth_while_wrapped_slides_the_tail() {
        // capacity 4, live region wraps: [c d | a b] with start_pos = 2
        let mut rb = RingBuffer::with_capacity(4);
        rb.push_back(&[0, 0]);
        rb.push_back(&[b'a', b'b']);
        rb.discard_front(2);
        rb.push_back(&[b'c', b'd']); // start 2, end 2, full
        rb.push_back(&[b'e']); // forces doubling + tail slide
        let mut out = [0u8; 5];
        rb.peek_front(&mut out);
        assert_eq!(&out, b"abcde");
    }

    #[test]
    fn peek_front_reads_oldest_bytes_across_wrap() {
        let mut rb = RingBuffer::with_capacity(8);
        rb.push_back(&[0; 6]);
        rb.discard_front(5); // one leftover byte keeps start_pos at 5
        rb.push_back(&[1, 2, 3, 4, 5]); // [1 2] fill to 8, [3 4 5] wrap to the front
        rb.discard_front(1); // start 6, live region spans the wrap
        let mut out = [0u8; 5];
        rb.peek_front(&mut out);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert_eq!(rb.len(), 5); // peek does not consume
    }

    #[test]
    fn peek_back_reads_newest_bytes_across_wrap() {
        let mut rb = RingBuffer::with_capacity(8);
        rb.push_back(&[0; 5]);
        rb.discard_front(4);
        rb.push_back(&[1, 2, 3, 4, 5, 6]); // wraps
        let mut out = [0u8; 4];
        rb.peek_back(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
        rb.pop_back(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
        assert_eq!(rb.len(), 3);
    }

    #[test]
    fn upsize_zero_fills_the_gap() {
        let mut rb = RingBuffer::new();
        rb.push_back(&[7, 7]);
        rb.upsize(6);
        assert_eq!(rb.len(), 6);
        let mut out = [1u8; 6];
        rb.peek_front(&mut out);
        assert_eq!(out, [7, 7, 0, 0, 0, 0]);
        // shrinking via upsize is a no-op
        rb.upsize(3);
        assert_eq!(rb.len(), 6);
    }

    #[test]
    fn place_overwrites_within_live_region() {
        let mut rb = RingBuffer::new();
        rb.push_back(&[1, 2, 3, 4, 5]);
        rb.place(1, &[9, 9]);
        let mut out = [0u8; 5];
        rb.peek_front(&mut out);
        assert_eq!(out, [1, 9, 9, 4, 5]);
    }

    #[test]
    fn place_past_end_combines_upsize_and_write() {
        let mut rb = RingBuffer::new();
        rb.push_back(&[1, 2]);
        rb.place(5, &[8, 8]);
        assert_eq!(rb.len(), 7);
        let mut out = [0u8; 7];
        rb.peek_front(&mut out);
        assert_eq!(out, [1, 2, 0, 0, 0, 8, 8]);
    }

    #[test]
    fn place_wraps_around_storage_end() {
        let mut rb = RingBuffer::with_capacity(8);
        rb.push_back(&[0; 6]);
        rb.discard_front(5);
        rb.push_back(&[1, 2, 3, 4]); // live region wraps at 8
        rb.place(2, &[7, 7]); // straddles the physical wrap point
        rb.discard_front(1);
        let mut out = [0u8; 4];
        rb.peek_front(&mut out);
        assert_eq!(out, [1, 7, 7, 4]);
    }

    #[test]
    fn element_at_is_wrap_aware_and_bounded() {
        let mut rb = RingBuffer::with_capacity(4);
        rb.push_back(&[0, 0, 0]);
        rb.discard_front(2);
        rb.push_back(&[10, 20, 30]); // wraps
        assert_eq!(rb.element_at(1), Some(&10));
        assert_eq!(rb.element_at(3), Some(&30));
        assert_eq!(rb.element_at(4), None);
    }

    #[test]
    #[should_panic(expected = "peek past buffered data")]
    fn peeking_more_than_buffered_asserts() {
        let rb = RingBuffer::new();
        let mut out = [0u8; 1];
        rb.peek_front(&mut out);
    }

    #[test]
    fn f32_samples_round_trip() {
        let mut rb = RingBuffer::new();
        let samples = [0.5f32, -0.25, 1.0, f32::MIN_POSITIVE];
        rb.push_back_f32(&samples);
        assert_eq!(rb.len_f32(), 4);
        let mut out = [0.0f32; 4];
        rb.peek_back_f32(&mut out);
        assert_eq!(out, samples);
        rb.pop_front_f32(&mut out);
        assert_eq!(out, samples);
        assert!(rb.is_empty());
    }

    #[test]
    fn zero_prefill_then_samples_keeps_order() {
        let mut rb = RingBuffer::new();
        rb.push_front_zero_f32(2);
        rb.push_back_f32(&[1.0, 2.0]);
        let mut out = [9.0f32; 4];
        rb.peek_front_f32(&mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0]);
    }
}
