use num_complex::Complex32;

/// FIFO of complex baseband samples. Input lands at the tail; the
/// demodulator peeks a contiguous window from the head and consumes a
/// stride at a time. Storage is compacted once the dead prefix dominates.
#[derive(Clone, Debug, Default)]
pub struct SampleBuffer {
    buf: Vec<Complex32>,
    head: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: &[Complex32]) {
        if self.head > 0 && self.head >= self.buf.len() / 2 {
            self.buf.drain(..self.head);
            self.head = 0;
        }
        self.buf.extend_from_slice(x);
    }

    pub fn available(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn as_slice(&self) -> &[Complex32] {
        &self.buf[self.head..]
    }

    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.available());
        self.head += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, start: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| Complex32::new((start + i) as f32, 0.0))
            .collect()
    }

    #[test]
    fn push_consume_keeps_order() {
        let mut b = SampleBuffer::new();
        b.push(&ramp(8, 0));
        b.consume(3);
        b.push(&ramp(4, 8));
        assert_eq!(b.available(), 9);
        let got: Vec<f32> = b.as_slice().iter().map(|v| v.re).collect();
        assert_eq!(got, (3..12).map(|v| v as f32).collect::<Vec<_>>());
    }

    #[test]
    fn compaction_preserves_view() {
        let mut b = SampleBuffer::new();
        b.push(&ramp(100, 0));
        b.consume(80);
        // Triggers the drain path.
        b.push(&ramp(10, 100));
        assert_eq!(b.available(), 30);
        assert_eq!(b.as_slice()[0].re, 80.0);
        assert_eq!(b.as_slice()[29].re, 109.0);
    }
}
