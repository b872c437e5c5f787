use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Zero-padded FFT plus four-slice magnitude fold onto the `B`-bin symbol
/// grid. The plan, scratch, and intermediate magnitude buffer are owned
/// here and reused every step.
pub(crate) struct SpectrumFolder {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    bin_size: usize,
    buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
    mag: Vec<f32>,
}

impl SpectrumFolder {
    pub fn new(fft_size: usize, bin_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            fft_size,
            bin_size,
            buf: vec![Complex32::new(0.0, 0.0); fft_size],
            scratch,
            mag: vec![0.0; fft_size],
        }
    }

    /// FFT `block` (zero-padded to the plan length) and fold magnitudes
    /// into `folded`, which must be `bin_size` long.
    ///
    /// The fold sums bins `[0,B)`, `[B,2B)`, `[FFT-2B,FFT-B)` and
    /// `[FFT-B,FFT)`: the zero-padded spectrum collapses onto the symbol
    /// grid and content aliased past the symbol bandwidth lands back on its
    /// wrapped bin instead of being lost.
    pub fn fold_into(&mut self, block: &[Complex32], folded: &mut [f32]) {
        debug_assert!(block.len() <= self.fft_size);
        debug_assert_eq!(folded.len(), self.bin_size);

        self.buf[..block.len()].copy_from_slice(block);
        self.buf[block.len()..].fill(Complex32::new(0.0, 0.0));
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);

        for (m, v) in self.mag.iter_mut().zip(self.buf.iter()) {
            *m = v.norm();
        }
        let b = self.bin_size;
        let f = self.fft_size;
        for i in 0..b {
            folded[i] = self.mag[i] + self.mag[b + i] + self.mag[f - 2 * b + i] + self.mag[f - b + i];
        }
    }

    /// Raw spectrum of the last `fold_into` call, for the debug tap.
    pub fn spectrum(&self) -> &[Complex32] {
        &self.buf
    }
}
