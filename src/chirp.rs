use num_complex::Complex32;

/// Precomputed reference chirps over one symbol period.
///
/// Phase law: `φ(i) = (π/p)·(i − i²/N)` for `i in [0, N)`. The transmitted
/// base up-chirp equals `upchirp`; multiplying a received up-chirp by
/// `downchirp` (its conjugate) collapses it to a constant tone whose FFT bin
/// encodes the cyclic shift.
#[derive(Clone, Debug)]
pub struct ChirpTables {
    pub upchirp: Vec<Complex32>,
    pub downchirp: Vec<Complex32>,
}

impl ChirpTables {
    pub fn new(num_samples: usize, oversample: usize) -> Self {
        let n = num_samples as f64;
        let p = oversample as f64;
        let mut upchirp = Vec::with_capacity(num_samples);
        let mut downchirp = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let i = i as f64;
            let phase = (std::f64::consts::PI / p * (i - i * i / n)) as f32;
            upchirp.push(Complex32::from_polar(1.0, -phase));
            downchirp.push(Complex32::from_polar(1.0, phase));
        }
        Self { upchirp, downchirp }
    }

    /// Dechirp one symbol-length window. `up_block` collapses up-chirp
    /// content (preamble, data) to tones; `down_block` does the same for
    /// down-chirp content (SFD).
    pub fn dechirp(&self, input: &[Complex32], up_block: &mut [Complex32], down_block: &mut [Complex32]) {
        for (i, &x) in input.iter().enumerate().take(self.upchirp.len()) {
            up_block[i] = x * self.downchirp[i];
            down_block[i] = x * self.upchirp[i];
        }
    }
}
