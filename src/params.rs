use anyhow::Context;

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Params {
    /// Spreading factor, `7..=12`.
    pub sf: usize,
    /// Low-data-rate optimisation flag (widens the peak-tracking bin tolerance).
    pub ldr: bool,
    /// Kaiser window shape parameter.
    pub beta: f64,
    /// FFT zero-padding factor `F >= 1`.
    pub fft_factor: usize,
    /// Peak magnitude floor applied to the windowed spectrum.
    pub threshold: f32,
    /// Sample-rate / bandwidth ratio; must be an integer value >= 2.
    pub fs_bw_ratio: f64,
    pub track_pool_size: usize,
    pub packet_pool_size: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            sf: 7,
            ldr: false,
            beta: 4.7,
            fft_factor: 1,
            threshold: 0.005,
            fs_bw_ratio: 2.0,
            track_pool_size: 40,
            packet_pool_size: 40,
        }
    }
}

impl Params {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read params file {path}"))?;
        let params: Params = toml::from_str(&content).context("parse params toml")?;
        Ok(params)
    }

    /// Oversampling ratio `p`. Only meaningful once validated.
    pub fn oversample(&self) -> usize {
        self.fs_bw_ratio as usize
    }

    /// Symbols per chirp, `M = 2^sf`.
    pub fn num_symbols(&self) -> usize {
        1 << self.sf
    }

    /// Samples per symbol, `N = p * M`.
    pub fn num_samples(&self) -> usize {
        self.oversample() * self.num_symbols()
    }

    /// Folded spectrum length, `B = F * M`.
    pub fn bin_size(&self) -> usize {
        self.fft_factor * self.num_symbols()
    }

    /// Raw FFT length, `F * N`.
    pub fn fft_size(&self) -> usize {
        self.fft_factor * self.num_samples()
    }

    /// Peak-to-track matching tolerance in folded bins. `F/2` truncates to
    /// zero for `F = 1`, degenerating to exact-match; kept as-is.
    pub fn bin_tolerance(&self) -> usize {
        if self.ldr {
            self.fft_factor * 2
        } else {
            self.fft_factor / 2
        }
    }
}
