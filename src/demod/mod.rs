use crate::buffer::SampleBuffer;
use crate::chirp::ChirpTables;
use crate::params::Params;
use crate::taps::DebugTaps;
use crate::window::kaiser;
use fold::SpectrumFolder;
use num_complex::Complex32;
use packet::PacketAssembler;
use std::collections::HashMap;
use track::{PeakTracker, SymbolClass};
use util::pos_mod;

mod fold;
mod packet;
mod track;
mod util;

/// Analysis windows per symbol; the step stride is `N / OVERLAP_FACTOR`.
pub const OVERLAP_FACTOR: usize = 16;
/// Preamble chirp count the classifier's steady-window arithmetic assumes.
pub(crate) const NUM_PREAMBLE: usize = 6;
/// Timestamp modulus. A full packet span stays well under half of it.
pub(crate) const TIMESTAMP_MOD: i64 = 1 << 28;
/// Steps an open packet survives without a newly accepted peak.
pub(crate) const TTL_INIT: i32 = 6 * OVERLAP_FACTOR as i32;
/// A LoRa payload carries at least this many symbols.
pub(crate) const MIN_PAYLOAD_SYMBOLS: usize = 8;
/// Backward-peek depth the host should keep buffered, in symbols.
pub const HISTORY_DEPTH: usize = 3;

/// One demodulated packet: a reserved metadata map (future CFO/SNR
/// annotations) and the symbol indices in `[0, M)`, timestamp-ordered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolMessage {
    pub metadata: HashMap<String, f64>,
    pub symbols: Vec<u16>,
}

/// Result of one analysis step.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Samples consumed: `N / OVERLAP_FACTOR`, or 0 on input underflow.
    pub consumed: usize,
    pub messages: Vec<SymbolMessage>,
}

/// Streaming multi-packet LoRa demodulator.
///
/// Every step dechirps one symbol-length window, folds the two magnitude
/// spectra, feeds local maxima to the peak tracker, routes closed tracks to
/// the packet assembler, and emits any packet whose TTL ran out. The input
/// cursor then advances by one overlap stride.
pub struct PyramidDemod {
    p: Params,
    num_samples: usize,
    bin_size: usize,
    chirps: ChirpTables,
    window: Vec<f32>,
    folder: SpectrumFolder,
    tracker: PeakTracker,
    packets: PacketAssembler,
    taps: DebugTaps,
    input: SampleBuffer,
    ts_ref: i64,
    bin_ref: i64,
    up_block: Vec<Complex32>,
    up_block_w: Vec<Complex32>,
    down_block: Vec<Complex32>,
    mag_sum: Vec<f32>,
    mag_sum_w: Vec<f32>,
}

impl PyramidDemod {
    pub fn new(params: Params) -> anyhow::Result<Self> {
        Self::with_taps(params, DebugTaps::default())
    }

    pub fn with_taps(params: Params, taps: DebugTaps) -> anyhow::Result<Self> {
        if !(7..=12).contains(&params.sf) {
            anyhow::bail!("spreading factor {} outside 7..=12", params.sf);
        }
        if params.fft_factor == 0 {
            anyhow::bail!("fft_factor must be positive");
        }
        if params.fs_bw_ratio.fract() != 0.0 {
            anyhow::bail!("fs_bw_ratio {} is not an integer value", params.fs_bw_ratio);
        }
        if params.fs_bw_ratio < 2.0 {
            anyhow::bail!("fs_bw_ratio must be at least 2");
        }
        if params.track_pool_size == 0 || params.packet_pool_size == 0 {
            anyhow::bail!("id pool sizes must be positive");
        }

        let num_samples = params.num_samples();
        let bin_size = params.bin_size();
        let zero = Complex32::new(0.0, 0.0);
        Ok(Self {
            chirps: ChirpTables::new(num_samples, params.oversample()),
            window: kaiser(num_samples, params.beta),
            folder: SpectrumFolder::new(params.fft_size(), bin_size),
            tracker: PeakTracker::new(
                params.track_pool_size,
                bin_size,
                params.bin_tolerance(),
                num_samples,
            ),
            packets: PacketAssembler::new(
                params.packet_pool_size,
                num_samples,
                bin_size,
                params.fft_factor,
            ),
            taps,
            input: SampleBuffer::new(),
            ts_ref: 0,
            bin_ref: 0,
            up_block: vec![zero; num_samples],
            up_block_w: vec![zero; num_samples],
            down_block: vec![zero; num_samples],
            mag_sum: vec![0.0; bin_size],
            mag_sum_w: vec![0.0; bin_size],
            num_samples,
            bin_size,
            p: params,
        })
    }

    /// Samples the host must supply to let `requested_output` symbols be
    /// demodulated.
    pub fn required_input(&self, requested_output: usize) -> usize {
        requested_output * self.p.num_symbols()
    }

    /// Backward-peek depth the host should keep buffered, in samples.
    pub fn history_samples(&self) -> usize {
        HISTORY_DEPTH * self.num_samples
    }

    /// One analysis step over the front of `input`. Underflow (fewer than
    /// `4 N` samples) is not an error: nothing is consumed.
    pub fn step(&mut self, input: &[Complex32]) -> anyhow::Result<StepOutcome> {
        let n = self.num_samples;
        if input.len() < 4 * n {
            return Ok(StepOutcome::default());
        }
        let stride = n / OVERLAP_FACTOR;

        DebugTaps::dump_complex(&mut self.taps.raw, &input[..stride]);

        self.chirps
            .dechirp(&input[..n], &mut self.up_block, &mut self.down_block);
        for i in 0..n {
            self.up_block_w[i] = self.up_block[i] * self.window[i];
        }
        DebugTaps::dump_complex(&mut self.taps.up, &self.up_block);
        DebugTaps::dump_complex(&mut self.taps.up_windowed, &self.up_block_w);
        DebugTaps::dump_complex(&mut self.taps.down, &self.down_block);

        self.folder.fold_into(&self.up_block, &mut self.mag_sum);
        DebugTaps::dump_complex(&mut self.taps.fft, self.folder.spectrum());
        self.folder.fold_into(&self.up_block_w, &mut self.mag_sum_w);

        let b = self.bin_size;
        for i in 0..b {
            let l = (i + b - 1) % b;
            let r = (i + 1) % b;
            if self.mag_sum_w[i] > self.p.threshold
                && self.mag_sum_w[i] > self.mag_sum_w[l]
                && self.mag_sum_w[i] > self.mag_sum_w[r]
            {
                self.tracker
                    .observe(i, self.mag_sum[i], self.ts_ref, self.bin_ref)?;
            }
        }

        for class in self.tracker.sweep() {
            match class {
                SymbolClass::Preamble(pk) => self.packets.open_preamble(pk)?,
                SymbolClass::Data(pk) => {
                    self.packets.add_data(pk);
                }
                SymbolClass::Broken => {}
            }
        }

        let mut messages = Vec::new();
        self.packets.expire_step(&mut messages);

        self.ts_ref = pos_mod(self.ts_ref + stride as i64, TIMESTAMP_MOD);
        self.bin_ref = pos_mod(self.bin_ref + (b / OVERLAP_FACTOR) as i64, b as i64);

        Ok(StepOutcome {
            consumed: stride,
            messages,
        })
    }

    /// Buffered entry point: append `samples` and step until the lookahead
    /// underflows, returning every message emitted along the way.
    pub fn process(&mut self, samples: &[Complex32]) -> anyhow::Result<Vec<SymbolMessage>> {
        self.input.push(samples);
        let mut buf = std::mem::take(&mut self.input);
        let mut messages = Vec::new();
        let mut failure = None;
        loop {
            match self.step(buf.as_slice()) {
                Ok(outcome) if outcome.consumed == 0 => break,
                Ok(mut outcome) => {
                    messages.append(&mut outcome.messages);
                    buf.consume(outcome.consumed);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.input = buf;
        match failure {
            Some(e) => Err(e),
            None => Ok(messages),
        }
    }

    pub fn params(&self) -> &Params {
        &self.p
    }

    pub fn ts_ref(&self) -> i64 {
        self.ts_ref
    }

    pub fn bin_ref(&self) -> i64 {
        self.bin_ref
    }

    pub fn open_track_count(&self) -> usize {
        self.tracker.open_count()
    }

    pub fn free_track_ids(&self) -> usize {
        self.tracker.free_ids()
    }

    pub fn open_packet_count(&self) -> usize {
        self.packets.open_count()
    }

    pub fn free_packet_ids(&self) -> usize {
        self.packets.free_ids()
    }
}
