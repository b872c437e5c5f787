use super::util::pos_mod;
use super::{NUM_PREAMBLE, OVERLAP_FACTOR};
use crate::pool::IdPool;
use log::trace;

/// One spectral peak observation at a step timestamp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Peak {
    pub ts: i64,
    pub bin: u32,
    pub h: f32,
}

/// What a closed track turned out to be.
#[derive(Clone, Copy, Debug)]
pub(crate) enum SymbolClass {
    /// Anchor peak: trailing-edge timestamp of the preamble plus the
    /// quarter-symbol fractional shift, mean steady-portion height.
    Preamble(Peak),
    /// Apex of a short pyramid-shaped track.
    Data(Peak),
    /// Too long to be data, too short to be preamble; dropped.
    Broken,
}

/// An open track keyed by its reference-relative bin at creation time.
#[derive(Clone, Copy, Debug)]
struct OpenTrack {
    bin: u32,
    track_id: u16,
    updated: bool,
}

/// Follows simultaneous spectral peaks across overlapped FFT frames.
///
/// Tracks are matched by circular distance between the peak's
/// reference-relative bin and each open track's creation bin, scanning in
/// insertion order; the reference cursors make a stationary transmitter sit
/// on a constant relative bin despite the sliding dechirp grid.
pub(crate) struct PeakTracker {
    tracks: Vec<Vec<Peak>>,
    open: Vec<OpenTrack>,
    ids: IdPool,
    bin_size: i64,
    bin_tolerance: i64,
    num_samples: i64,
}

impl PeakTracker {
    pub fn new(pool_size: usize, bin_size: usize, bin_tolerance: usize, num_samples: usize) -> Self {
        let mut tracks = vec![Vec::new(); pool_size];
        for t in &mut tracks {
            t.reserve(OVERLAP_FACTOR * (NUM_PREAMBLE + 2));
        }
        Self {
            tracks,
            open: Vec::with_capacity(pool_size),
            ids: IdPool::new(pool_size),
            bin_size: bin_size as i64,
            bin_tolerance: bin_tolerance as i64,
            num_samples: num_samples as i64,
        }
    }

    /// Route one peak observation for the current step. `bin` is the
    /// absolute folded bin; `height` comes from the unwindowed spectrum.
    pub fn observe(&mut self, bin: usize, height: f32, ts_ref: i64, bin_ref: i64) -> anyhow::Result<()> {
        let cur_bin = pos_mod(bin as i64 - bin_ref, self.bin_size);
        let peak = Peak {
            ts: ts_ref,
            bin: bin as u32,
            h: height,
        };

        for bt in &mut self.open {
            let dis = pos_mod(cur_bin - bt.bin as i64, self.bin_size);
            if dis <= self.bin_tolerance || dis >= self.bin_size - self.bin_tolerance {
                bt.updated = true;
                self.tracks[bt.track_id as usize].push(peak);
                return Ok(());
            }
        }

        let Some(track_id) = self.ids.acquire() else {
            anyhow::bail!(
                "track id pool exhausted: threshold too low for this input, raise it or grow the pool"
            );
        };
        self.open.push(OpenTrack {
            bin: cur_bin as u32,
            track_id,
            updated: true,
        });
        self.tracks[track_id as usize].push(peak);
        Ok(())
    }

    /// Close every track that received no peak this step, classifying each.
    /// Surviving tracks are re-armed for the next step.
    pub fn sweep(&mut self) -> Vec<SymbolClass> {
        let mut closed = Vec::new();
        for bt in &self.open {
            if bt.updated {
                continue;
            }
            let obs = &self.tracks[bt.track_id as usize];
            let class = classify(obs, self.num_samples);
            if matches!(class, SymbolClass::Broken) {
                trace!("broken track {} (len {})", bt.track_id, obs.len());
            } else {
                closed.push(class);
            }
        }
        let (tracks, ids) = (&mut self.tracks, &mut self.ids);
        self.open.retain(|bt| {
            if !bt.updated {
                ids.release(bt.track_id);
                tracks[bt.track_id as usize].clear();
            }
            bt.updated
        });
        for bt in &mut self.open {
            bt.updated = false;
        }
        closed
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn free_ids(&self) -> usize {
        self.ids.free_len()
    }

    #[cfg(test)]
    pub fn open_relative_bins(&self) -> Vec<u32> {
        self.open.iter().map(|bt| bt.bin).collect()
    }
}

/// Central-peak extraction. Preamble tracks are long plateaus: anchor on
/// the higher of two samples straddling the steady window, shifted to the
/// trailing edge plus a quarter symbol. Data tracks are short pyramids:
/// take the apex. Anything else is noise.
fn classify(obs: &[Peak], num_samples: i64) -> SymbolClass {
    let len = obs.len();
    let o = OVERLAP_FACTOR;
    let p = NUM_PREAMBLE;

    if len >= o * (p - 1) + 2 {
        let lo = len / 2 - o * (p - 1) / 2;
        let hi = (len - 1) / 2 + o * (p - 1) / 2;
        let (ts, bin) = if obs[lo].h > obs[hi].h {
            (
                obs[lo].ts + num_samples / 4 + (p as i64 - 1) * num_samples,
                obs[lo].bin,
            )
        } else {
            (obs[hi].ts + num_samples / 4, obs[hi].bin)
        };
        let steady = &obs[2 * o..o * (p - 2)];
        let h = steady.iter().map(|pk| pk.h).sum::<f32>() / (o * (p - 4)) as f32;
        SymbolClass::Preamble(Peak { ts, bin, h })
    } else if (2..=2 * o).contains(&len) {
        let mut apex = 0;
        for (i, pk) in obs.iter().enumerate().skip(1) {
            if pk.h > obs[apex].h {
                apex = i;
            }
        }
        SymbolClass::Data(obs[apex])
    } else {
        SymbolClass::Broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 256;
    const B: usize = 128;

    fn drive(tracker: &mut PeakTracker, steps: &[Vec<(usize, f32)>]) -> Vec<SymbolClass> {
        let mut out = Vec::new();
        let stride = (N / OVERLAP_FACTOR) as i64;
        let bin_step = (B / OVERLAP_FACTOR) as i64;
        for (t, peaks) in steps.iter().enumerate() {
            let ts_ref = t as i64 * stride;
            let bin_ref = pos_mod(t as i64 * bin_step, B as i64);
            for &(bin, h) in peaks {
                tracker.observe(bin, h, ts_ref, bin_ref).unwrap();
            }
            out.extend(tracker.sweep());
        }
        out
    }

    #[test]
    fn drifting_peak_stays_one_track() {
        let mut tracker = PeakTracker::new(8, B, 0, N);
        // A stationary tone drifts +B/O absolute bins per step.
        let steps: Vec<Vec<(usize, f32)>> = (0..5)
            .map(|t| vec![((10 + t * B / OVERLAP_FACTOR) % B, 100.0)])
            .collect();
        drive(&mut tracker, &steps);
        assert_eq!(tracker.open_count(), 1);
        assert_eq!(tracker.free_ids(), 7);
    }

    #[test]
    fn short_pyramid_classifies_as_data_apex() {
        let mut tracker = PeakTracker::new(8, B, 0, N);
        let mut steps: Vec<Vec<(usize, f32)>> = Vec::new();
        let heights = [10.0, 30.0, 90.0, 40.0, 20.0];
        for (t, &h) in heights.iter().enumerate() {
            steps.push(vec![((4 + t * B / OVERLAP_FACTOR) % B, h)]);
        }
        steps.push(vec![]); // closes the track
        let closed = drive(&mut tracker, &steps);
        assert_eq!(closed.len(), 1);
        match closed[0] {
            SymbolClass::Data(pk) => {
                assert_eq!(pk.h, 90.0);
                let stride = (N / OVERLAP_FACTOR) as i64;
                assert_eq!(pk.ts, 2 * stride);
            }
            other => panic!("expected data, got {other:?}"),
        }
        // Pool fully returned.
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(tracker.free_ids(), 8);
    }

    #[test]
    fn single_observation_track_is_broken() {
        let mut tracker = PeakTracker::new(8, B, 0, N);
        let closed = drive(&mut tracker, &[vec![(99, 5.0)], vec![]]);
        assert!(closed.is_empty());
        assert_eq!(tracker.free_ids(), 8);
    }

    #[test]
    fn long_plateau_classifies_as_preamble_right_branch_on_tie() {
        let mut tracker = PeakTracker::new(8, B, 0, N);
        let len = OVERLAP_FACTOR * (NUM_PREAMBLE - 1) + 2; // 82
        let mut steps: Vec<Vec<(usize, f32)>> = (0..len)
            .map(|t| vec![((7 + t * B / OVERLAP_FACTOR) % B, 200.0)])
            .collect();
        steps.push(vec![]);
        let closed = drive(&mut tracker, &steps);
        assert_eq!(closed.len(), 1);
        match closed[0] {
            SymbolClass::Preamble(pk) => {
                // Equal heights take the right branch deterministically.
                let stride = (N / OVERLAP_FACTOR) as i64;
                let hi = (len - 1) / 2 + OVERLAP_FACTOR * (NUM_PREAMBLE - 1) / 2;
                assert_eq!(pk.ts, hi as i64 * stride + N as i64 / 4);
                assert_eq!(pk.h, 200.0);
            }
            other => panic!("expected preamble, got {other:?}"),
        }
    }

    #[test]
    fn mid_length_track_is_broken() {
        let mut tracker = PeakTracker::new(8, B, 0, N);
        let len = 2 * OVERLAP_FACTOR + 5; // between data and preamble regimes
        let mut steps: Vec<Vec<(usize, f32)>> = (0..len)
            .map(|t| vec![((3 + t * B / OVERLAP_FACTOR) % B, 50.0)])
            .collect();
        steps.push(vec![]);
        let closed = drive(&mut tracker, &steps);
        assert!(closed.is_empty());
    }

    #[test]
    fn tolerance_zero_requires_exact_relative_bin() {
        let mut tracker = PeakTracker::new(8, B, 0, N);
        // Second step's peak is one bin off the drift grid: new track.
        let steps = vec![
            vec![(10usize, 100.0f32)],
            vec![((11 + B / OVERLAP_FACTOR) % B, 100.0)],
        ];
        drive(&mut tracker, &steps);
        assert_eq!(tracker.open_relative_bins().len(), 1);
        assert_eq!(tracker.free_ids(), 7); // one open now, one closed as broken
    }

    #[test]
    fn wraparound_distance_matches_across_bin_zero() {
        let mut tracker = PeakTracker::new(8, B, 2, N);
        // Relative bins B-1 and 1 are 2 apart circularly.
        tracker.observe(B - 1, 10.0, 0, 0).unwrap();
        tracker.observe(1, 10.0, 0, 0).unwrap();
        assert_eq!(tracker.open_count(), 1);
        assert_eq!(tracker.tracks[tracker.open[0].track_id as usize].len(), 2);
    }

    #[test]
    fn pool_exhaustion_is_an_error() {
        let mut tracker = PeakTracker::new(2, B, 0, N);
        tracker.observe(0, 1.0, 0, 0).unwrap();
        tracker.observe(40, 1.0, 0, 0).unwrap();
        assert!(tracker.observe(80, 1.0, 0, 0).is_err());
    }
}
