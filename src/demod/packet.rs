use super::track::Peak;
use super::util::{phase_dist, pos_mod};
use super::{SymbolMessage, MIN_PAYLOAD_SYMBOLS, TIMESTAMP_MOD, TTL_INIT};
use crate::pool::IdPool;
use log::{debug, info};

#[derive(Clone, Copy, Debug)]
struct PacketState {
    packet_id: u16,
    ttl: i32,
}

/// Multi-packet assembler. Every open packet is anchored by a preamble
/// peak; data peaks are routed to the open packet whose symbol grid they
/// sit closest to in fractional phase. A packet closes when its TTL runs
/// out, `TTL_INIT` steps after the last accepted peak.
pub(crate) struct PacketAssembler {
    packets: Vec<Vec<Peak>>,
    open: Vec<PacketState>,
    ids: IdPool,
    num_samples: i64,
    bin_size: i64,
    fft_factor: i64,
}

impl PacketAssembler {
    pub fn new(pool_size: usize, num_samples: usize, bin_size: usize, fft_factor: usize) -> Self {
        Self {
            packets: vec![Vec::new(); pool_size],
            open: Vec::with_capacity(pool_size),
            ids: IdPool::new(pool_size),
            num_samples: num_samples as i64,
            bin_size: bin_size as i64,
            fft_factor: fft_factor as i64,
        }
    }

    /// A preamble peak always opens a new packet.
    pub fn open_preamble(&mut self, pk: Peak) -> anyhow::Result<()> {
        let Some(packet_id) = self.ids.acquire() else {
            anyhow::bail!("packet id pool exhausted: too many concurrent preambles, grow the pool");
        };
        info!(
            "new preamble (ts {:.2} sym, bin {}, h {:.3}) -> packet {}",
            pk.ts as f64 / self.num_samples as f64,
            pk.bin,
            pk.h,
            packet_id
        );
        self.packets[packet_id as usize].push(pk);
        self.open.push(PacketState {
            packet_id,
            ttl: TTL_INIT,
        });
        Ok(())
    }

    /// Route a data peak to the best-matching open packet, if any. The
    /// candidate window rejects peaks inside the preamble/SFD gap and
    /// peaks old enough to have wrapped the timestamp modulus.
    pub fn add_data(&mut self, pk: Peak) -> bool {
        let n = self.num_samples;
        let mut best: Option<usize> = None;
        let mut min_dis = f32::INFINITY;
        for (i, ps) in self.open.iter().enumerate() {
            let anchor = self.packets[ps.packet_id as usize][0];
            let ts_dis = pos_mod(pk.ts - anchor.ts, TIMESTAMP_MOD);
            if ts_dis > 4 * n && ts_dis < TIMESTAMP_MOD / 2 {
                let dis = phase_dist(ts_dis, n);
                if dis < min_dis {
                    best = Some(i);
                    min_dis = dis;
                }
            }
        }
        match best {
            Some(i) => {
                let packet_id = self.open[i].packet_id;
                self.open[i].ttl = TTL_INIT;
                debug!(
                    "data peak (ts {:.2} sym, bin {}, h {:.3}) -> packet {}",
                    pk.ts as f64 / n as f64,
                    pk.bin,
                    pk.h,
                    packet_id
                );
                self.packets[packet_id as usize].push(pk);
                true
            }
            None => {
                debug!(
                    "orphan data peak (ts {:.2} sym, bin {}, h {:.3}) dropped",
                    pk.ts as f64 / n as f64,
                    pk.bin,
                    pk.h
                );
                false
            }
        }
    }

    /// End-of-step TTL discipline: finalize and emit every packet whose TTL
    /// has run out, then age the survivors.
    pub fn expire_step(&mut self, out: &mut Vec<SymbolMessage>) {
        for i in 0..self.open.len() {
            let ps = self.open[i];
            if ps.ttl > 0 {
                continue;
            }
            let pkt = &mut self.packets[ps.packet_id as usize];
            let symbols = emit_symbols(pkt, self.num_samples, self.bin_size, self.fft_factor);
            if symbols.len() >= MIN_PAYLOAD_SYMBOLS {
                info!("packet {} finished: {} symbols", ps.packet_id, symbols.len());
                out.push(SymbolMessage {
                    metadata: Default::default(),
                    symbols,
                });
            } else {
                debug!(
                    "packet {} dropped: only {} symbols",
                    ps.packet_id,
                    symbols.len()
                );
            }
            pkt.clear();
            self.ids.release(ps.packet_id);
        }
        self.open.retain(|ps| ps.ttl > 0);
        for ps in &mut self.open {
            ps.ttl -= 1;
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn free_ids(&self) -> usize {
        self.ids.free_len()
    }

    #[cfg(test)]
    fn open_ttls(&self) -> Vec<i32> {
        self.open.iter().map(|ps| ps.ttl).collect()
    }
}

/// Reconstruct the symbol sequence of a finalised packet.
///
/// Timestamps are renormalised to the preamble anchor and sorted, then an
/// `N`-wide interval walks the expected symbol grid starting half a symbol
/// before the nominal first-data slot. Within each interval the peak
/// closest to the grid in phase and to the preamble in height wins. Empty
/// intervals before the first recovered symbol only advance the grid (how
/// far the first slot is from the anchor depends on how many chirps beyond
/// the expected count the preamble carried); later empty intervals emit a
/// `0` placeholder.
fn emit_symbols(pkt: &mut [Peak], n: i64, b: i64, fft_factor: i64) -> Vec<u16> {
    if pkt.is_empty() {
        return Vec::new();
    }
    let pre_ts_raw = pkt[0].ts;
    for pk in pkt.iter_mut() {
        pk.ts = pos_mod(pk.ts - pre_ts_raw, TIMESTAMP_MOD);
    }
    let pre_ts = 0i64;
    let pre_bin = pkt[0].bin as i64;
    let pre_h = pkt[0].h;
    pkt.sort_by_key(|pk| pk.ts);

    let mut symbols = Vec::new();
    // Nominal gap: preamble anchor + NetID(2) + SFD(2.25) put the first
    // data symbol 5 N out; open the first interval half a symbol early.
    let mut lo = 4 * n + n / 2;
    let mut idx = 1;
    while idx < pkt.len() {
        while idx < pkt.len() && pkt[idx].ts <= lo {
            idx += 1;
        }
        if idx >= pkt.len() {
            break;
        }
        if pkt[idx].ts >= lo + n {
            if !symbols.is_empty() {
                debug!("missing symbol in grid slot at {:.2} sym", lo as f64 / n as f64);
                symbols.push(0);
            }
        } else {
            let start = idx;
            while idx < pkt.len() && pkt[idx].ts < lo + n {
                idx += 1;
            }
            let mut best = start;
            let mut min_dis = f32::INFINITY;
            for i in start..idx {
                let mut dis = phase_dist(pkt[i].ts - pre_ts, n);
                dis += (pkt[i].h - pre_h).abs() / pre_h;
                if dis < min_dis {
                    min_dis = dis;
                    best = i;
                }
            }
            // Remove the bin-per-sample drift accumulated between the
            // anchor and this peak, leaving the modulation index.
            let bin_shift = pos_mod(pkt[best].ts - pre_ts, n) * b / n;
            let bin = pos_mod(pkt[best].bin as i64 - pre_bin - bin_shift, b);
            symbols.push((bin / fft_factor) as u16);
        }
        lo = pos_mod(lo + n, TIMESTAMP_MOD);
    }
    symbols
}
