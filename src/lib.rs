//! Multi-packet LoRa pyramid demodulator.

pub mod buffer;
pub mod chirp;
pub mod demod;
pub mod params;
pub mod pool;
pub mod taps;
pub mod window;
