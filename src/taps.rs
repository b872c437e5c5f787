use num_complex::Complex32;
use std::io::Write;

/// Optional per-step dump sinks for offline inspection. All default to
/// `None` (no work done). Buffers are written as little-endian `f32`,
/// complex data interleaved re/im. Write failures are ignored; the taps
/// must never disturb the demodulation path.
#[derive(Default)]
pub struct DebugTaps {
    /// Raw input samples, one stride per step.
    pub raw: Option<Box<dyn Write + Send>>,
    /// Dechirped up-chirp block before windowing.
    pub up: Option<Box<dyn Write + Send>>,
    /// Dechirped up-chirp block after Kaiser windowing.
    pub up_windowed: Option<Box<dyn Write + Send>>,
    /// Dechirped down-chirp block.
    pub down: Option<Box<dyn Write + Send>>,
    /// Raw FFT output of the unwindowed block.
    pub fft: Option<Box<dyn Write + Send>>,
}

impl DebugTaps {
    pub(crate) fn dump_complex(sink: &mut Option<Box<dyn Write + Send>>, data: &[Complex32]) {
        if let Some(w) = sink {
            for v in data {
                let _ = w.write_all(&v.re.to_le_bytes());
                let _ = w.write_all(&v.im.to_le_bytes());
            }
        }
    }
}

impl std::fmt::Debug for DebugTaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugTaps")
            .field("raw", &self.raw.is_some())
            .field("up", &self.up.is_some())
            .field("up_windowed", &self.up_windowed.is_some())
            .field("down", &self.down.is_some())
            .field("fft", &self.fft.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn disabled_tap_writes_nothing() {
        let mut sink: Option<Box<dyn Write + Send>> = None;
        DebugTaps::dump_complex(&mut sink, &[Complex32::new(1.0, 2.0)]);
    }

    #[test]
    fn enabled_tap_frames_interleaved_f32() {
        let sink = SharedSink::default();
        let mut tap: Option<Box<dyn Write + Send>> = Some(Box::new(sink.clone()));
        DebugTaps::dump_complex(
            &mut tap,
            &[Complex32::new(1.0, -1.0), Complex32::new(0.5, 2.0)],
        );
        let bytes = sink.0.lock().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), -1.0);
        assert_eq!(f32::from_le_bytes(bytes[12..16].try_into().unwrap()), 2.0);
    }
}
