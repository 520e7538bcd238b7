//! # Inbound Audio Buffer
//!
//! Accumulates 16-bit PCM from a remote participant's track until an utterance
//! is handed to the transcriber. The room client writes into it from its reader
//! task while the transcriber drains it from a provider task, so the sample
//! queue sits behind a mutex.
//!
//! The buffer is bounded: once `max_seconds` of audio are queued the oldest
//! samples are discarded, which keeps a silent-but-open track from growing
//! without limit.

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Cursor;

/// Bounded FIFO of PCM samples for one remote track.
#[derive(Debug)]
pub struct AudioBuffer {
    samples: Mutex<VecDeque<i16>>,
    sample_rate: u32,
    max_samples: usize,
}

impl AudioBuffer {
    /// Create a buffer holding at most `max_seconds` of audio at `sample_rate`.
    ///
    /// ## Example:
    /// 30 seconds at 16kHz is 480,000 samples (about 940KB).
    pub fn new(sample_rate: u32, max_seconds: u32) -> Self {
        let max_samples = (sample_rate as usize * max_seconds as usize).max(1);

        Self {
            samples: Mutex::new(VecDeque::new()),
            sample_rate,
            max_samples,
        }
    }

    /// Append raw little-endian 16-bit PCM bytes.
    ///
    /// Returns the number of samples appended. Odd-length input is rejected
    /// because it cannot be split into whole samples.
    pub fn append_pcm_data(&self, data: &[u8]) -> Result<usize, String> {
        if data.is_empty() {
            return Ok(0);
        }
        if data.len() % 2 != 0 {
            return Err("Audio data length must be even for 16-bit samples".to_string());
        }

        let mut cursor = Cursor::new(data);
        let mut decoded = Vec::with_capacity(data.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            decoded.push(sample);
        }

        let mut samples = self.samples.lock();
        samples.extend(decoded.iter().copied());
        let overflow = samples.len().saturating_sub(self.max_samples);
        if overflow > 0 {
            samples.drain(..overflow);
        }

        Ok(decoded.len())
    }

    /// Remove and return everything buffered so far as one utterance.
    pub fn take_utterance(&self) -> Vec<i16> {
        let mut samples = self.samples.lock();
        samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Seconds of audio currently queued.
    pub fn duration_seconds(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}
