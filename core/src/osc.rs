//! Sine table and numerically controlled oscillator
//!
//! One precomputed cycle of a sine wave drives every oscillator in the
//! modem. The table length equals the sample rate, so an NCO frequency in
//! Hz maps directly to a phase increment of one table entry per Hz.

use std::sync::Arc;

use crate::error::{ModemError, Result};

/// One full cycle of a sine wave, scaled to a peak amplitude and quantized
/// to 16-bit samples. Immutable after construction and shared read-only by
/// all oscillators.
pub struct SineTable {
    samples: Vec<i16>,
}

impl SineTable {
    /// Build a table of `len` samples with the given peak amplitude.
    ///
    /// `len` must be at least 4 so the quarter-wave cosine offset used by
    /// [`Nco::get_complex_samples`] is representable.
    pub fn new(amplitude: f32, len: usize) -> Result<Self> {
        if len < 4 {
            return Err(ModemError::InvalidSampleRate(len));
        }

        let samples = (0..len)
            .map(|i| {
                let x = 2.0 * std::f64::consts::PI * i as f64 / len as f64;
                let s = (amplitude as f64 * x.sin()).round();
                s.clamp(i16::MIN as f64, i16::MAX as f64) as i16
            })
            .collect();

        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn at(&self, phase: usize) -> i16 {
        self.samples[phase]
    }

    /// Write samples starting at `phase`, advancing by `freq_hz` entries per
    /// sample. Returns the phase after the last sample.
    fn run(&self, mut phase: usize, freq_hz: usize, out: &mut [i16]) -> usize {
        let len = self.samples.len();
        for s in out.iter_mut() {
            *s = self.at(phase);
            phase += freq_hz;
            while phase >= len {
                phase -= len;
            }
        }
        phase
    }
}

/// Numerically controlled oscillator: an integer phase accumulator over a
/// shared [`SineTable`]. The frequency may be changed at any sample
/// boundary; the phase is continuous across calls.
pub struct Nco {
    table: Arc<SineTable>,
    phase: usize,
    freq_hz: usize,
}

impl Nco {
    pub fn new(table: Arc<SineTable>, freq_hz: usize) -> Self {
        Self {
            table,
            phase: 0,
            freq_hz,
        }
    }

    pub fn frequency(&self) -> usize {
        self.freq_hz
    }

    pub fn set_frequency(&mut self, freq_hz: usize) {
        self.freq_hz = freq_hz;
    }

    /// Fill `out` with sine samples, advancing the stored phase.
    pub fn get_samples(&mut self, out: &mut [i16]) {
        self.phase = self.table.run(self.phase, self.freq_hz, out);
    }

    /// Fill `i_out` (cosine) and `q_out` (sine) simultaneously.
    ///
    /// The quadrature channel uses the stored phase so the sine stays
    /// exactly continuous across calls; the in-phase channel is rebuilt a
    /// quarter wave ahead on every call and its phase is not persisted.
    pub fn get_complex_samples(&mut self, i_out: &mut [i16], q_out: &mut [i16]) {
        let quarter = (self.phase + self.table.len() / 4) % self.table.len();
        self.table.run(quarter, self.freq_hz, i_out);
        self.phase = self.table.run(self.phase, self.freq_hz, q_out);
    }
}
