//! Modem configuration
//!
//! V.23 defines two FSK channels over a voice-grade line: a 1200 baud
//! forward channel and a 75 baud backward channel. A `ModemConfig` pins one
//! of them to a sample rate and frame format and derives the quantities the
//! DSP chain needs.

use crate::error::{ModemError, Result};
use crate::frame::FrameFormat;
use crate::SKEW_LIMIT;

/// Which V.23 channel to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// 1200 baud data channel: mark 1300 Hz, space 2100 Hz.
    Forward,
    /// 75 baud supervisory channel: mark 390 Hz, space 450 Hz.
    Backward,
}

impl Channel {
    pub fn mark_hz(self) -> usize {
        match self {
            Channel::Forward => 1300,
            Channel::Backward => 390,
        }
    }

    pub fn space_hz(self) -> usize {
        match self {
            Channel::Forward => 2100,
            Channel::Backward => 450,
        }
    }

    pub fn baud(self) -> usize {
        match self {
            Channel::Forward => 1200,
            Channel::Backward => 75,
        }
    }

    /// Where the input filter's first spectral null goes. The forward
    /// channel parks it between the backward channel's tones to reject
    /// them; the backward channel parks it just under its own band to
    /// shed low-frequency noise.
    pub fn first_null_hz(self) -> usize {
        match self {
            Channel::Forward => 1280,
            Channel::Backward => 60,
        }
    }
}

/// Everything the modulator and demodulator need to agree on.
#[derive(Clone, Debug)]
pub struct ModemConfig {
    pub sample_rate: usize,
    pub mark_hz: usize,
    pub space_hz: usize,
    pub baud: usize,
    pub first_null_hz: usize,
    pub samples_per_bit: usize,
    /// Largest acceptable average skew per frame, in samples.
    pub max_skew: i32,
    /// Byte emitted in place of a frame with bad parity, if any.
    pub err_char: Option<u8>,
    pub frame: FrameFormat,
}

impl ModemConfig {
    pub fn new(channel: Channel, sample_rate: usize, frame: FrameFormat) -> Result<Self> {
        let samples_per_bit = sample_rate / channel.baud();
        let input_maf = sample_rate / channel.first_null_hz();
        if samples_per_bit == 0 || input_maf == 0 || sample_rate < 4 {
            return Err(ModemError::InvalidSampleRate(sample_rate));
        }

        Ok(Self {
            sample_rate,
            mark_hz: channel.mark_hz(),
            space_hz: channel.space_hz(),
            baud: channel.baud(),
            first_null_hz: channel.first_null_hz(),
            samples_per_bit,
            max_skew: (sample_rate as f32 * SKEW_LIMIT / channel.baud() as f32) as i32,
            err_char: None,
            frame,
        })
    }

    pub fn with_error_char(mut self, c: u8) -> Self {
        self.err_char = Some(c);
        self
    }

    /// Local-oscillator frequency: the midpoint of the two tones.
    pub fn center_hz(&self) -> usize {
        (self.mark_hz + self.space_hz) / 2
    }

    /// Input moving-average length placing the first null at
    /// `first_null_hz`.
    pub fn input_maf_len(&self) -> usize {
        self.sample_rate / self.first_null_hz
    }
}
