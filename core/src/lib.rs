//! Software modem for the ITU-T V.23 FSK channels
//!
//! Modulates a byte stream into 16-bit PCM audio and recovers bytes from
//! incoming audio with an integer-only DSP chain: coherent I/Q
//! downconversion, moving-average filtering, phase differentiation and
//! sign-based bit-timing recovery feeding an asynchronous framing state
//! machine with parity checking.

pub mod audio;
pub mod config;
pub mod demodulator;
pub mod dsp;
pub mod error;
pub mod frame;
pub mod maf;
pub mod modulator;
pub mod osc;
pub mod resample;

pub use config::{Channel, ModemConfig};
pub use demodulator::{DemodStats, Demodulator};
pub use error::{ModemError, Result};
pub use frame::FrameFormat;
pub use modulator::Modulator;
pub use osc::{Nco, SineTable};

// Configuration constants
pub const DEF_SAMPLE_RATE: usize = 44100;
pub const DEF_FRAME_FORMAT: &str = "10dddddddp1";
pub const DEF_AUDIO_LATENCY_MS: usize = 100;

/// Largest tolerated average bit-clock skew, as a fraction of a bit period.
pub const SKEW_LIMIT: f32 = 0.2;
/// Fraction of a measured timing error corrected per transition.
pub const SKEW_CORRECT_FACTOR: i32 = 3;
/// Consecutive frame errors after which output is suppressed.
pub const ERROR_LIMIT: i32 = 3;

/// Samples processed per demodulator block.
pub const BLOCK_SAMPLES: usize = 1024;
