//! FSK demodulator
//!
//! Per block of input samples the chain runs:
//!
//! ```text
//! audio -> mix with LO I/Q -> MAF -> atan2 -> d/dt -> MAF -> sign -> MAF
//!                                                     (out)         (timing)
//! ```
//!
//! The timing signal's zero crossings land mid-bit, so its sign changes
//! drive an adaptive bit clock; each expiry of that clock latches one bit
//! from the filtered phase slope into a shift register watched by the
//! framing state machine.

use std::io::Write;
use std::sync::Arc;

use log::{debug, trace};

use crate::config::ModemConfig;
use crate::dsp::{self, Differentiator};
use crate::error::{ModemError, Result};
use crate::maf::MovingAverage;
use crate::osc::{Nco, SineTable};
use crate::{BLOCK_SAMPLES, ERROR_LIMIT, SKEW_CORRECT_FACTOR};

/// Running frame counters, for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct DemodStats {
    pub good_frames: u64,
    pub parity_errors: u64,
    pub high_skew_drops: u64,
}

pub struct Demodulator {
    cfg: ModemConfig,
    lo: Nco,
    diff: Differentiator,
    maf_i: MovingAverage,
    maf_q: MovingAverage,
    maf_out: MovingAverage,
    maf_bit: MovingAverage,

    // Working buffers, one block each
    buf_i: Vec<i16>,
    buf_q: Vec<i16>,
    buf_ang: Vec<i16>,
    buf_work: Vec<i16>,
    buf_out: Vec<i16>,
    buf_sign: Vec<i16>,
    buf_timing: Vec<i16>,

    // Bit-timing recovery
    state: bool,
    line_idle: bool,
    bit_wait: i32,
    num_transitions: i32,
    total_skew: i32,

    // Framing
    shift: i32,
    frame_hold: i32,
    err_count: i32,
    err_timeout: i32,
    /// Meaning of a positive phase slope under the channel's tone order.
    positive_is_one: bool,

    stats: DemodStats,
    monitor: Option<Box<dyn Write + Send>>,
}

impl Demodulator {
    pub fn new(cfg: ModemConfig, table: Arc<SineTable>) -> Result<Self> {
        if table.len() != cfg.sample_rate {
            return Err(ModemError::TableRateMismatch {
                table: table.len(),
                rate: cfg.sample_rate,
            });
        }

        let input_maf = cfg.input_maf_len();
        debug!("LO centre freq: {} Hz", cfg.center_hz());
        debug!("IQ MAF:         {} samples", input_maf);
        debug!("null placed at: {} Hz", cfg.first_null_hz);

        let lo = Nco::new(table, cfg.center_hz());
        let spb = cfg.samples_per_bit;
        let frame_size = cfg.frame.frame_size as i32;
        Ok(Self {
            lo,
            diff: Differentiator::new(),
            maf_i: MovingAverage::new(input_maf),
            maf_q: MovingAverage::new(input_maf),
            maf_out: MovingAverage::new(spb),
            maf_bit: MovingAverage::new(spb),
            buf_i: vec![0; BLOCK_SAMPLES],
            buf_q: vec![0; BLOCK_SAMPLES],
            buf_ang: vec![0; BLOCK_SAMPLES],
            buf_work: vec![0; BLOCK_SAMPLES],
            buf_out: vec![0; BLOCK_SAMPLES],
            buf_sign: vec![0; BLOCK_SAMPLES],
            buf_timing: vec![0; BLOCK_SAMPLES],
            state: false,
            line_idle: true,
            bit_wait: spb as i32,
            num_transitions: 0,
            total_skew: 0,
            shift: -1,
            frame_hold: frame_size,
            err_count: 0,
            err_timeout: 0,
            positive_is_one: cfg.mark_hz <= cfg.space_hz,
            stats: DemodStats::default(),
            monitor: None,
            cfg,
        })
    }

    /// Mirror every processed block to `sink` as an interleaved 8-channel
    /// stream of native-endian i16: raw, I, Q, angle, work, out, sign,
    /// timing.
    pub fn set_monitor(&mut self, sink: Box<dyn Write + Send>) {
        self.monitor = Some(sink);
    }

    pub fn stats(&self) -> DemodStats {
        self.stats
    }

    /// Demodulate a batch of samples, returning the decoded bytes. The
    /// input is consumed in blocks of at most [`BLOCK_SAMPLES`].
    pub fn process(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        let mut decoded = Vec::new();
        for chunk in samples.chunks(BLOCK_SAMPLES) {
            self.process_block(chunk, &mut decoded)?;
        }
        Ok(decoded)
    }

    fn process_block(&mut self, input: &[i16], decoded: &mut Vec<u8>) -> Result<()> {
        let n = input.len();

        // Mix against the local oscillator and low-pass both arms.
        self.lo
            .get_complex_samples(&mut self.buf_i[..n], &mut self.buf_q[..n]);
        dsp::mul_samples(input, &self.buf_i[..n], &mut self.buf_work[..n]);
        self.maf_i
            .process(&self.buf_work[..n], &mut self.buf_i[..n], false);
        dsp::mul_samples(input, &self.buf_q[..n], &mut self.buf_work[..n]);
        self.maf_q
            .process(&self.buf_work[..n], &mut self.buf_q[..n], false);

        // Phase, phase slope, then smooth the slope over one bit period.
        dsp::ang_samples(&self.buf_i[..n], &self.buf_q[..n], &mut self.buf_ang[..n]);
        self.diff.process(&self.buf_ang[..n], &mut self.buf_work[..n]);
        self.maf_out
            .process(&self.buf_work[..n], &mut self.buf_out[..n], false);

        // Sign of the slope, integrated once more, gives the timing wave.
        dsp::sgn_samples(&self.buf_out[..n], &mut self.buf_sign[..n]);
        self.maf_bit
            .process(&self.buf_sign[..n], &mut self.buf_timing[..n], true);

        if let Some(sink) = self.monitor.as_mut() {
            write_interleaved(
                sink,
                &[
                    input,
                    &self.buf_i[..n],
                    &self.buf_q[..n],
                    &self.buf_ang[..n],
                    &self.buf_work[..n],
                    &self.buf_out[..n],
                    &self.buf_sign[..n],
                    &self.buf_timing[..n],
                ],
            )?;
        }

        self.recover_bits(n, decoded);
        Ok(())
    }

    /// Bit-timing recovery and framing over one filtered block.
    fn recover_bits(&mut self, n: usize, decoded: &mut Vec<u8>) {
        let spb = self.cfg.samples_per_bit as i32;

        for i in 0..n {
            let last = self.state;
            self.state = self.buf_timing[i] > 0;

            // A timing edge: re-align the bit clock.
            if last != self.state {
                let mut adj = if self.bit_wait > spb / 2 {
                    // We sampled early; stretch towards the next bit.
                    spb - self.bit_wait
                } else {
                    // We are about to sample late; pull back.
                    -self.bit_wait
                };
                trace!("transition, skew {} samples", adj);

                if self.line_idle {
                    // First edge after idle: take the full correction and
                    // leave its (arbitrarily large) skew uncounted.
                    self.line_idle = false;
                } else {
                    self.total_skew += adj.abs();
                    self.num_transitions += 1;

                    // Partial correction, always at least one sample in
                    // the right direction.
                    if adj > 0 {
                        adj = adj / SKEW_CORRECT_FACTOR + 1;
                    } else if adj < 0 {
                        adj = adj / SKEW_CORRECT_FACTOR - 1;
                    }
                }
                self.bit_wait += adj;
            }

            self.bit_wait -= 1;
            if self.bit_wait <= 0 {
                self.latch_bit(self.buf_out[i], decoded);
                self.bit_wait += spb;
            }
        }
    }

    /// Shift in one bit and run the framing state machine.
    fn latch_bit(&mut self, slope: i16, decoded: &mut Vec<u8>) {
        let bit = ((slope > 0) == self.positive_is_one) as i32;
        self.shift = (self.shift << 1) | bit;

        // A register of all ones or all zeros means the line is holding a
        // constant tone.
        if !self.line_idle && (self.shift == -1 || self.shift == 0) {
            self.line_idle = true;
            debug!("line idle ({:08x})", self.shift);
        }

        if !self.line_idle {
            self.frame_hold = self.frame_hold.saturating_sub(1);
            if self.frame_hold > 0 {
                trace!("frame hold ({} left)", self.frame_hold);
            } else if (self.shift as u32 & self.cfg.frame.frame_mask) == self.cfg.frame.frame_pattern
            {
                // We never want to rehandle this window.
                self.line_idle = true;

                let avg_skew = if self.num_transitions > 0 {
                    self.total_skew / self.num_transitions
                } else {
                    0
                };

                if avg_skew > self.cfg.max_skew {
                    debug!("dropping frame with high skew of {}", avg_skew);
                    self.stats.high_skew_drops += 1;
                    self.frame_error();
                } else {
                    match self.cfg.frame.decode(self.shift) {
                        Some(byte) => {
                            if self.err_count > 0 {
                                self.err_count -= 1;
                            }
                            self.stats.good_frames += 1;
                            if self.err_count < ERROR_LIMIT {
                                trace!("got byte {:#04x}, skew {}", byte, avg_skew);
                                decoded.push(byte);
                            } else {
                                debug!("suppressing frame during error burst");
                            }
                        }
                        None => {
                            debug!("dropping frame with bad parity");
                            self.stats.parity_errors += 1;
                            self.frame_error();
                            if self.err_count < ERROR_LIMIT {
                                if let Some(c) = self.cfg.err_char {
                                    decoded.push(c);
                                }
                            }
                        }
                    }
                }
            }
        }

        // On idle, reseed: keep one frame plus the overlap bit, restart the
        // skew accounting, and let the error counter decay.
        if self.line_idle {
            self.shift &= ((2u64 << self.cfg.frame.frame_size) - 1) as u32 as i32;
            self.total_skew = 0;
            self.num_transitions = 0;
            self.frame_hold = self.cfg.frame.frame_size as i32 - 1;
            if self.err_timeout > 0 {
                self.err_timeout -= 1;
            } else {
                self.err_count = 0;
            }
        }
    }

    fn frame_error(&mut self) {
        self.err_count += 1;
        self.err_timeout = 10 * self.cfg.frame.frame_size as i32;
    }
}

fn write_interleaved<W: Write + ?Sized>(sink: &mut W, channels: &[&[i16]; 8]) -> Result<()> {
    let n = channels[0].len();
    let mut record = [0u8; 16];
    for i in 0..n {
        for (j, ch) in channels.iter().enumerate() {
            record[j * 2..j * 2 + 2].copy_from_slice(&ch[i].to_ne_bytes());
        }
        sink.write_all(&record)?;
    }
    Ok(())
}
