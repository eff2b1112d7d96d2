//! FSK modulator
//!
//! A shift register drives the NCO between the mark and space tones, one
//! bit per `samples_per_bit` samples. The line opens with a full second of
//! mark tone so a listening demodulator settles into line-idle before the
//! first start bit, and it falls back to mark whenever no data is pending.

use std::sync::Arc;

use log::{debug, trace};

use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::osc::{Nco, SineTable};

pub struct Modulator {
    cfg: ModemConfig,
    nco: Nco,
    shift: u32,
    bits_left: usize,
    /// Mark-tone leader samples still owed before the first frame.
    leader: usize,
}

impl Modulator {
    pub fn new(cfg: ModemConfig, table: Arc<SineTable>) -> Result<Self> {
        if table.len() != cfg.sample_rate {
            return Err(ModemError::TableRateMismatch {
                table: table.len(),
                rate: cfg.sample_rate,
            });
        }

        let mark = cfg.mark_hz;
        let leader = cfg.sample_rate;
        Ok(Self {
            cfg,
            nco: Nco::new(table, mark),
            shift: 0,
            bits_left: 0,
            leader,
        })
    }

    pub fn samples_per_bit(&self) -> usize {
        self.cfg.samples_per_bit
    }

    /// True when the leader has been sent and no frame bits are pending,
    /// so the next byte can be loaded.
    pub fn ready_for_byte(&self) -> bool {
        self.leader == 0 && self.bits_left == 0
    }

    /// Frame one byte into the shift register. Any bits still pending are
    /// overwritten; call only when [`ready_for_byte`](Self::ready_for_byte)
    /// holds.
    pub fn load_byte(&mut self, byte: u8) {
        self.shift = self.cfg.frame.encode(byte);
        self.bits_left = self.cfg.frame.frame_size;
        debug!("frame for input {:#04x}: {:032b}", byte, self.shift);
    }

    /// Emit one bit period of samples. `out` must hold exactly
    /// `samples_per_bit` samples.
    pub fn next_block(&mut self, out: &mut [i16]) {
        assert_eq!(out.len(), self.cfg.samples_per_bit);

        if self.leader > 0 {
            self.leader = self.leader.saturating_sub(out.len());
            self.nco.set_frequency(self.cfg.mark_hz);
        } else if self.bits_left > 0 {
            let bit = self.shift & 0x8000_0000 != 0;
            trace!("sending bit {}", bit as u8);
            self.nco.set_frequency(if bit {
                self.cfg.mark_hz
            } else {
                self.cfg.space_hz
            });
            self.shift <<= 1;
            self.bits_left -= 1;
        } else {
            // Idle: hold mark.
            self.nco.set_frequency(self.cfg.mark_hz);
        }

        self.nco.get_samples(out);
    }

    /// Modulate a whole byte slice, including whatever leader is still
    /// owed. Convenient for file output and tests; the live path drives
    /// [`next_block`](Self::next_block) directly.
    pub fn modulate(&mut self, bytes: &[u8]) -> Vec<i16> {
        let spb = self.cfg.samples_per_bit;
        let leader_blocks = self.leader.div_ceil(spb);
        let blocks = leader_blocks + bytes.len() * self.cfg.frame.frame_size;

        let mut samples = vec![0i16; blocks * spb];
        let mut chunks = samples.chunks_exact_mut(spb);

        for _ in 0..leader_blocks {
            self.next_block(chunks.next().expect("leader block"));
        }
        for &byte in bytes {
            self.load_byte(byte);
            while self.bits_left > 0 {
                self.next_block(chunks.next().expect("frame block"));
            }
        }

        samples
    }

    /// Emit enough idle mark to flush the last frame through a
    /// demodulator's filter chain: `frame_size + 2` bit periods.
    pub fn flush(&mut self) -> Vec<i16> {
        let spb = self.cfg.samples_per_bit;
        let blocks = self.cfg.frame.frame_size + 2;
        let mut samples = vec![0i16; blocks * spb];
        for chunk in samples.chunks_exact_mut(spb) {
            self.next_block(chunk);
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Channel;
    use crate::frame::FrameFormat;
    use crate::DEF_FRAME_FORMAT;

    const RATE: usize = 44100;

    fn modulator() -> Modulator {
        let cfg = ModemConfig::new(
            Channel::Backward,
            RATE,
            FrameFormat::compile(DEF_FRAME_FORMAT).unwrap(),
        )
        .unwrap();
        let table = Arc::new(SineTable::new(32767.0, RATE).unwrap());
        Modulator::new(cfg, table).unwrap()
    }

    /// Estimate a block's tone by counting sign changes.
    fn dominant_hz(block: &[i16]) -> f64 {
        let crossings = block
            .windows(2)
            .filter(|w| (w[0] > 0) != (w[1] > 0))
            .count();
        crossings as f64 * RATE as f64 / (2.0 * block.len() as f64)
    }

    #[test]
    fn test_leader_is_one_second_of_mark() {
        let mut m = modulator();
        assert!(!m.ready_for_byte());

        let mut block = vec![0i16; m.samples_per_bit()];
        let mut leader_samples = 0;
        while !m.ready_for_byte() {
            m.next_block(&mut block);
            leader_samples += block.len();
            let hz = dominant_hz(&block);
            assert!((hz - 390.0).abs() < 30.0, "leader tone {} Hz", hz);
        }
        assert_eq!(leader_samples, RATE);
    }

    #[test]
    fn test_frame_bit_sequence_for_known_byte() {
        let mut m = modulator();
        // Swallow the leader.
        let mut block = vec![0i16; m.samples_per_bit()];
        while !m.ready_for_byte() {
            m.next_block(&mut block);
        }

        // 0x48 LSB-first with odd parity: start 0, data 0001001, parity 1,
        // stop 1.
        m.load_byte(0x48);
        let expected = [0u8, 0, 0, 0, 1, 0, 0, 1, 1, 1];
        for (i, &want) in expected.iter().enumerate() {
            m.next_block(&mut block);
            let hz = dominant_hz(&block);
            let bit = if (hz - 390.0).abs() < (hz - 450.0).abs() {
                1
            } else {
                0
            };
            assert_eq!(bit, want, "bit {} came out as {} Hz", i, hz);
        }
        assert!(m.ready_for_byte());
    }

    #[test]
    fn test_modulate_length() {
        let mut m = modulator();
        let samples = m.modulate(b"Hi");
        // One second of leader plus two ten-bit frames.
        assert_eq!(samples.len(), RATE + 2 * 10 * 588);

        // Once the leader is spent, further bytes are frames only.
        let more = m.modulate(b"!");
        assert_eq!(more.len(), 10 * 588);
    }

    #[test]
    fn test_idle_returns_to_mark() {
        let mut m = modulator();
        let _ = m.modulate(b"U");
        let idle = m.flush();
        assert_eq!(idle.len(), (10 + 2) * 588);
        let hz = dominant_hz(&idle[..588]);
        assert!((hz - 390.0).abs() < 30.0, "idle tone {} Hz", hz);
    }
}
