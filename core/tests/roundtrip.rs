//! Modulate-then-demodulate scenarios over a shared configuration.

use std::sync::Arc;

use v23modem_core::resample::resample;
use v23modem_core::{
    Channel, Demodulator, FrameFormat, ModemConfig, Modulator, SineTable, DEF_FRAME_FORMAT,
};

const RATE: usize = 44100;

fn table() -> Arc<SineTable> {
    Arc::new(SineTable::new(32767.0, RATE).unwrap())
}

fn config(channel: Channel, pattern: &str) -> ModemConfig {
    ModemConfig::new(channel, RATE, FrameFormat::compile(pattern).unwrap()).unwrap()
}

/// Modulate `bytes` plus enough trailing mark to flush the receive filters.
fn transmit(cfg: &ModemConfig, bytes: &[u8]) -> Vec<i16> {
    let mut modulator = Modulator::new(cfg.clone(), table()).unwrap();
    let mut samples = modulator.modulate(bytes);
    samples.extend(modulator.flush());
    samples
}

#[test]
fn test_hi_roundtrip_backward_channel() {
    let cfg = config(Channel::Backward, DEF_FRAME_FORMAT);
    let samples = transmit(&cfg, &[0x48, 0x69]);

    // One second of leader plus two frames at 75 baud.
    assert!(samples.len() >= RATE + 2 * 10 * 588);

    let mut demod = Demodulator::new(cfg, table()).unwrap();
    let out = demod.process(&samples).unwrap();
    assert_eq!(out, b"Hi");

    let stats = demod.stats();
    assert_eq!(stats.good_frames, 2);
    assert_eq!(stats.parity_errors, 0);
    assert_eq!(stats.high_skew_drops, 0);
}

#[test]
fn test_roundtrip_forward_channel() {
    let cfg = config(Channel::Forward, DEF_FRAME_FORMAT);
    let samples = transmit(&cfg, b"Hi");

    let mut demod = Demodulator::new(cfg, table()).unwrap();
    let out = demod.process(&samples).unwrap();
    assert_eq!(out, b"Hi");
}

#[test]
fn test_roundtrip_every_7bit_value() {
    let cfg = config(Channel::Backward, DEF_FRAME_FORMAT);
    let bytes: Vec<u8> = (0..0x80).collect();
    let samples = transmit(&cfg, &bytes);

    let mut demod = Demodulator::new(cfg, table()).unwrap();
    let out = demod.process(&samples).unwrap();
    assert_eq!(out, bytes);
    assert_eq!(demod.stats().good_frames, 128);
}

#[test]
fn test_roundtrip_every_byte_with_8_data_bits() {
    let cfg = config(Channel::Backward, "10dddddddd1");
    let bytes: Vec<u8> = (0..=255).collect();
    let samples = transmit(&cfg, &bytes);

    let mut demod = Demodulator::new(cfg, table()).unwrap();
    let out = demod.process(&samples).unwrap();
    assert_eq!(out, bytes);
}

#[test]
fn test_parity_flip_emits_error_char() {
    // An even-parity sender against an odd-parity receiver transmits the
    // same tones with the parity bit inverted in every frame.
    let sender = config(Channel::Backward, "10dddddddP1");
    let samples = transmit(&sender, &[0x41]);

    let receiver = config(Channel::Backward, DEF_FRAME_FORMAT).with_error_char(b'X');
    let mut demod = Demodulator::new(receiver, table()).unwrap();
    let out = demod.process(&samples).unwrap();
    assert_eq!(out, b"X");

    let stats = demod.stats();
    assert_eq!(stats.parity_errors, 1);
    assert_eq!(stats.good_frames, 0);
}

#[test]
fn test_error_limit_suppresses_output() {
    let sender = config(Channel::Backward, "10dddddddP1");
    let samples = transmit(&sender, &[0x41, 0x41, 0x41, 0x41]);

    let receiver = config(Channel::Backward, DEF_FRAME_FORMAT).with_error_char(b'X');
    let mut demod = Demodulator::new(receiver, table()).unwrap();
    let out = demod.process(&samples).unwrap();

    // The error counter is incremented before the limit check, so only the
    // first two broken frames produce the placeholder; the rest are
    // swallowed.
    assert_eq!(out, b"XX");
    assert_eq!(demod.stats().parity_errors, 4);
}

#[test]
fn test_idle_resync_recovers_after_error_burst() {
    let bad_sender = config(Channel::Backward, "10dddddddP1");
    let mut samples = transmit(&bad_sender, &[0x41, 0x41, 0x41]);

    // A fresh modulator's one-second leader is the idle tone that lets the
    // receiver resynchronize and decay its error state.
    let good_sender = config(Channel::Backward, DEF_FRAME_FORMAT);
    samples.extend(transmit(&good_sender, &[0x42]));

    let receiver = config(Channel::Backward, DEF_FRAME_FORMAT).with_error_char(b'X');
    let mut demod = Demodulator::new(receiver, table()).unwrap();
    let out = demod.process(&samples).unwrap();

    assert_eq!(out, b"XXB");
    let stats = demod.stats();
    assert_eq!(stats.parity_errors, 3);
    assert_eq!(stats.good_frames, 1);
}

#[test]
fn test_small_clock_offset_is_tracked() {
    let cfg = config(Channel::Backward, DEF_FRAME_FORMAT);
    let samples = transmit(&cfg, &[0x41]);

    // Stretch the clock by 5%: well inside the skew corrector's range.
    let stretched = resample(&samples, RATE, RATE * 105 / 100);

    let mut demod = Demodulator::new(cfg, table()).unwrap();
    let out = demod.process(&stretched).unwrap();
    assert_eq!(out, vec![0x41]);
    assert_eq!(demod.stats().good_frames, 1);
}

#[test]
fn test_large_clock_offset_is_rejected() {
    let cfg = config(Channel::Backward, DEF_FRAME_FORMAT);
    let samples = transmit(&cfg, &[0x41]);

    // Stretching scales the tones along with the bit clock: at +25% both
    // land below the local oscillator and no frame survives.
    let stretched = resample(&samples, RATE, RATE * 125 / 100);

    let mut demod = Demodulator::new(cfg, table()).unwrap();
    let out = demod.process(&stretched).unwrap();
    assert!(out.is_empty(), "decoded {:02x?}", out);
    assert_eq!(demod.stats().good_frames, 0);
}

#[test]
fn test_all_stops_pattern_keeps_line_idle() {
    let cfg = config(Channel::Backward, "1111111111");
    let samples = transmit(&cfg, &[0xFF, 0x00, 0x55]);

    let mut demod = Demodulator::new(cfg, table()).unwrap();
    let out = demod.process(&samples).unwrap();
    assert!(out.is_empty());

    let stats = demod.stats();
    assert_eq!(stats.good_frames, 0);
    assert_eq!(stats.parity_errors, 0);
    assert_eq!(stats.high_skew_drops, 0);
}

#[test]
fn test_process_is_chunking_insensitive() {
    let cfg = config(Channel::Backward, DEF_FRAME_FORMAT);
    let samples = transmit(&cfg, b"Hi");

    let mut whole = Demodulator::new(cfg.clone(), table()).unwrap();
    let expect = whole.process(&samples).unwrap();

    let mut pieces = Demodulator::new(cfg, table()).unwrap();
    let mut got = Vec::new();
    for chunk in samples.chunks(731) {
        got.extend(pieces.process(chunk).unwrap());
    }
    assert_eq!(got, expect);
    assert_eq!(got, b"Hi");
}
