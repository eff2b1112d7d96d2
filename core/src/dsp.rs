//! Elementwise sample primitives
//!
//! Everything here is integer arithmetic on 16-bit samples. The magnitude
//! and arctangent approximations are load-bearing: the demodulator's filter
//! responses depend on their exact rounding, so they must not be swapped
//! for floating-point equivalents.

use log::warn;

/// Multiply two sample streams with Q15 scaling: `a * b / 32768`, saturated
/// to ±32767. Clipping is logged.
pub fn mul_samples(a: &[i16], b: &[i16], out: &mut [i16]) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.len(), out.len());

    for i in 0..a.len() {
        let mut product = (a[i] as i32 * b[i] as i32) / 32768;
        if product > 32767 {
            warn!("mul: clipped");
            product = 32767;
        } else if product < -32767 {
            warn!("mul: clipped");
            product = -32767;
        }
        out[i] = product as i16;
    }
}

/// Subtract two sample streams at half magnitude: `a/2 - b/2`. Halving
/// keeps the difference inside the 16-bit range.
pub fn sub_samples(a: &[i16], b: &[i16], out: &mut [i16]) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.len(), out.len());

    for i in 0..a.len() {
        out[i] = a[i] / 2 - b[i] / 2;
    }
}

/// Sign of each sample: +1, 0 or -1.
pub fn sgn_samples(input: &[i16], out: &mut [i16]) {
    assert_eq!(input.len(), out.len());

    for (x, y) in input.iter().zip(out.iter_mut()) {
        *y = x.signum();
    }
}

/// Fast vector magnitude of an I/Q pair: `15 * (max + min/2) / 16`,
/// saturated at 32767. Accurate to a few percent without a square root.
pub fn mag_samples(i_in: &[i16], q_in: &[i16], out: &mut [i16]) {
    assert_eq!(i_in.len(), q_in.len());
    assert_eq!(i_in.len(), out.len());

    for k in 0..i_in.len() {
        let x = (i_in[k] as i32).abs();
        let y = (q_in[k] as i32).abs();
        let mag = 15 * (x.max(y) + x.min(y) / 2) / 16;

        out[k] = if mag > 32767 {
            warn!("mag: clipped");
            32767
        } else {
            mag as i16
        };
    }
}

/// Integer arctangent of an I/Q pair in units of 1/65536 revolution, so
/// the 16-bit output wraps exactly once per cycle.
///
/// The two branches meet continuously (mod 65536) on the |x| = |y|
/// diagonals; the 16384 offset in the second branch swaps quadrants to
/// make that so.
pub fn ang_samples(i_in: &[i16], q_in: &[i16], out: &mut [i16]) {
    assert_eq!(i_in.len(), q_in.len());
    assert_eq!(i_in.len(), out.len());

    for k in 0..i_in.len() {
        let x = i_in[k] as i32;
        let y = q_in[k] as i32;

        if x == 0 && y == 0 {
            out[k] = 0;
            continue;
        }

        let angle = if x.abs() > y.abs() {
            let a = (8192 * y) / x;
            if x < 0 {
                a + 32768
            } else {
                a
            }
        } else {
            let a = 16384 - (8192 * x) / y;
            if y < 0 {
                a + 32768
            } else {
                a
            }
        };

        out[k] = angle as i16;
    }
}

/// First difference with persistent state, in wrapping 16-bit arithmetic.
///
/// The wraparound matters: phase angles overflow once per cycle, and the
/// modular subtraction turns that into small correctly-signed differences.
pub struct Differentiator {
    last: i16,
}

impl Differentiator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn process(&mut self, input: &[i16], out: &mut [i16]) {
        assert_eq!(input.len(), out.len());

        let mut last = self.last;
        for (x, y) in input.iter().zip(out.iter_mut()) {
            *y = x.wrapping_sub(last);
            last = *x;
        }
        self.last = last;
    }
}

impl Default for Differentiator {
    fn default() -> Self {
        Self::new()
    }
}
