//! Sample-rate conversion helpers
//!
//! Linear interpolation is plenty for narrow-band FSK: the tones sit far
//! below Nyquist at every rate the modem accepts.

/// Mix interleaved stereo down to mono by averaging the channels.
///
/// # Panics
/// If `samples` does not hold an even number of samples.
pub fn stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    assert!(
        samples.len() % 2 == 0,
        "stereo audio must have an even number of samples"
    );

    samples
        .chunks(2)
        .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
        .collect()
}

/// Resample audio to a target rate using linear interpolation.
pub fn resample(samples: &[i16], from_rate: usize, to_rate: usize) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_length = (samples.len() as f64 * ratio).ceil() as usize;
    let mut resampled = Vec::with_capacity(new_length);

    for i in 0..new_length {
        let src = i as f64 / ratio;
        let lo = src.floor() as usize;
        let hi = lo + 1;
        let fraction = src - lo as f64;

        let value = if hi < samples.len() {
            samples[lo] as f64 * (1.0 - fraction) + samples[hi] as f64 * fraction
        } else {
            samples[lo.min(samples.len() - 1)] as f64
        };
        resampled.push(value.round() as i16);
    }

    resampled
}
