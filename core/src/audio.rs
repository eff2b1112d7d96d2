//! Audio device streams
//!
//! The DSP loop sees a blocking byte-at-a-time contract: pull PCM from the
//! capture device, push PCM to the playback device. Behind it, a cpal
//! callback thread exchanges samples with the DSP thread through a bounded
//! ring sized for twice the configured latency and pre-filled half-full
//! with silence.
//!
//! Input overruns drop samples but are remembered as a gap that is
//! re-injected as silence, so the demodulator briefly loses signal without
//! ever losing time alignment. Output underruns play silence.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::warn;

use crate::error::{ModemError, Result};

#[derive(Clone, Debug)]
pub struct AudioSettings {
    /// Device name as reported by the backend; `None` for the default.
    pub device: Option<String>,
    pub sample_rate: usize,
    pub latency_ms: usize,
}

impl AudioSettings {
    pub fn new(device: Option<String>, sample_rate: usize, latency_ms: usize) -> Self {
        Self {
            device,
            sample_rate,
            latency_ms,
        }
    }

    fn ring_capacity(&self) -> usize {
        (2 * self.latency_ms * self.sample_rate / 1000).max(1)
    }

    fn stream_config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate as u32),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

/// Bounded SPSC sample queue with blocking ends for the DSP thread and
/// lossy ends for the realtime callback.
struct Ring {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

struct RingState {
    queue: VecDeque<i16>,
    /// Samples dropped on overrun, owed to the reader as silence.
    gap: usize,
    underruns: u64,
    closed: bool,
}

impl Ring {
    fn new(capacity: usize, prefill: usize) -> Arc<Self> {
        let mut queue = VecDeque::with_capacity(capacity);
        queue.extend(std::iter::repeat(0i16).take(prefill.min(capacity)));
        Arc::new(Self {
            state: Mutex::new(RingState {
                queue,
                gap: 0,
                underruns: 0,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        })
    }

    /// Capture callback: enqueue what fits, account the rest as a gap.
    fn push_or_drop(&self, data: &[i16]) {
        let mut st = self.state.lock().unwrap();
        // Materialize an earlier gap first so sample order is preserved.
        while st.gap > 0 && st.queue.len() < self.capacity {
            st.queue.push_back(0);
            st.gap -= 1;
        }
        for &s in data {
            if st.queue.len() < self.capacity {
                st.queue.push_back(s);
            } else {
                st.gap += 1;
            }
        }
        drop(st);
        self.readable.notify_one();
    }

    /// DSP read: block until at least one sample (or a gap) is available.
    /// Returns 0 only once the ring is closed and drained.
    fn pop_blocking(&self, buf: &mut [i16]) -> usize {
        let mut st = self.state.lock().unwrap();
        while st.queue.is_empty() && st.gap == 0 {
            if st.closed {
                return 0;
            }
            st = self.readable.wait(st).unwrap();
        }

        let mut n = 0;
        while n < buf.len() {
            if let Some(s) = st.queue.pop_front() {
                buf[n] = s;
            } else if st.gap > 0 {
                st.gap -= 1;
                buf[n] = 0;
                if n == 0 {
                    warn!("audio overrun: reading dropped samples as silence");
                }
            } else {
                break;
            }
            n += 1;
        }
        drop(st);
        self.writable.notify_one();
        n
    }

    /// DSP write: block while the ring is full.
    fn push_blocking(&self, data: &[i16]) {
        let mut st = self.state.lock().unwrap();
        for &s in data {
            while st.queue.len() >= self.capacity && !st.closed {
                st = self.writable.wait(st).unwrap();
            }
            if st.closed {
                break;
            }
            st.queue.push_back(s);
        }
        let underruns = std::mem::take(&mut st.underruns);
        drop(st);
        if underruns > 0 {
            warn!("audio underrun: played {} samples of silence", underruns);
        }
        self.readable.notify_one();
    }

    /// Playback callback: dequeue what is there, pad with silence.
    fn pop_or_silence(&self, out: &mut [i16]) {
        let mut st = self.state.lock().unwrap();
        let mut n = 0;
        while n < out.len() {
            match st.queue.pop_front() {
                Some(s) => out[n] = s,
                None => break,
            }
            n += 1;
        }
        if n < out.len() {
            out[n..].fill(0);
            st.underruns += (out.len() - n) as u64;
        }
        drop(st);
        self.writable.notify_one();
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

fn backend_err<E: std::fmt::Display>(e: E) -> ModemError {
    ModemError::AudioBackend(e.to_string())
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| ModemError::AudioBackend("no default input device".into())),
        Some(wanted) => host
            .input_devices()
            .map_err(backend_err)?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| ModemError::AudioBackend(format!("input device {:?} not found", wanted))),
    }
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| ModemError::AudioBackend("no default output device".into())),
        Some(wanted) => host
            .output_devices()
            .map_err(backend_err)?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| {
                ModemError::AudioBackend(format!("output device {:?} not found", wanted))
            }),
    }
}

/// Blocking mono i16 capture stream.
pub struct AudioInput {
    _stream: cpal::Stream,
    ring: Arc<Ring>,
}

impl AudioInput {
    pub fn open(settings: &AudioSettings) -> Result<Self> {
        let device = find_input_device(settings.device.as_deref())?;
        let capacity = settings.ring_capacity();
        let ring = Ring::new(capacity, capacity / 2);

        let cb_ring = Arc::clone(&ring);
        let stream = device
            .build_input_stream(
                &settings.stream_config(),
                move |data: &[i16], _: &cpal::InputCallbackInfo| cb_ring.push_or_drop(data),
                |err| warn!("audio input stream error: {}", err),
                None,
            )
            .map_err(backend_err)?;
        stream.play().map_err(backend_err)?;

        Ok(Self {
            _stream: stream,
            ring,
        })
    }

    /// Read up to `buf.len()` samples, blocking until at least one is
    /// available. Returns 0 at end of stream.
    pub fn read(&mut self, buf: &mut [i16]) -> usize {
        self.ring.pop_blocking(buf)
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.ring.close();
    }
}

/// Blocking mono i16 playback stream.
pub struct AudioOutput {
    _stream: cpal::Stream,
    ring: Arc<Ring>,
}

impl AudioOutput {
    pub fn open(settings: &AudioSettings) -> Result<Self> {
        let device = find_output_device(settings.device.as_deref())?;
        let capacity = settings.ring_capacity();
        let ring = Ring::new(capacity, capacity / 2);

        let cb_ring = Arc::clone(&ring);
        let stream = device
            .build_output_stream(
                &settings.stream_config(),
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| cb_ring.pop_or_silence(data),
                |err| warn!("audio output stream error: {}", err),
                None,
            )
            .map_err(backend_err)?;
        stream.play().map_err(backend_err)?;

        Ok(Self {
            _stream: stream,
            ring,
        })
    }

    /// Write all of `buf`, blocking while the ring is full.
    pub fn write(&mut self, buf: &[i16]) {
        self.ring.push_blocking(buf);
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.ring.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_prefilled_half_full() {
        let ring = Ring::new(100, 50);
        let mut buf = [1i16; 100];
        let n = ring.pop_blocking(&mut buf);
        assert_eq!(n, 50);
        assert!(buf[..50].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_ring_preserves_order() {
        let ring = Ring::new(8, 0);
        ring.push_or_drop(&[1, 2, 3]);
        ring.push_or_drop(&[4, 5]);
        let mut buf = [0i16; 8];
        let n = ring.pop_blocking(&mut buf);
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ring_overrun_becomes_silent_gap() {
        let ring = Ring::new(4, 0);
        ring.push_or_drop(&[7; 6]);

        let mut buf = [9i16; 6];
        let n = ring.pop_blocking(&mut buf);
        assert_eq!(n, 6);
        // Four real samples, then the two dropped ones come back as zeros.
        assert_eq!(&buf[..6], &[7, 7, 7, 7, 0, 0]);
    }

    #[test]
    fn test_ring_close_unblocks_reader() {
        let ring = Ring::new(4, 0);
        let reader = Arc::clone(&ring);
        let handle = std::thread::spawn(move || {
            let mut buf = [0i16; 4];
            reader.pop_blocking(&mut buf)
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        ring.close();
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn test_ring_playback_pads_with_silence() {
        let ring = Ring::new(8, 0);
        ring.push_blocking(&[5, 6]);
        let mut out = [1i16; 4];
        ring.pop_or_silence(&mut out);
        assert_eq!(out, [5, 6, 0, 0]);
        assert_eq!(ring.state.lock().unwrap().underruns, 2);
    }
}
