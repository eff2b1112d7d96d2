use std::error::Error;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use clap::{Parser, ValueEnum};
use log::info;

use v23modem_core::audio::{AudioInput, AudioOutput, AudioSettings};
use v23modem_core::resample::{resample, stereo_to_mono};
use v23modem_core::{
    Channel, Demodulator, FrameFormat, ModemConfig, Modulator, SineTable, BLOCK_SAMPLES,
    DEF_AUDIO_LATENCY_MS, DEF_FRAME_FORMAT, DEF_SAMPLE_RATE,
};

#[derive(Parser)]
#[command(name = "v23modem")]
#[command(about = "V.23 FSK modem over the sound card or WAV files")]
#[command(version)]
struct Opt {
    /// Modulate stdin into audio, or demodulate audio onto stdout
    #[arg(short, long, value_enum, default_value_t = Mode::Demodulate)]
    mode: Mode,

    /// Which V.23 channel to run
    #[arg(short, long, value_enum, default_value_t = ChannelArg::Backward)]
    channel: ChannelArg,

    /// Sample rate in Hz
    #[arg(short = 'r', long, default_value_t = DEF_SAMPLE_RATE)]
    sample_rate: usize,

    /// Modulation amplitude in dB below full scale
    #[arg(short = 'A', long, default_value_t = 0.0)]
    attenuation: f32,

    /// Character emitted in place of a frame with bad parity
    #[arg(short, long)]
    error_char: Option<char>,

    /// Frame format pattern over the characters 0 1 d D p P
    #[arg(short, long, default_value = DEF_FRAME_FORMAT)]
    frame_format: String,

    /// Write the demodulator's 8-channel debug stream to stdout
    /// (decoded bytes move to stderr)
    #[arg(short = 'M', long)]
    monitor: bool,

    /// Audio device name; the default device if omitted
    #[arg(short = 'D', long)]
    device: Option<String>,

    /// Audio latency in milliseconds
    #[arg(short = 'L', long, default_value_t = DEF_AUDIO_LATENCY_MS)]
    latency: usize,

    /// Demodulate from a WAV file instead of the audio device
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Modulate into a WAV file instead of the audio device
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// More diagnostics on stderr (repeatable)
    #[arg(short = 'd', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Modulate,
    Demodulate,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    Forward,
    Backward,
}

impl From<ChannelArg> for Channel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Forward => Channel::Forward,
            ChannelArg::Backward => Channel::Backward,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let opt = Opt::parse();

    stderrlog::new()
        .verbosity(2 + opt.verbose as usize)
        .quiet(opt.quiet)
        .init()?;

    let frame = FrameFormat::compile(&opt.frame_format)?;
    let channel: Channel = opt.channel.into();
    let mut cfg = ModemConfig::new(channel, opt.sample_rate, frame)?;
    if let Some(c) = opt.error_char {
        cfg = cfg.with_error_char(c as u8);
    }

    info!(
        "{} the {} channel",
        match opt.mode {
            Mode::Modulate => "modulating",
            Mode::Demodulate => "demodulating",
        },
        match channel {
            Channel::Forward => "forward",
            Channel::Backward => "backward",
        }
    );
    info!("mark frequency:  {} Hz", cfg.mark_hz);
    info!("space frequency: {} Hz", cfg.space_hz);
    info!("bit period:      {} samples", cfg.samples_per_bit);
    info!("max skew:        {} samples", cfg.max_skew);
    info!(
        "frame size:      {} bits, format {}",
        cfg.frame.frame_size, opt.frame_format
    );
    info!("sample rate:     {} Hz", cfg.sample_rate);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    match opt.mode {
        Mode::Demodulate => demodulate(&opt, cfg, &running),
        Mode::Modulate => modulate(&opt, cfg, &running),
    }
}

fn demodulate(opt: &Opt, cfg: ModemConfig, running: &AtomicBool) -> Result<(), Box<dyn Error>> {
    // The demodulator's mixer is scaled for a full-scale reference tone,
    // whatever -A says.
    let table = Arc::new(SineTable::new(32767.0, cfg.sample_rate)?);
    let mut demod = Demodulator::new(cfg.clone(), table)?;

    let mut byte_out: Box<dyn Write> = if opt.monitor {
        demod.set_monitor(Box::new(io::stdout()));
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };

    if let Some(path) = &opt.input {
        let samples = read_wav(path, cfg.sample_rate)?;
        for chunk in samples.chunks(BLOCK_SAMPLES) {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let bytes = demod.process(chunk)?;
            byte_out.write_all(&bytes)?;
            byte_out.flush()?;
        }
    } else {
        let settings = AudioSettings::new(opt.device.clone(), cfg.sample_rate, opt.latency);
        let mut audio = AudioInput::open(&settings)?;
        let mut block = vec![0i16; BLOCK_SAMPLES];

        while running.load(Ordering::SeqCst) {
            let n = audio.read(&mut block);
            if n == 0 {
                info!("audio stream ended");
                break;
            }
            let bytes = demod.process(&block[..n])?;
            byte_out.write_all(&bytes)?;
            byte_out.flush()?;
        }
    }

    let stats = demod.stats();
    info!(
        "frames: {} good, {} parity errors, {} dropped for skew",
        stats.good_frames, stats.parity_errors, stats.high_skew_drops
    );
    Ok(())
}

fn modulate(opt: &Opt, cfg: ModemConfig, running: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let amplitude = 32767.0 / 10f32.powf(opt.attenuation / 20.0);
    if opt.attenuation != 0.0 {
        info!(
            "amplitude {:.0} ({} dB below full scale)",
            amplitude, opt.attenuation
        );
    }

    let table = Arc::new(SineTable::new(amplitude, cfg.sample_rate)?);
    let mut modulator = Modulator::new(cfg.clone(), table)?;

    if let Some(path) = &opt.output {
        // File mode: take stdin to end-of-stream and render it in one go.
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;

        let mut samples = modulator.modulate(&data);
        samples.extend(modulator.flush());
        write_wav(path, cfg.sample_rate, &samples)?;
        info!(
            "wrote {} bytes as {} samples to {}",
            data.len(),
            samples.len(),
            path.display()
        );
    } else {
        let bytes = spawn_stdin_reader();
        let settings = AudioSettings::new(opt.device.clone(), cfg.sample_rate, opt.latency);
        let mut audio = AudioOutput::open(&settings)?;
        let mut block = vec![0i16; cfg.samples_per_bit];

        while running.load(Ordering::SeqCst) {
            if modulator.ready_for_byte() {
                if let Ok(byte) = bytes.try_recv() {
                    modulator.load_byte(byte);
                }
            }
            modulator.next_block(&mut block);
            audio.write(&block);
        }
    }
    Ok(())
}

/// Feed stdin through a channel so the bit loop can poll for bytes without
/// ever blocking mid-stream.
fn spawn_stdin_reader() -> mpsc::Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut byte = [0u8; 1];
        loop {
            match stdin.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(byte[0]).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn read_wav(path: &Path, target_rate: usize) -> Result<Vec<i16>, Box<dyn Error>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    info!(
        "read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let mut samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader.samples::<i16>().collect::<Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(format!(
                "unsupported WAV format: {} bits per sample",
                spec.bits_per_sample
            )
            .into())
        }
    };

    match spec.channels {
        1 => {}
        2 => samples = stereo_to_mono(&samples),
        n => return Err(format!("unsupported channel count: {}", n).into()),
    }

    if spec.sample_rate as usize != target_rate {
        info!(
            "resampling from {} Hz to {} Hz",
            spec.sample_rate, target_rate
        );
        samples = resample(&samples, spec.sample_rate as usize, target_rate);
    }

    Ok(samples)
}

fn write_wav(path: &Path, sample_rate: usize, samples: &[i16]) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
