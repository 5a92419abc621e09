use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wavesend_core::{
    build_transmit_signal, decode_received_signal, ChunkedFileSender, ModemMode, ReceiverEvent,
    StreamingReceiver, CHUNK_THRESHOLD, SAMPLE_RATE,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// QPSK on the standard profile.
    Qpsk,
    /// 16-QAM on the standard profile.
    Qam16,
    /// BPSK on the acoustic profile.
    BpskAcoustic,
    /// BPSK with 3x repetition on the acoustic profile.
    BpskRepeat,
    /// BPSK with 3x repetition on the narrowband profile.
    BpskNarrow,
}

impl From<Mode> for ModemMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Qpsk => ModemMode::Qpsk,
            Mode::Qam16 => ModemMode::Qam16,
            Mode::BpskAcoustic => ModemMode::BpskAcoustic,
            Mode::BpskRepeat => ModemMode::BpskRepeat,
            Mode::BpskNarrow => ModemMode::BpskNarrow,
        }
    }
}

#[derive(Parser)]
#[command(name = "wavesend")]
#[command(about = "Acoustic file-transfer modem: files to audio and back")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file into a modem WAV. Files above the chunk threshold go
    /// out as a chunked burst, smaller ones as a single packet.
    Encode {
        /// Input file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Modulation mode (must match the decoder)
        #[arg(short, long, value_enum, default_value = "qpsk")]
        mode: Mode,
    },

    /// Decode a single-packet capture back into the original file.
    Decode {
        /// Input WAV capture
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output directory for the recovered file
        #[arg(value_name = "OUTDIR", default_value = ".")]
        outdir: PathBuf,

        /// Modulation mode (must match the encoder)
        #[arg(short, long, value_enum, default_value = "qpsk")]
        mode: Mode,
    },

    /// Run a capture through the streaming receiver, recovering chunked
    /// bursts and legacy packets alike.
    StreamDecode {
        /// Input WAV capture
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output directory for recovered files
        #[arg(value_name = "OUTDIR", default_value = ".")]
        outdir: PathBuf,

        /// Modulation mode (must match the encoder)
        #[arg(short, long, value_enum, default_value = "qpsk")]
        mode: Mode,

        /// Feed block size in samples
        #[arg(long, default_value = "4096")]
        block: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode {
            input,
            output,
            mode,
        } => encode_command(&input, &output, mode.into()),
        Commands::Decode {
            input,
            outdir,
            mode,
        } => decode_command(&input, &outdir, mode.into()),
        Commands::StreamDecode {
            input,
            outdir,
            mode,
            block,
        } => stream_decode_command(&input, &outdir, mode.into(), block),
    }
}

fn encode_command(input: &Path, output: &Path, mode: ModemMode) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file.bin".to_string());

    let samples = if data.len() > CHUNK_THRESHOLD {
        info!(size = data.len(), "chunked burst");
        let sender = ChunkedFileSender::new(&name, data, mode)?;
        let mut sink = wavesend_core::host::LoopbackAudio::new();
        sender.send(&mut sink)?;
        sink.samples().to_vec()
    } else {
        info!(size = data.len(), "single packet");
        build_transmit_signal(&data, mode, &name)?.samples
    };

    write_wav(output, &samples)?;
    info!(
        seconds = samples.len() as f64 / SAMPLE_RATE as f64,
        output = %output.display(),
        "encoded"
    );
    Ok(())
}

fn decode_command(input: &Path, outdir: &Path, mode: ModemMode) -> Result<()> {
    let samples = read_wav(input)?;
    let decoded = decode_received_signal(&samples, mode)?;
    if !decoded.crc_valid {
        bail!("checksum mismatch; refusing to write {}", decoded.file_name);
    }

    let path = outdir.join(&decoded.file_name);
    fs::write(&path, &decoded.data).with_context(|| format!("write {}", path.display()))?;
    info!(file = %path.display(), bytes = decoded.data.len(), "decoded");
    Ok(())
}

fn stream_decode_command(input: &Path, outdir: &Path, mode: ModemMode, block: usize) -> Result<()> {
    let samples = read_wav(input)?;
    let mut receiver = StreamingReceiver::new(mode)?;

    let mut recovered = 0usize;
    for chunk in samples.chunks(block.max(1)) {
        for event in receiver.feed(chunk)? {
            match event {
                ReceiverEvent::Metadata {
                    name,
                    total_chunks,
                    ..
                } => info!(name = %name, total_chunks, "incoming file"),
                ReceiverEvent::Chunk { seq, crc_ok } => {
                    if !crc_ok {
                        tracing::warn!(seq, "chunk failed checksum");
                    }
                }
                ReceiverEvent::Complete { name, data }
                | ReceiverEvent::LegacyFile {
                    name,
                    data,
                    crc_valid: true,
                } => {
                    let path = outdir.join(&name);
                    fs::write(&path, &data)
                        .with_context(|| format!("write {}", path.display()))?;
                    info!(file = %path.display(), bytes = data.len(), "recovered");
                    recovered += 1;
                }
                ReceiverEvent::LegacyFile { name, .. } => {
                    tracing::warn!(name = %name, "legacy packet failed checksum, skipped");
                }
            }
        }
    }

    if recovered == 0 {
        bail!("no complete file recovered from {}", input.display());
    }
    Ok(())
}

fn write_wav(path: &Path, samples: &[f32]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("create {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn read_wav(path: &Path) -> Result<Vec<f32>> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("open {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE as u32 {
        bail!(
            "expected {} Hz capture, got {} Hz",
            SAMPLE_RATE,
            spec.sample_rate
        );
    }

    let channels = spec.channels as usize;
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    // Mix down to mono if the capture is multi-channel.
    if channels > 1 {
        Ok(samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect())
    } else {
        Ok(samples)
    }
}
