mod script;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::Parser;
use script::Script;
use sound_atari2600::Atari2600Sound;
use sound_c64::C64Sound;
use sound_core::apu::sid::passthrough::HardwareSink;
use sound_core::apu::SidEngine;
use sound_core::config::SoundConfig;
use sound_core::logging::{LogCategory, LogConfig, LogLevel};
use sound_core::AudioMachine;

#[derive(Parser)]
#[command(name = "chipsnd", about = "Render register-write scripts through emulated sound chips")]
struct Args {
    /// System to drive: "c64" or "atari2600"
    system: String,

    /// JSON register-write script
    script: PathBuf,

    /// Sound configuration file (JSON); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Raw signed 16-bit little-endian PCM output
    #[arg(long, default_value = "out.raw")]
    out: PathBuf,

    /// Frames to render after the last scripted write
    #[arg(long, default_value_t = 50)]
    tail: usize,

    /// Dump the final save state to this file as JSON
    #[arg(long)]
    save: Option<PathBuf>,

    /// C64 only: use the passthrough engine and write every register write
    /// it forwards to this file
    #[arg(long)]
    dump_writes: Option<PathBuf>,

    /// Core log level for all categories (off, error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Per-category core log level, e.g. "sid=debug" (repeatable)
    #[arg(long)]
    log_category: Vec<String>,

    /// Send core log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Suppress the summary line
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

/// Writes forwarded SID register writes as text lines
struct DumpSink {
    label: &'static str,
    out: Arc<Mutex<BufWriter<File>>>,
    failed: bool,
}

impl HardwareSink for DumpSink {
    fn name(&self) -> &str {
        "dump"
    }

    fn reset(&mut self) {}

    fn write(&mut self, cycle: u64, addr: u8, val: u8) {
        if self.failed {
            return;
        }
        let result = match self.out.lock() {
            Ok(mut out) => writeln!(out, "{} {:>10} ${:02X} ${:02X}", self.label, cycle, addr, val),
            Err(_) => return,
        };
        if let Err(e) = result {
            log::error!("Failed to write register dump: {}", e);
            self.failed = true;
        }
    }
}

fn configure_logging(args: &Args) -> Result<()> {
    let config = LogConfig::global();
    if let Some(level) = args.log_level.as_deref() {
        let Some(level) = LogLevel::from_str(level) else {
            bail!("Unknown log level: {}", level);
        };
        config.set_global_level(level);
    }
    for spec in &args.log_category {
        let Some((cat, level)) = spec.split_once('=') else {
            bail!("Expected CATEGORY=LEVEL, got {}", spec);
        };
        let (Some(cat), Some(level)) = (LogCategory::from_str(cat), LogLevel::from_str(level))
        else {
            bail!("Unknown log category or level: {}", spec);
        };
        config.set_level(cat, level);
    }
    if let Some(path) = args.log_file.as_ref() {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }
    Ok(())
}

fn build_c64(config: &SoundConfig, dump: Option<&PathBuf>) -> Result<C64Sound> {
    let Some(path) = dump else {
        return Ok(C64Sound::new(config)?);
    };
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let out = Arc::new(Mutex::new(BufWriter::new(file)));
    let sink = |label: &'static str| -> Box<dyn HardwareSink> {
        Box::new(DumpSink {
            label,
            out: Arc::clone(&out),
            failed: false,
        })
    };
    let left = SidEngine::passthrough(sink("L"));
    let right = config
        .sid
        .stereo_base
        .map(|_| SidEngine::passthrough(sink("R")));
    Ok(C64Sound::with_engines(config, left, right)?)
}

/// Feed the script frame by frame and stream the PCM out; returns the
/// number of sample frames written.
fn run<M: AudioMachine>(
    machine: &mut M,
    script: &Script,
    tail: usize,
    out: &mut impl Write,
) -> Result<usize> {
    let cycles_per_frame = machine.cycles_per_frame();
    let frames = script.frames(cycles_per_frame) + tail;
    let mut written = 0;
    let mut unmapped = 0usize;

    for frame in 0..frames {
        for (cycle, addr, val) in script.frame_writes(frame, cycles_per_frame) {
            if !machine.bus_write(addr, val, cycle) {
                unmapped += 1;
                log::debug!("Frame {}: ${:04X} is not a sound register", frame, addr);
            }
        }
        let audio = machine.step_frame()?;
        for sample in &audio.samples {
            out.write_all(&sample.to_le_bytes())?;
        }
        written += audio.frames();
    }
    if unmapped > 0 {
        log::warn!("{} script write(s) missed the sound chips", unmapped);
    }
    out.flush()?;
    Ok(written)
}

fn finish<M: AudioMachine>(machine: &M, args: &Args, written: usize, channels: usize, rate: u32) -> Result<()> {
    if let Some(path) = args.save.as_ref() {
        let state = machine.save_state();
        let mut f = File::create(path)?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }
    if !args.quiet {
        println!(
            "{}: {} sample frame(s), {} channel(s) at {} Hz -> {}",
            machine.system_name(),
            written,
            channels,
            rate,
            args.out.display()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    configure_logging(&args)?;

    let config = match args.config.as_ref() {
        Some(path) => SoundConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SoundConfig::default(),
    };
    let script = Script::load(&args.script)?;
    log::info!("Loaded {} write(s) from {}", script.len(), args.script.display());

    let file = File::create(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    let mut out = BufWriter::new(file);

    match args.system.as_str() {
        "c64" => {
            let mut sys = build_c64(&config, args.dump_writes.as_ref())?;
            let written = run(&mut sys, &script, args.tail, &mut out)?;
            let channels = sys.bus().channels();
            finish(&sys, &args, written, channels, config.sample_rate)?;
        }
        "atari2600" => {
            if args.dump_writes.is_some() {
                bail!("--dump-writes is only available for the c64");
            }
            let mut sys = Atari2600Sound::new(&config)?;
            let written = run(&mut sys, &script, args.tail, &mut out)?;
            finish(&sys, &args, written, config.tia.channels, config.sample_rate)?;
        }
        other => bail!("Unsupported system: {}", other),
    }

    Ok(())
}
