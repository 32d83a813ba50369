//! Desktop simulator for the SEEs particle detector.
//!
//! Runs the real `sees-core` instrument against a synthetic pulse generator
//! or a replayed voltage trace. Telemetry and operator notices go to stdout,
//! logs to stderr, and snaps are written under the data directory.
//!
//! # Commands (stdin, one per line)
//!
//! | Command | Action                                        |
//! |---------|-----------------------------------------------|
//! | snap    | Capture ±window around now                    |
//! | on      | Enable the live stream and its buffer file    |
//! | off     | Disable the live stream                       |
//!
//! Closing stdin ends the run once any pending snap has been written and sent.

mod fs_storage;
mod signal;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use clap::{Parser, ValueEnum};
use embassy_sync::channel::TrySendError;
use log::{debug, error, info, warn};

use sees_core::config::SeesConfig;
use sees_core::instrument::Instrument;
use sees_core::link::{COMMANDS, CommandLine};
use sees_core::record::{DenseRecord, RecordShape, SparseRecord, StorageMode};
use sees_core::status::StatusLed;
use sees_core::storage::{FileNaming, Storage};
use sees_core::telemetry::SerialLink;

use fs_storage::FsStorage;
use signal::{PulseGenerator, ReplaySource, Signal};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Snap and stream files, relative to the data directory.
const SNAP_DIR: &str = "snaps";

/// How long the fault indicator is shown before exiting.
const FAULT_DISPLAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// SEEs detector simulator
#[derive(Parser, Debug)]
#[command(name = "sees-simulator")]
#[command(version = "0.1.0")]
#[command(about = "Run the SEEs acquisition core on a simulated front-end", long_about = None)]
struct Args {
    /// Directory holding SEES.CFG, snaps and stream files
    #[arg(short, long, default_value = "sees-data")]
    data_dir: PathBuf,

    /// Replay voltages from a CSV trace instead of generating pulses
    #[arg(short, long, value_name = "CSV")]
    replay: Option<PathBuf>,

    /// Override the configured storage mode
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Mean synthetic hit rate
    #[arg(long, default_value_t = 20.0)]
    hits_per_sec: f32,

    /// Generator seed
    #[arg(long, default_value_t = 0x5EE5)]
    seed: u64,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f32>,

    /// Write the effective configuration to SEES.CFG and exit
    #[arg(long)]
    write_config: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Dense,
    Sparse,
}

impl From<ModeArg> for StorageMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Dense => StorageMode::Dense,
            ModeArg::Sparse => StorageMode::Sparse,
        }
    }
}

// ---------------------------------------------------------------------------
// Host peripherals
// ---------------------------------------------------------------------------

/// Free-running 32-bit microsecond counter, like the device timer.
struct Clock {
    start: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Truncation wraps the counter every ~71.6 minutes.
    fn now_us(&self) -> u32 {
        self.start.elapsed().as_micros() as u32
    }
}

/// Serial link on stdout.
struct StdoutLink {
    out: io::Stdout,
}

impl SerialLink for StdoutLink {
    fn send_line(&mut self, line: &str) -> bool {
        writeln!(self.out.lock(), "{}", line).is_ok()
    }
}

/// Status LED that reports its transitions through the log.
#[derive(Default)]
struct SimulatedLed;

impl embedded_hal::digital::ErrorType for SimulatedLed {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for SimulatedLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        debug!("LED off");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        debug!("LED on");
        Ok(())
    }
}

/// Forward stdin lines to the command queue. Sets `closed` at EOF.
fn spawn_stdin_reader(closed: Arc<AtomicBool>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let Ok(command) = CommandLine::try_from(line.trim_end()) else {
                warn!("Ignoring over-long command line");
                continue;
            };

            // The instrument drains the queue every loop pass.
            let mut pending = command;
            while let Err(TrySendError::Full(line)) = COMMANDS.try_send(pending) {
                pending = line;
                thread::sleep(Duration::from_millis(1));
            }
        }
        closed.store(true, Ordering::Release);
    });
}

// ---------------------------------------------------------------------------
// Instrument loop
// ---------------------------------------------------------------------------

fn run<R: RecordShape>(
    args: &Args,
    config: &SeesConfig,
    source: Signal,
    storage: FsStorage,
) -> anyhow::Result<()> {
    let clock = Clock::new();
    let mut led = StatusLed::new(SimulatedLed, config.heartbeat_ms);
    let link = StdoutLink { out: io::stdout() };

    let mut instrument: Instrument<R, _, _, _> =
        Instrument::new(config, source, link, storage, SNAP_DIR, FileNaming::Long);

    if let Err(e) = instrument.begin(clock.now_us()) {
        error!("Acquisition cannot start: {}", e);
        led.set_fault();
        let until = Instant::now() + FAULT_DISPLAY;
        while Instant::now() < until {
            let _ = led.update(clock.now_us() / 1_000);
            thread::sleep(Duration::from_millis(10));
        }
        bail!("ring store allocation failed: {}", e);
    }

    let input_closed = Arc::new(AtomicBool::new(false));
    spawn_stdin_reader(input_closed.clone());

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f32(secs.max(0.0)));

    loop {
        let now_us = clock.now_us();
        instrument.poll_commands(&COMMANDS, now_us);
        instrument.update(now_us);
        let _ = led.update(now_us / 1_000);

        let idle = instrument.snap_pending().is_none()
            && !instrument.snap_forwarding()
            && COMMANDS.is_empty();
        if idle && input_closed.load(Ordering::Acquire) {
            info!("Input closed; stopping");
            break;
        }
        if idle && deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run duration reached; stopping");
            break;
        }

        thread::yield_now();
    }

    instrument.shutdown();

    let acquisition = instrument.acquisition();
    info!(
        "{} samples ({} skipped), {} hits, {} retained records spanning {:.2} s, {} telemetry lines dropped",
        acquisition.samples_taken(),
        acquisition.samples_skipped(),
        acquisition.detector().cumulative_hits(),
        acquisition.store().len(),
        acquisition.store().time_span_secs(),
        acquisition.telemetry_dropped()
    );
    Ok(())
}

fn start(args: Args) -> anyhow::Result<()> {
    let mut storage = FsStorage::new(&args.data_dir);
    let mut config = SeesConfig::load_or_default(&mut storage);
    if let Some(mode) = args.mode {
        config.storage_mode = mode.into();
    }
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {}", e))?;

    if args.write_config {
        storage
            .create_dir("")
            .map_err(|e| anyhow!("{}", e))
            .and_then(|()| config.save(&mut storage).map_err(|e| anyhow!("{}", e)))
            .with_context(|| format!("failed to write config in {}", storage.root().display()))?;
        info!("Configuration written to {}", storage.root().display());
        return Ok(());
    }

    let source = match &args.replay {
        Some(path) => {
            let replay = ReplaySource::from_file(path, config.adc)?;
            info!("Replaying {} samples from {}", replay.len(), path.display());
            Signal::Replay(replay)
        }
        None => Signal::Pulses(PulseGenerator::new(
            config.adc,
            args.hits_per_sec,
            config.sample_interval_us,
            args.seed,
        )),
    };

    info!(
        "Sampling every {} us, {} mode, ±{} s snaps",
        config.sample_interval_us,
        config.storage_mode.label(),
        config.snap_window_secs
    );

    match config.storage_mode {
        StorageMode::Dense => run::<DenseRecord>(&args, &config, source, storage),
        StorageMode::Sparse => run::<SparseRecord>(&args, &config, source, storage),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let args = Args::parse();
    env_logger::init();
    info!("Starting SEEs simulator");

    if let Err(e) = start(args) {
        error!("{:#}", e);
        process::exit(1);
    }
}
