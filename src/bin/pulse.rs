//! Pulse CLI - Command-line interface for Synheart Pulse
//!
//! Commands:
//! - simulate: Run the monitor against a synthetic sensor, printing NDJSON snapshots
//! - analyze: Run the pipeline offline over a recorded sample file
//! - config: Print the default configuration
//! - doctor: Diagnose configuration, filter design and input files

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use synheart_pulse::alarm::{AlarmGate, AlarmOutput};
use synheart_pulse::display::DisplayFrame;
use synheart_pulse::sensor::{load_samples, Pacing, SyntheticPpg};
use synheart_pulse::telemetry::{JsonLinesSink, TelemetryPublisher};
use synheart_pulse::{
    HrSpo2Estimate, HrvProgress, HrvResult, HrvState, Monitor, MonitorConfig, MonitorState,
    PulseError, SignalPipeline, SyntheticPpgSensor, PRODUCER_NAME, PULSE_VERSION,
};

/// Pulse - On-device PPG pipeline for heart rate, SpO2 and HRV
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author = "Synheart AI Inc")]
#[command(version = PULSE_VERSION)]
#[command(about = "Heart rate, SpO2 and HRV from two-channel PPG", long_about = None)]
struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. "debug" or "synheart_pulse=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor against a synthetic PPG sensor
    Simulate {
        /// Simulated pulse rate (bpm)
        #[arg(long, default_value = "72")]
        bpm: f64,

        /// How long to run (seconds)
        #[arg(long, default_value = "10")]
        seconds: f64,

        /// Snapshot print interval (milliseconds)
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Lift the finger after this many seconds of signal
        #[arg(long)]
        finger_off_after: Option<f64>,

        /// Release this many samples per poll instead of pacing in real time
        #[arg(long)]
        batch: Option<usize>,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Include the raw IR window in each snapshot
        #[arg(long)]
        with_window: bool,

        /// Acknowledge HRV results as soon as they are ready
        #[arg(long)]
        auto_ack: bool,

        /// Write telemetry messages (NDJSON) to this file
        #[arg(long)]
        telemetry: Option<PathBuf>,

        /// Device ID used in telemetry messages
        #[arg(long, default_value = "pulse-sim")]
        device_id: String,
    },

    /// Run the pipeline offline over a recorded sample file
    Analyze {
        /// Input file (.csv with `red,ir` rows, otherwise NDJSON `{"red":..,"ir":..}`)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Window hop (samples)
        #[arg(long, default_value = "25")]
        step: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as JSON
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Diagnose configuration and input health
    Doctor {
        /// Configuration file to validate
        #[arg(long)]
        config: Option<PathBuf>,

        /// Recorded sample file to check
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), PulseCliError> {
    match cli.command {
        Commands::Simulate {
            bpm,
            seconds,
            interval_ms,
            finger_off_after,
            batch,
            config,
            with_window,
            auto_ack,
            telemetry,
            device_id,
        } => cmd_simulate(SimulateArgs {
            bpm,
            seconds,
            interval_ms,
            finger_off_after,
            batch,
            config,
            with_window,
            auto_ack,
            telemetry,
            device_id,
        }),

        Commands::Analyze {
            input,
            config,
            step,
            json,
        } => cmd_analyze(&input, config.as_deref(), step, json),

        Commands::Config { output } => cmd_config(output.as_deref()),

        Commands::Doctor {
            config,
            input,
            json,
        } => cmd_doctor(config.as_deref(), input.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, PulseCliError> {
    match path {
        Some(path) => Ok(MonitorConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(MonitorConfig::default()),
    }
}

// ============================================================================
// simulate
// ============================================================================

struct SimulateArgs {
    bpm: f64,
    seconds: f64,
    interval_ms: u64,
    finger_off_after: Option<f64>,
    batch: Option<usize>,
    config: Option<PathBuf>,
    with_window: bool,
    auto_ack: bool,
    telemetry: Option<PathBuf>,
    device_id: String,
}

#[derive(Serialize)]
struct SimulateLine {
    elapsed_secs: f64,
    state: MonitorState,
    hrv_progress: HrvProgress,
    alarm: AlarmOutput,
    display: DisplayFrame,
}

fn cmd_simulate(args: SimulateArgs) -> Result<(), PulseCliError> {
    let config = load_config(args.config.as_deref())?;
    let sample_rate = config.pipeline.sample_rate_hz;

    let signal = SyntheticPpg {
        bpm: args.bpm,
        sample_rate_hz: sample_rate,
        finger_off_after: args
            .finger_off_after
            .map(|secs| (secs * sample_rate).round() as u64),
        ..Default::default()
    };
    let pacing = match args.batch {
        Some(size) => Pacing::Batch(size),
        None => Pacing::Realtime,
    };

    let mut publisher = match &args.telemetry {
        Some(path) => Some(TelemetryPublisher::new(
            args.device_id.as_str(),
            Box::new(JsonLinesSink::new(BufWriter::new(File::create(path)?))),
        )),
        None => None,
    };

    let stop_timeout = config.stop_timeout();
    let mut monitor = Monitor::new(config)?;
    monitor.start(SyntheticPpgSensor::new(signal, pacing))?;
    info!(bpm = args.bpm, seconds = args.seconds, "simulation started");

    let mut gate = AlarmGate::default();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let started = Instant::now();
    let run_for = Duration::from_secs_f64(args.seconds.max(0.0));
    let interval = Duration::from_millis(args.interval_ms.max(1));

    while started.elapsed() < run_for {
        thread::sleep(interval);
        let mut state = monitor.snapshot();
        let alarm = gate.update(state.bpm);
        if let Some(publisher) = publisher.as_mut() {
            publisher.publish(&state);
        }
        let display = DisplayFrame::from_snapshot(&state);
        let ready = state.hrv_state() == HrvState::Ready;
        if !args.with_window {
            state.ir_window.clear();
        }
        let status_terminal = state.status.is_terminal();

        let line = SimulateLine {
            elapsed_secs: started.elapsed().as_secs_f64(),
            state,
            hrv_progress: monitor.hrv_progress(),
            alarm,
            display,
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;

        if ready && args.auto_ack {
            monitor.acknowledge_hrv();
        }
        if status_terminal {
            break;
        }
    }
    out.flush()?;

    if !monitor.stop(stop_timeout).unwrap_or(false) {
        warn!("monitor did not stop cleanly");
    }
    if let Some(publisher) = publisher {
        let stats = publisher.stats();
        info!(sent = stats.sent, failed = stats.failed, "telemetry summary");
    }
    Ok(())
}

// ============================================================================
// analyze
// ============================================================================

#[derive(Serialize)]
struct WindowReport {
    start: usize,
    end: usize,
    #[serde(flatten)]
    estimate: HrSpo2Estimate,
}

#[derive(Serialize)]
struct AnalyzeReport {
    producer: String,
    version: String,
    samples: usize,
    sample_rate_hz: f64,
    duration_secs: f64,
    windows: Vec<WindowReport>,
    hrv: HrvResult,
}

fn cmd_analyze(
    input: &Path,
    config: Option<&Path>,
    step: usize,
    json: bool,
) -> Result<(), PulseCliError> {
    let config = load_config(config)?;
    let pipeline = SignalPipeline::new(config.pipeline.clone())?;
    let samples = load_samples(input)?;
    if samples.is_empty() {
        return Err(PulseCliError::NoSamples);
    }

    let ir: Vec<f64> = samples.iter().map(|s| s.ir).collect();
    let red: Vec<f64> = samples.iter().map(|s| s.red).collect();
    let window_len = config.pipeline.window_len;
    let step = step.max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    while start + window_len <= samples.len() {
        let end = start + window_len;
        windows.push(WindowReport {
            start,
            end,
            estimate: pipeline.estimate_hr_spo2(&ir[start..end], &red[start..end]),
        });
        start += step;
    }

    let sample_rate = config.pipeline.sample_rate_hz;
    let report = AnalyzeReport {
        producer: PRODUCER_NAME.to_string(),
        version: PULSE_VERSION.to_string(),
        samples: samples.len(),
        sample_rate_hz: sample_rate,
        duration_secs: samples.len() as f64 / sample_rate,
        windows,
        hrv: pipeline.estimate_hrv_from_buffer(&ir),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Pulse Analysis Report");
    println!("=====================");
    println!("Samples:  {} ({:.1} s at {} Hz)", report.samples, report.duration_secs, sample_rate);
    println!("Windows:  {}", report.windows.len());
    println!();
    for window in &report.windows {
        let hr = window
            .estimate
            .heart_rate
            .map(|hr| format!("{hr:.0} bpm"))
            .unwrap_or_else(|| "--".to_string());
        let spo2 = window
            .estimate
            .spo2
            .map(|spo2| format!("{spo2:.1} %"))
            .unwrap_or_else(|| "--".to_string());
        println!("  [{:>6}..{:>6}]  HR {:>8}  SpO2 {:>8}", window.start, window.end, hr, spo2);
    }
    println!();
    match report.hrv {
        HrvResult::Valid(metrics) => {
            println!("HRV:");
            println!("  RMSSD:     {} ms", metrics.rmssd);
            println!("  pNN50:     {} %", metrics.pnn50);
            println!("  Mean HR:   {} bpm", metrics.mean_hr);
            println!("  Intervals: {}", metrics.num_intervals);
        }
        HrvResult::Invalid => {
            println!("HRV: not available (recording too short or signal too weak)")
        }
    }
    Ok(())
}

// ============================================================================
// config
// ============================================================================

fn cmd_config(output: Option<&Path>) -> Result<(), PulseCliError> {
    let json = MonitorConfig::default().to_json()?;
    match output {
        Some(path) => fs::write(path, json + "\n")?,
        None => println!("{json}"),
    }
    Ok(())
}

// ============================================================================
// doctor
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

fn check(name: &str, status: CheckStatus, message: String) -> DoctorCheck {
    DoctorCheck {
        name: name.to_string(),
        status,
        message,
    }
}

fn cmd_doctor(
    config_path: Option<&Path>,
    input: Option<&Path>,
    json: bool,
) -> Result<(), PulseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(check(
        "pulse_version",
        CheckStatus::Ok,
        format!("Pulse version {PULSE_VERSION}"),
    ));

    let config = match config_path {
        None => {
            checks.push(check(
                "config",
                CheckStatus::Ok,
                "Using default configuration".to_string(),
            ));
            Some(MonitorConfig::default())
        }
        Some(path) if !path.exists() => {
            checks.push(check(
                "config",
                CheckStatus::Error,
                "Config file does not exist".to_string(),
            ));
            None
        }
        Some(path) => match fs::read_to_string(path)
            .map_err(PulseError::from)
            .and_then(|content| MonitorConfig::from_json(&content))
        {
            Ok(config) => {
                checks.push(check("config", CheckStatus::Ok, "Config file valid".to_string()));
                Some(config)
            }
            Err(e) => {
                checks.push(check("config", CheckStatus::Error, e.to_string()));
                None
            }
        },
    };

    if let Some(config) = &config {
        match SignalPipeline::new(config.pipeline.clone()) {
            Ok(pipeline) => {
                let filter = pipeline.filter();
                let status = if filter.is_stable() {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Error
                };
                checks.push(check(
                    "bandpass",
                    status,
                    format!(
                        "{} sections, {}-{} Hz at {} Hz, stable: {}",
                        filter.sections().len(),
                        config.pipeline.band_low_hz,
                        config.pipeline.band_high_hz,
                        config.pipeline.sample_rate_hz,
                        filter.is_stable()
                    ),
                ));
            }
            Err(e) => checks.push(check("bandpass", CheckStatus::Error, e.to_string())),
        }

        if config.hrv_duration_secs * config.pipeline.sample_rate_hz
            < config.pipeline.hrv_min_samples as f64
        {
            checks.push(check(
                "hrv_duration",
                CheckStatus::Warning,
                format!(
                    "{} s of collection at {} Hz is below the {} sample HRV minimum",
                    config.hrv_duration_secs,
                    config.pipeline.sample_rate_hz,
                    config.pipeline.hrv_min_samples
                ),
            ));
        }
    }

    if let Some(path) = input {
        match load_samples(path) {
            Ok(samples) if samples.is_empty() => {
                checks.push(check(
                    "input",
                    CheckStatus::Warning,
                    "Input file has no samples".to_string(),
                ))
            }
            Ok(samples) => checks.push(check(
                "input",
                CheckStatus::Ok,
                format!("{} sample pairs", samples.len()),
            )),
            Err(e) => checks.push(check("input", CheckStatus::Error, e.to_string())),
        }
    }

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        check("stdout", CheckStatus::Ok, "stdout is a TTY (interactive mode)".to_string())
    } else {
        check("stdout", CheckStatus::Ok, "stdout is a pipe (NDJSON output ready)".to_string())
    };
    checks.push(stdout_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PULSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Pulse Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PulseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
enum PulseCliError {
    Io(io::Error),
    Pulse(PulseError),
    Json(serde_json::Error),
    NoSamples,
    DoctorFailed,
}

impl From<io::Error> for PulseCliError {
    fn from(e: io::Error) -> Self {
        PulseCliError::Io(e)
    }
}

impl From<PulseError> for PulseCliError {
    fn from(e: PulseError) -> Self {
        PulseCliError::Pulse(e)
    }
}

impl From<serde_json::Error> for PulseCliError {
    fn from(e: serde_json::Error) -> Self {
        PulseCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PulseCliError> for CliError {
    fn from(e: PulseCliError) -> Self {
        match e {
            PulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PulseCliError::Pulse(PulseError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run 'pulse config' for a valid starting point".to_string()),
            },
            PulseCliError::Pulse(PulseError::ParseError(msg)) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some(
                    "Expected `red,ir` CSV rows or NDJSON {\"red\":..,\"ir\":..}".to_string(),
                ),
            },
            PulseCliError::Pulse(e) => CliError {
                code: "PULSE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            PulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PulseCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            PulseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}
