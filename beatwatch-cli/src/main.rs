//! `beatwatch`: listen on the default input device and report beats live.
//!
//! Exit codes: `0` on a clean run or `--help`, `1` on bad arguments,
//! initialization failure or a runtime error.

mod args;

use std::process::ExitCode;

use anyhow::Context;
use beatwatch_core::audio::AudioTransport;
use beatwatch_core::{
    shutdown, BeatDetector, ConsoleRenderer, DetectorConfig, EnergyEngine, EventSink, LogSink,
    Shutdown,
};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use args::{Options, ParseError};

enum Failure {
    Init(anyhow::Error),
    Runtime(anyhow::Error),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("beatwatch_core=info,beatwatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    let program = args::program_name(argv.first().map(String::as_str));

    let options = match args::parse_args(argv.iter().skip(1)) {
        Ok(options) => options,
        Err(ParseError::Help) => {
            print!("{}", args::usage(&program));
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("Error: {err}");
            eprint!("{}", args::usage(&program));
            return ExitCode::from(1);
        }
    };

    init_tracing();

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Init(err)) => {
            eprintln!("Init error: {err:#}");
            ExitCode::from(1)
        }
        Err(Failure::Runtime(err)) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(options: &Options) -> Result<(), Failure> {
    let config = options.to_config();

    let coordinator = Shutdown::install()
        .context("shutdown coordinator")
        .map_err(Failure::Init)?;
    ctrlc::set_handler(shutdown::signal)
        .context("failed to install SIGINT/SIGTERM handler")
        .map_err(Failure::Init)?;

    let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
    if config.logging {
        let now = Utc::now();
        let path = LogSink::file_name(now);
        let log = LogSink::create(&path, now)
            .context("cannot open beat log")
            .map_err(Failure::Init)?;
        println!("Logging to: {path}");
        sinks.push(Box::new(log));
    }
    sinks.push(Box::new(ConsoleRenderer::stdout(config.visual)));

    let transport = open_transport().map_err(Failure::Init)?;
    detect(options, config, transport, sinks, coordinator)
}

#[cfg(feature = "audio-cpal")]
fn open_transport() -> anyhow::Result<beatwatch_core::CpalTransport> {
    Ok(beatwatch_core::CpalTransport::new())
}

#[cfg(not(feature = "audio-cpal"))]
fn open_transport() -> anyhow::Result<beatwatch_core::audio::mock::MockTransport> {
    anyhow::bail!("built without an audio backend (enable the `audio-cpal` feature)")
}

fn detect<T: AudioTransport>(
    options: &Options,
    config: DetectorConfig,
    transport: T,
    sinks: Vec<Box<dyn EventSink>>,
    coordinator: Shutdown,
) -> Result<(), Failure> {
    let engine = EnergyEngine::new(config.buffer_size, config.sample_rate);
    let mut detector = BeatDetector::new(config, transport, Box::new(engine), sinks, coordinator);
    detector
        .initialize()
        .map_err(|e| Failure::Init(e.into()))?;

    print_banner(detector.config());

    let summary = detector.run().map_err(|e| Failure::Runtime(e.into()))?;
    info!(state = %detector.state(), "detector finished");
    drop(detector);

    println!();
    if options.json_summary {
        let json = serde_json::to_string_pretty(&summary)
            .context("serialize summary")
            .map_err(Failure::Runtime)?;
        println!("{json}");
    } else {
        print!("{summary}");
    }
    println!("Cleanup complete - All resources freed!");
    Ok(())
}

fn print_banner(config: &DetectorConfig) {
    let mark = |on: bool| if on { "✓" } else { "✗" };
    println!("Beat Detector Started!");
    println!("Buffer size: {} samples", config.buffer_size);
    println!("Sample rate: {} Hz", config.sample_rate);
    println!("Features enabled:");
    println!("  Logging: {}", mark(config.logging));
    println!("  Statistics: {}", mark(config.stats));
    println!("  Pitch detection: {}", mark(config.pitch));
    println!("  Visual feedback: {}", mark(config.visual));
    println!();
    println!("Listening for beats... Press Ctrl+C to stop.");
    println!();
}
