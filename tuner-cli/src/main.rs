//! # Guitar Tuner - Terminal Front End
//!
//! Drives the tuner pipeline from the terminal. Commands are read line by line
//! from stdin and display events are written to stdout, so the output can be
//! piped into another program with `--json`. Diagnostics go to stderr.
//!
//! ## Architecture
//! - **Main Thread**: event loop over display events and user commands
//! - **Capture / Consumer Threads**: owned by [`tuner_core::Tuner`]
//! - **Input Thread**: blocking stdin reader feeding a channel

mod input;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::select;
use input::{HELP, UserCommand};
use render::Renderer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tuner_core::{
    AudioBackend, CpalBackend, EstimatorKind, GuitarString, SyntheticBackend, Tuner, TunerConfig,
};

#[derive(Parser)]
#[command(name = "tuner")]
#[command(about = "Real-time guitar tuner", long_about = None)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Requested sample rate in Hz
    #[arg(short, long)]
    sample_rate: Option<u32>,

    /// Samples per analysis frame
    #[arg(long)]
    hop_size: Option<usize>,

    /// Pitch estimation algorithm
    #[arg(short, long, value_enum)]
    estimator: Option<EstimatorArg>,

    /// Pin a string (E2, A, D, G, B, E4) instead of matching automatically
    #[arg(short, long)]
    target: Option<GuitarString>,

    /// Listen to a generated tone at this frequency instead of the microphone
    #[arg(long)]
    tone: Option<f32>,

    /// Write display events as JSON lines
    #[arg(long)]
    json: bool,

    /// Log level for diagnostics on stderr (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: LevelFilter,

    /// Start capturing immediately
    #[arg(short, long)]
    autostart: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EstimatorArg {
    Yin,
    Mcleod,
}

impl From<EstimatorArg> for EstimatorKind {
    fn from(arg: EstimatorArg) -> Self {
        match arg {
            EstimatorArg::Yin => EstimatorKind::Yin,
            EstimatorArg::Mcleod => EstimatorKind::McLeod,
        }
    }
}

impl Cli {
    /// Loads the configuration file, if any, and applies flag overrides.
    fn tuner_config(&self) -> Result<TunerConfig> {
        let mut config = match &self.config {
            Some(path) => TunerConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => TunerConfig::default(),
        };
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(hop) = self.hop_size {
            config.hop_size = hop;
        }
        if let Some(estimator) = self.estimator {
            config.estimator = estimator.into();
        }
        config.validate().context("invalid settings")?;
        Ok(config)
    }

    fn backend(&self) -> Arc<dyn AudioBackend> {
        match self.tone {
            Some(frequency) => {
                info!("[MAIN] Using a synthetic {} Hz tone", frequency);
                Arc::new(SyntheticBackend::new(frequency))
            }
            None => Arc::new(CpalBackend),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log)
        .with_target(false)
        .with_thread_names(true)
        .init();

    info!("[MAIN] Starting guitar tuner...");
    let config = cli.tuner_config()?;
    let (tuner, events) =
        Tuner::new(config, cli.backend()).context("failed to build the tuner pipeline")?;

    if let Some(string) = cli.target {
        tuner.select_target(Some(string));
    }
    let commands = input::spawn_stdin_reader().context("failed to read stdin")?;
    if cli.autostart {
        tuner.start_capture();
    } else {
        eprintln!("{}", HELP);
    }

    let mut renderer = Renderer::new(std::io::stdout().lock(), cli.json);
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => renderer.render(&event)?,
                Err(_) => break,
            },
            recv(commands) -> command => match command {
                Ok(UserCommand::Start) => {
                    tuner.start_capture();
                }
                Ok(UserCommand::Stop) => {
                    tuner.stop_capture();
                }
                Ok(UserCommand::Auto) => tuner.select_target(None),
                Ok(UserCommand::Select(string)) => tuner.select_target(Some(string)),
                Ok(UserCommand::Help) => eprintln!("{}", HELP),
                Ok(UserCommand::Quit) | Err(_) => break,
            },
        }
    }

    tuner.shutdown();
    // The consumer has exited; flush what it published on the way out.
    for event in events.try_iter() {
        if let Err(e) = renderer.render(&event) {
            warn!("[MAIN] Could not write final events: {}", e);
            break;
        }
    }
    info!("[MAIN] Tuner finished");
    Ok(())
}
