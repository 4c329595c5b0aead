//! Command-line front end for the illumicell experiment engine.
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use illumicell::adapters::SerialTransport;
use illumicell::config::{Settings, DEFAULT_CONFIG_PATH};
use illumicell::engine::{Elapsed, Engine, EngineEvent, StepProgress};
use illumicell::experiment::{file, Queue, Step};
use illumicell::logging;
use illumicell::protocol::{self, Command};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "illumicell")]
#[command(about = "Run light-stimulation experiments on a serial light controller")]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the steps of an experiment file and its total duration
    Show { file: PathBuf },
    /// Print the frames a run of the experiment would transmit
    Encode { file: PathBuf },
    /// Append steps such as `on:30s:50`, `off:1m`, `pulse:10s:5:80` or
    /// `adv:1h:200:800:60` to an experiment file
    Compose {
        out: PathBuf,
        #[arg(required = true)]
        steps: Vec<String>,
    },
    /// Load experiment files in order and run them on the device
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Serial port, overriding the configuration
        #[arg(long, short)]
        port: Option<String>,

        /// Baud rate, overriding the configuration
        #[arg(long, short)]
        baud: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Show { file } => show(&file),
        Commands::Encode { file } => encode(&file),
        Commands::Compose { out, steps } => compose(&out, &steps),
        Commands::Run { files, port, baud } => {
            if let Some(port) = port {
                settings.device.port = port;
            }
            if let Some(baud) = baud {
                settings.device.baud_rate = baud;
            }
            settings.validate()?;
            logging::init(&settings.application)?;
            run(settings, &files).await
        }
    }
}

fn load_queue(path: &Path) -> Result<Queue> {
    let steps = file::load(path)
        .with_context(|| format!("Failed to load experiment {}", path.display()))?;
    Ok(Queue::from(steps))
}

fn show(path: &Path) -> Result<()> {
    let queue = load_queue(path)?;
    for line in queue.summary_lines() {
        println!("{}", line);
    }
    println!("Total: {}", Elapsed::from_duration(queue.total_duration()));
    Ok(())
}

fn encode(path: &Path) -> Result<()> {
    let queue = load_queue(path)?;
    for step in &queue {
        print!("{}", protocol::encode(step));
    }
    print!("{}", Command::AllOff);
    Ok(())
}

fn compose(out: &Path, notation: &[String]) -> Result<()> {
    let mut steps = if out.exists() {
        file::load(out).with_context(|| format!("Failed to load {}", out.display()))?
    } else {
        Vec::new()
    };
    for text in notation {
        let step: Step = text
            .parse()
            .with_context(|| format!("Invalid step '{}'", text))?;
        steps.push(step);
    }
    file::save(out, &steps).with_context(|| format!("Failed to save {}", out.display()))?;
    println!("{} steps written to {}", steps.len(), out.display());
    Ok(())
}

async fn run(settings: Settings, files: &[PathBuf]) -> Result<()> {
    let transport = SerialTransport::open(&settings.device).await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (engine, task) = Engine::new(settings, transport, events_tx).spawn();

    for path in files {
        let count = engine
            .load(path)
            .await
            .with_context(|| format!("Failed to load experiment {}", path.display()))?;
        info!("Loaded {} steps from {}", count, path.display());
    }

    let summary = engine.run().await.context("Failed to start the run")?;
    info!(
        run_id = %summary.run_id,
        steps = summary.steps,
        total_secs = summary.total_duration.as_secs(),
        "Run started"
    );

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EngineEvent::StepProgress { index, state: StepProgress::InProgress }) => {
                    info!("Step {} in progress", index + 1);
                }
                Some(EngineEvent::Elapsed(elapsed)) => info!("Elapsed {}", elapsed),
                Some(EngineEvent::SampleAppended(sample)) => {
                    info!(index = sample.sequence_index, value = sample.value, "Sensor");
                }
                Some(EngineEvent::RunFinished) => break Ok(()),
                Some(EngineEvent::RunFaulted(reason)) => break Err(reason),
                Some(_) => {}
                None => break Err("engine stopped unexpectedly".to_string()),
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; stopping the run");
                if let Err(e) = engine.stop().await {
                    error!("Stop failed: {}", e);
                }
                break Ok(());
            }
        }
    };

    engine.shutdown().await?;
    task.await.context("Engine task panicked")?;

    match outcome {
        Ok(()) => Ok(()),
        Err(reason) => bail!("Run aborted: {}", reason),
    }
}
