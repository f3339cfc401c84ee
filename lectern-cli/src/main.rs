// Lectern command line interface
// Narrates text files and articles with synchronized word highlighting

mod config;
mod narrate;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use config::LecternConfig;
use lectern_core::{Article, QueueItem};
use lectern_player::{PlaybackController, QueueManager, RepeatMode, SimulatedAudioOutput};
use lectern_spk::{estimate_duration, synthesize_timings, SpeechGenerator};
use narrate::Narrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Lectern - narrated reading with word-by-word highlighting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Narrate files (plain text, or article JSON) and/or inline text
    Play {
        /// Files to queue, in order
        files: Vec<PathBuf>,

        /// Inline text to queue after the files
        #[arg(long, short)]
        text: Option<String>,

        /// Playback rate
        #[arg(long, short)]
        rate: Option<f64>,

        /// Voice identifier
        #[arg(long)]
        voice: Option<String>,

        /// Repeat mode (off, one, all)
        #[arg(long, default_value = "off")]
        repeat: RepeatMode,

        /// Shuffle the queue before starting
        #[arg(long)]
        shuffle: bool,
    },

    /// Print the synthesized word timing table for a text file as JSON
    Timings {
        /// Text file
        file: PathBuf,

        /// Clip length in seconds (estimated from the text when omitted)
        #[arg(long, short)]
        duration: Option<f64>,
    },

    /// List the voices offered by the configured engine
    Voices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    let mut config = LecternConfig::load(cli.config.as_deref())?;
    config.apply_env();

    match cli.command {
        Commands::Play {
            files,
            text,
            rate,
            voice,
            repeat,
            shuffle,
        } => {
            if let Some(rate) = rate {
                config.playback.default_rate = rate;
            }
            if let Some(voice) = voice {
                config.speech.voice.id = voice;
            }
            config.validate()?;
            play(config, files, text, repeat, shuffle).await
        }
        Commands::Timings { file, duration } => timings(&file, duration).await,
        Commands::Voices => {
            config.validate()?;
            voices(config).await
        }
    }
}

/// Logs go to stderr so narrated words own stdout. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn play(
    config: LecternConfig,
    files: Vec<PathBuf>,
    text: Option<String>,
    repeat: RepeatMode,
    shuffle: bool,
) -> anyhow::Result<()> {
    let mut items = Vec::new();
    for file in &files {
        items.extend(read_items(file).await?);
    }
    if let Some(text) = text {
        items.push(QueueItem::custom("Text", text)?);
    }
    if items.is_empty() {
        bail!("Nothing to read: pass one or more files or --text");
    }

    let generator = Arc::new(SpeechGenerator::new(config.speech.clone())?);
    info!("Using {} speech engine", generator.engine_name());

    let output = Arc::new(SimulatedAudioOutput::from_config(&config.playback));
    let controller = PlaybackController::new(config.playback.clone(), output)?;
    let (mut manager, handle) = QueueManager::new(config.queue.clone(), generator, controller)?;

    manager.add_all(items)?;
    manager.set_repeat(repeat);
    if shuffle {
        manager.toggle_shuffle();
    }
    manager.play_from(0)?;

    let mut events = handle.subscribe_playback();
    let mut snapshots = handle.watch();
    let runner = tokio::spawn(manager.run());
    let mut narrator = Narrator::new();

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => narrator.on_event(&event)?,
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} playback events", skipped),
                Err(RecvError::Closed) => break Ok(()),
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(error) = snapshot.audio_error {
                    break Err(anyhow!("Stopped: {}", error));
                }
                if narrator.on_snapshot(&snapshot)? {
                    info!("Reached the end of the queue");
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
        }
    };

    if let Err(e) = handle.shutdown().await {
        warn!("Queue manager already stopped: {}", e);
    }
    runner.await.context("Queue manager task failed")?;
    outcome
}

/// A `.json` file is read as an extracted article (one item per section),
/// anything else as one plain-text item titled after the file
async fn read_items(path: &Path) -> anyhow::Result<Vec<QueueItem>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        let article: Article = serde_json::from_str(&content)
            .with_context(|| format!("{} is not an article", path.display()))?;
        let items = article.queue_items();
        if items.is_empty() {
            warn!("{} has no readable content", path.display());
        }
        return Ok(items);
    }

    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(vec![QueueItem::custom(title, content)?])
}

async fn timings(path: &Path, duration: Option<f64>) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let duration = match duration {
        Some(d) if d.is_finite() && d > 0.0 => d,
        Some(d) => bail!("Duration must be a positive number of seconds, got {}", d),
        None => estimate_duration(&text, 1.0),
    };

    let table = synthesize_timings(&text, duration);
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

async fn voices(config: LecternConfig) -> anyhow::Result<()> {
    let generator = SpeechGenerator::new(config.speech)?;
    let voices = generator.list_voices().await?;

    if voices.is_empty() {
        println!("{} engine does not list voices", generator.engine_name());
        return Ok(());
    }
    for voice in voices {
        println!("{}", voice);
    }
    Ok(())
}
