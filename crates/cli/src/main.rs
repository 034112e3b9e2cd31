use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lavoe_core::{
    BackendClient, Config, GenerationStatus, OutputEngine, PlaybackEvent, Session, generate_track,
    render_timeline, write_wav,
};
use lavoe_transport::{TICK_MEASURES, tick_period};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timeline playback and arrangement tools
#[derive(Parser)]
#[command(name = "lavoe")]
#[command(about = "Play, export and generate tracks for a measure-based arrangement")]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the config
    #[arg(long, global = true)]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play an arrangement through the default output device
    Play {
        /// Arrangement file; a fresh arrangement is used when omitted
        arrangement: Option<PathBuf>,

        /// Audio files to add as new tracks before playing
        #[arg(long = "add")]
        files: Vec<PathBuf>,

        /// Measure to start from
        #[arg(long)]
        from: Option<f64>,

        /// Stop after this many measures instead of waiting for Ctrl-C
        #[arg(long)]
        measures: Option<f64>,

        #[arg(long)]
        bpm: Option<f64>,
    },

    /// Render an arrangement to a WAV file
    Export {
        arrangement: PathBuf,
        output: PathBuf,

        #[arg(long)]
        sample_rate: Option<u32>,

        #[arg(long)]
        channels: Option<u16>,
    },

    /// Show what an arrangement contains without decoding its audio
    Info { arrangement: PathBuf },

    /// Generate a track from a text prompt
    Generate { prompt: String },

    /// Upload an audio file to the backend
    Upload { file: PathBuf },

    /// Download a stored track
    Import {
        track_id: String,
        output: PathBuf,
    },

    /// Create a tempo-changed copy of a stored track
    Speed { track_id: String, factor: f64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }

    match cli.command {
        Commands::Play {
            arrangement,
            files,
            from,
            measures,
            bpm,
        } => play(config, arrangement.as_deref(), &files, from, measures, bpm).await,
        Commands::Export {
            arrangement,
            output,
            sample_rate,
            channels,
        } => export(
            &arrangement,
            &output,
            sample_rate.unwrap_or(config.export_sample_rate),
            channels.unwrap_or(config.export_channels),
        ),
        Commands::Info { arrangement } => info(&arrangement),
        Commands::Generate { prompt } => generate(&config, &prompt).await,
        Commands::Upload { file } => upload(&config, &file).await,
        Commands::Import { track_id, output } => import(&config, &track_id, &output).await,
        Commands::Speed { track_id, factor } => {
            let derived = backend(&config)?.adjust_speed(&track_id, factor).await?;
            println!("Created track {derived}");
            Ok(())
        }
    }
}

fn backend(config: &Config) -> Result<BackendClient> {
    BackendClient::new(config.backend_url.clone(), config.request_timeout())
        .context("Failed to create backend client")
}

async fn play(
    config: Config,
    arrangement: Option<&Path>,
    files: &[PathBuf],
    from: Option<f64>,
    measures: Option<f64>,
    bpm: Option<f64>,
) -> Result<()> {
    let device = OutputEngine::open().context("Failed to open audio output")?;

    let mut session = match arrangement {
        Some(path) => {
            let (session, offline) = Session::from_project(path, config, Box::new(device))
                .with_context(|| format!("Failed to open {}", path.display()))?;
            for missing in offline {
                println!(
                    "Audio offline: {} ({})",
                    missing.path.display(),
                    missing.error
                );
            }
            session
        }
        None => Session::with_default_tracks(config, Box::new(device))?,
    };

    for file in files {
        session
            .add_file(file)
            .with_context(|| format!("Failed to add {}", file.display()))?;
    }
    if let Some(bpm) = bpm {
        session.set_bpm(bpm);
    }
    if let Some(from) = from {
        session.scrub(from);
    }

    let limit = measures.map(|m| tick_period(session.bpm()).mul_f64(m.max(0.0) / TICK_MEASURES));
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    println!(
        "Playing at {} bpm from measure {}",
        session.bpm(),
        session.position()
    );
    session.play();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            event = session.next_event() => match event {
                Some(event) => report(&event),
                None => break,
            },
        }
    }

    session.stop();
    println!("Stopped at measure {}", session.position());
    Ok(())
}

fn report(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::Playing { track, block } => {
            tracing::debug!(%track, %block, "block playing");
        }
        PlaybackEvent::Failed {
            track,
            block,
            error,
        } => {
            println!("Track {track} could not play block {block}: {error}");
        }
        PlaybackEvent::Superseded { .. } => {}
    }
}

fn export(arrangement: &Path, output: &Path, sample_rate: u32, channels: u16) -> Result<()> {
    let loaded = lavoe_project::load_project(arrangement)
        .with_context(|| format!("Failed to open {}", arrangement.display()))?;
    for missing in &loaded.offline {
        println!("Skipping offline audio: {}", missing.path.display());
    }

    let buffer = render_timeline(&loaded.timeline, loaded.bpm, sample_rate, channels)?;
    write_wav(&buffer, output)?;
    println!(
        "Exported {:.1}s to {}",
        buffer.duration_secs(),
        output.display()
    );
    Ok(())
}

fn info(arrangement: &Path) -> Result<()> {
    let meta = lavoe_project::load_project_metadata(arrangement)
        .with_context(|| format!("Failed to read {}", arrangement.display()))?;
    println!("Name: {}", meta.name);
    println!("Tempo: {} bpm", meta.bpm);
    println!("Length: {} measures", meta.total_measures);
    println!("Tracks: {}", meta.track_count);
    println!("Blocks: {}", meta.block_count);
    Ok(())
}

async fn generate(config: &Config, prompt: &str) -> Result<()> {
    let backend = backend(config)?;
    let report = generate_track(&backend, prompt, config.poll_policy(), |status| {
        if status != GenerationStatus::Idle {
            println!("{status}");
        }
    })
    .await?;

    if !report.details.is_empty() {
        println!("{}", serde_json::Value::Object(report.details));
    }
    Ok(())
}

async fn upload(config: &Config, file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio")
        .to_string();

    let confirmation = backend(config)?.upload_audio(&name, bytes).await?;
    println!("{confirmation}");
    Ok(())
}

async fn import(config: &Config, track_id: &str, output: &Path) -> Result<()> {
    let bytes = backend(config)?.download_track(track_id).await?;
    // make sure it decodes before writing it out
    lavoe_core::decode_bytes(
        bytes.clone(),
        output.extension().and_then(|e| e.to_str()),
    )
    .with_context(|| format!("Track {track_id} is not playable audio"))?;

    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Saved track {track_id} to {}", output.display());
    Ok(())
}
