//! FMX scenario runner
//!
//! Usage:
//!   fmx [--config audio.json] status          - Boot and print the runtime state
//!   fmx playlist --tracks Calm,Battle --loop  - Run a playlist, print track notifications
//!   fmx duck --bus bus:/Music --to 0.2        - Duck a bus and print its volume
//!   fmx snapshots --names Indoor,Menu         - Push then pop a stack of snapshots
//!   fmx init-config audio.json                - Write the default settings file
//!
//! Everything runs against the simulated engine; buses and boot banks named
//! in the settings are registered with it before the facade initializes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use fmx_core::{EventRef, StopMode};
use fmx_engine::{SimEventSpec, SimulatedEngine};
use fmx_runtime::{
    AudioFacade, AudioNotification, AudioSettings, BusInit, EventSequence, JsonFileStore,
};

#[derive(Parser)]
#[command(name = "fmx", about = "FMX audio runtime scenarios")]
struct Cli {
    /// Settings file (JSON); defaults are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Where persisted bus volumes live
    #[arg(long, global = true, default_value = "fmx-volumes.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the runtime and print its state as JSON
    Status,
    /// Run a playlist of simulated tracks
    Playlist {
        /// Track names (become `event:/Music/<name>`)
        #[arg(short, long, value_delimiter = ',', required = true)]
        tracks: Vec<String>,
        #[arg(long = "loop")]
        looping: bool,
        #[arg(long)]
        shuffle: bool,
        #[arg(long, default_value_t = 0)]
        no_repeat: usize,
        /// Crossfade between tracks in seconds
        #[arg(long)]
        crossfade: Option<f32>,
        /// Length of every simulated track in seconds
        #[arg(long, default_value_t = 2.0)]
        track_secs: f32,
        /// How long to let the playlist run
        #[arg(long, default_value_t = 8.0)]
        run_secs: f32,
    },
    /// Duck a bus and print its volume before and after
    Duck {
        #[arg(long, default_value = "bus:/Music")]
        bus: String,
        #[arg(long, default_value_t = 0.2)]
        to: f32,
        #[arg(long, default_value_t = 0.1)]
        attack: f32,
        #[arg(long, default_value_t = 0.5)]
        hold: f32,
        #[arg(long, default_value_t = 0.3)]
        release: f32,
    },
    /// Push every snapshot in order, then pop them all
    Snapshots {
        /// Snapshot names (become `snapshot:/<name>`)
        #[arg(short, long, value_delimiter = ',', required = true)]
        names: Vec<String>,
        #[arg(long)]
        fade: Option<f32>,
    },
    /// Write the default settings to a file
    InitConfig { path: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Commands::InitConfig { path } = &cli.command {
        AudioSettings::default()
            .save_to(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote default settings to {}", path.display());
        return Ok(());
    }

    let settings = match &cli.config {
        Some(path) => AudioSettings::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AudioSettings::default(),
    };
    let engine = Arc::new(SimulatedEngine::new());
    for init in &settings.buses.buses {
        engine.add_bus(&init.path, 1.0);
    }
    for bank in &settings.banks.load_on_boot {
        engine.add_bank(bank);
    }
    let store = Arc::new(JsonFileStore::open(&cli.store));
    let facade = AudioFacade::new(engine.clone(), settings, store);
    facade.initialize();

    match cli.command {
        Commands::Status => print_status(&facade)?,
        Commands::Playlist {
            tracks,
            looping,
            shuffle,
            no_repeat,
            crossfade,
            track_secs,
            run_secs,
        } => {
            let tracks: Vec<EventRef> = tracks
                .iter()
                .map(|t| EventRef::from_path(format!("event:/Music/{t}")))
                .collect();
            let length = secs_arg("--track-secs", track_secs.max(0.1))?;
            let run_for = secs_arg("--run-secs", run_secs.max(0.0))?;
            for t in &tracks {
                engine.add_event(t, SimEventSpec::one_shot(length));
            }
            let sequence = EventSequence::new(tracks)
                .with_loop(looping)
                .with_shuffle(shuffle)
                .with_no_repeat_window(no_repeat);
            run_playlist(&facade, &sequence, crossfade, run_for).await;
        }
        Commands::Duck {
            bus,
            to,
            attack,
            hold,
            release,
        } => {
            if facade.find_bus(&bus).is_none() {
                engine.add_bus(&bus, 1.0);
                facade.add_bus(&BusInit::new(bus.as_str(), 1.0));
            }
            println!("{} before: {:.2}", bus, facade.bus_volume(&bus));
            let completed = facade.duck_bus(&bus, to, attack, hold, release).await;
            println!(
                "{} after: {:.2} (completed: {})",
                bus,
                facade.bus_volume(&bus),
                completed
            );
        }
        Commands::Snapshots { names, fade } => {
            let snapshots: Vec<EventRef> = names
                .iter()
                .map(|n| EventRef::from_path(format!("snapshot:/{n}")))
                .collect();
            for s in &snapshots {
                facade.push_snapshot(s, fade).await;
                println!("pushed {} (active: {})", s, display(facade.active_snapshot()));
            }
            while let Some(popped) = facade.pop_snapshot(fade).await {
                println!("popped {} (active: {})", popped, display(facade.active_snapshot()));
            }
        }
        Commands::InitConfig { .. } => {}
    }

    facade.shutdown();
    Ok(())
}

fn secs_arg(flag: &str, secs: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(secs)
        .with_context(|| format!("{flag} must be a finite number of seconds, got {secs}"))
}

fn display(event: Option<EventRef>) -> String {
    event.map_or_else(|| "none".to_string(), |e| e.to_string())
}

fn print_status(facade: &AudioFacade) -> Result<()> {
    let buses: Vec<_> = facade
        .bus_paths()
        .into_iter()
        .map(|path| {
            serde_json::json!({
                "path": path,
                "volume": facade.bus_volume(&path),
                "muted": facade.is_bus_muted(&path),
            })
        })
        .collect();
    let status = serde_json::json!({
        "initialized": facade.is_initialized(),
        "buses": buses,
        "loaded_events": facade.registry().names(),
        "banks": facade
            .settings()
            .banks
            .load_on_boot
            .iter()
            .filter(|b| facade.is_bank_loaded(b))
            .collect::<Vec<_>>(),
        "tick_ms": facade.settings().runtime.tick_ms,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_playlist(
    facade: &AudioFacade,
    sequence: &EventSequence,
    crossfade: Option<f32>,
    run_for: Duration,
) {
    let mut notes = facade.subscribe();
    facade.start_sequence(sequence, crossfade);

    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            note = notes.recv() => match note {
                Ok(AudioNotification::TrackStarted { event, index }) => {
                    println!("▶ [{index}] {event}");
                }
                Ok(AudioNotification::TrackEnded { event, index }) => {
                    println!("■ [{index}] {event}");
                }
                Ok(AudioNotification::EventStarted { .. }) => {}
                Err(RecvError::Lagged(n)) => log::warn!("[Music] Missed {} notification(s)", n),
                Err(RecvError::Closed) => break,
            },
        }
    }
    facade.stop_playlist();
    facade.stop_music(StopMode::AllowFadeOut);
}
