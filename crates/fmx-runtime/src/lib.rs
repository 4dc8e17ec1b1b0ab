//! FMX Audio Runtime
//!
//! Orchestration layer over an [`AudioEngine`](fmx_engine::AudioEngine):
//! - Event cache with an optional LRU cap (never evicts live sound)
//! - Mixer buses with persisted volumes, fades and ducking
//! - Global and per-event parameter ramps
//! - Music slot with crossfades and a shuffled/weighted playlist driver
//! - Snapshot push/pop stack
//! - Group tags with per-event templates
//! - Cooldown and concurrency gates, scene-change policy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          AudioFacade                            │
//! │  cooldowns · live counts · lifecycle · notifications            │
//! ├──────────────┬──────────────┬──────────────┬───────────────────┤
//! │ EventRegistry│ BusDirectory │ MusicSequencer│ SnapshotStack    │
//! │  (containers)│ (controllers)│ (crossfade,   │ (push/pop)       │
//! │              │              │  playlist)    │                  │
//! ├──────────────┴──────────────┴──────────────┴───────────────────┤
//! │ TagIndex · InstanceTracker · ParameterRamp · BankService        │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ Arc<dyn AudioEngine>
//!                                 ▼
//!                          engine adapter
//! ```
//!
//! Suspendable work (ramps, delays, crossfades, playlist, instance
//! watchers) runs on tokio and stops at the next tick once its
//! cancellation token fires.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fmx_core::EventRef;
//! use fmx_engine::SimulatedEngine;
//! use fmx_runtime::{AudioFacade, AudioSettings, MemoryStore};
//!
//! let facade = AudioFacade::new(
//!     Arc::new(SimulatedEngine::new()),
//!     AudioSettings::load_or_default("audio.json"),
//!     Arc::new(MemoryStore::new()),
//! );
//! facade.initialize();
//! facade.play_music(&EventRef::from_path("event:/Music/Theme"), Some(1.0));
//! ```

pub mod bank;
pub mod bus;
pub mod container;
mod error;
pub mod facade;
pub mod music;
pub mod notification;
pub mod ramp;
pub mod registry;
pub mod selection;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod tags;
pub mod timing;
mod tracker;

// Re-exports
pub use bank::BankService;
pub use bus::{BusController, BusDirectory};
pub use container::{EventContainer, TimelineInfo};
pub use facade::AudioFacade;
pub use music::MusicSequencer;
pub use notification::AudioNotification;
pub use ramp::{ParameterRamp, RampOutcome};
pub use registry::EventRegistry;
pub use selection::{EventSequence, SelectionMode, TrackSelector, WeightPolicy, WeightTable};
pub use settings::{
    AudioSettings, BankSettings, BusInit, BusSettings, EventSettings, EventWeight,
    LifecycleSettings, MusicSettings, ParameterSettings, PreloadEvent, RuntimeSettings,
    SnapshotSettings, TagTemplate,
};
pub use snapshot::SnapshotStack;
pub use store::{JsonFileStore, MemoryStore, VolumeStore};
pub use tags::TagIndex;
pub use timing::WaitOutcome;
