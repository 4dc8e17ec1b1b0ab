//! FMX Engine Driver
//!
//! The synchronous primitive API the orchestration layer is built on:
//! create/start/stop/release event instances, get/set parameters and
//! volume, query playback state, load/unload banks, resolve buses and
//! control their volume, global parameters, and a timeline callback table.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ fmx-runtime (facade, registry, music, snapshots, tags, ...)  │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ Arc<dyn AudioEngine>
//!             ┌───────────────┴───────────────┐
//!             │                               │
//!   ┌─────────▼─────────┐           ┌─────────▼─────────┐
//!   │ native adapter    │           │ SimulatedEngine   │
//!   │ (out of tree)     │           │ (tests, demo CLI) │
//!   └───────────────────┘           └───────────────────┘
//! ```
//!
//! Timeline notifications (beat/bar/marker) are delivered through a
//! registration table keyed by instance handle: the runtime registers a
//! closure per container, the adapter invokes it. No user-data pointers.

pub mod engine;
pub mod error;
pub mod handle;
pub mod simulated;

pub use engine::AudioEngine;
pub use error::{EngineError, EngineResult};
pub use handle::{BusHandle, InstanceHandle, TimelineCallback, TimelineEvent};
pub use simulated::{EngineCall, SimEventSpec, SimulatedEngine};
