//! Engine driver contract

use fmx_core::{EventRef, PlaybackState, StopMode};

use crate::error::EngineResult;
use crate::handle::{BusHandle, InstanceHandle, TimelineCallback};

/// Primitive, synchronous audio engine API
///
/// Every call is cheap and non-blocking except `load_bank(.., blocking = true)`.
/// Implementations must be shareable across tasks (`Send + Sync`); the
/// runtime holds them as `Arc<dyn AudioEngine>`.
pub trait AudioEngine: Send + Sync {
    // ═══════════════════════════════════════════════════════════════════════
    // EVENT INSTANCES
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new (stopped) instance of an authored event
    fn create_instance(&self, event: &EventRef) -> EngineResult<InstanceHandle>;

    /// Handle refers to an instance that has not been released and destroyed
    fn is_instance_valid(&self, instance: InstanceHandle) -> bool;

    /// Start (or restart) playback
    fn start(&self, instance: InstanceHandle) -> EngineResult<()>;

    fn stop(&self, instance: InstanceHandle, mode: StopMode) -> EngineResult<()>;

    fn set_paused(&self, instance: InstanceHandle, paused: bool) -> EngineResult<()>;

    /// Mark for destruction; the handle becomes invalid once the instance has stopped
    fn release(&self, instance: InstanceHandle) -> EngineResult<()>;

    fn playback_state(&self, instance: InstanceHandle) -> EngineResult<PlaybackState>;

    fn set_parameter(&self, instance: InstanceHandle, name: &str, value: f32) -> EngineResult<()>;

    fn parameter(&self, instance: InstanceHandle, name: &str) -> EngineResult<f32>;

    fn set_instance_volume(&self, instance: InstanceHandle, volume: f32) -> EngineResult<()>;

    fn instance_volume(&self, instance: InstanceHandle) -> EngineResult<f32>;

    /// Install (or clear with `None`) the timeline callback for an instance
    fn set_timeline_callback(
        &self,
        instance: InstanceHandle,
        callback: Option<TimelineCallback>,
    ) -> EngineResult<()>;

    // ═══════════════════════════════════════════════════════════════════════
    // BUSES
    // ═══════════════════════════════════════════════════════════════════════

    /// Resolve a bus by its path (e.g. `bus:/Music`)
    fn bus(&self, path: &str) -> EngineResult<BusHandle>;

    fn is_bus_valid(&self, bus: BusHandle) -> bool;

    fn set_bus_volume(&self, bus: BusHandle, volume: f32) -> EngineResult<()>;

    fn bus_volume(&self, bus: BusHandle) -> EngineResult<f32>;

    fn set_bus_mute(&self, bus: BusHandle, mute: bool) -> EngineResult<()>;

    fn bus_mute(&self, bus: BusHandle) -> EngineResult<bool>;

    fn stop_all_bus_events(&self, bus: BusHandle, mode: StopMode) -> EngineResult<()>;

    // ═══════════════════════════════════════════════════════════════════════
    // BANKS
    // ═══════════════════════════════════════════════════════════════════════

    fn load_bank(&self, name: &str, blocking: bool) -> EngineResult<()>;

    fn unload_bank(&self, name: &str) -> EngineResult<()>;

    fn is_bank_loaded(&self, name: &str) -> bool;

    /// Preload the sample data of every event in a loaded bank
    fn load_bank_sample_data(&self, name: &str) -> EngineResult<()>;

    // ═══════════════════════════════════════════════════════════════════════
    // GLOBAL PARAMETERS
    // ═══════════════════════════════════════════════════════════════════════

    fn set_global_parameter(&self, name: &str, value: f32) -> EngineResult<()>;

    fn global_parameter(&self, name: &str) -> EngineResult<f32>;
}
