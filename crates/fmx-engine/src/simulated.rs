//! Simulated Engine
//!
//! In-memory [`AudioEngine`] used by the test-suite and the demo CLI.
//!
//! - Instances move through the real playback states. Events registered
//!   with a length stop by themselves; events with a release time spend
//!   that long in `Stopping` after a fade-out stop.
//! - Time comes from `tokio::time::Instant`, so a paused test clock drives
//!   the simulation deterministically.
//! - Lifecycle calls (create/start/stop/pause/release, bus mute/stop, bank
//!   loads) are appended to an ordered call log. Continuous volume and
//!   parameter writes are not logged; read them back with the getters.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

use fmx_core::{EventGuid, EventRef, MASTER_BUS_PATH, PlaybackState, StopMode};

use crate::engine::AudioEngine;
use crate::error::{EngineError, EngineResult};
use crate::handle::{BusHandle, InstanceHandle, TimelineCallback, TimelineEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// CALL LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// One recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Create { event: EventGuid, instance: InstanceHandle },
    Start { event: EventGuid, instance: InstanceHandle },
    Stop { event: EventGuid, instance: InstanceHandle, mode: StopMode },
    SetPaused { instance: InstanceHandle, paused: bool },
    Release { instance: InstanceHandle },
    SetBusMute { path: String, mute: bool },
    StopBusEvents { path: String, mode: StopMode },
    LoadBank { name: String },
    UnloadBank { name: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT SPEC
// ═══════════════════════════════════════════════════════════════════════════════

/// Authoring data the simulation needs about an event
#[derive(Debug, Clone, Default)]
pub struct SimEventSpec {
    /// Natural length; `None` loops until stopped
    pub length: Option<Duration>,
    /// Time spent in `Stopping` after an `AllowFadeOut` stop
    pub release: Option<Duration>,
    /// Output bus path (defaults to master)
    pub bus: Option<String>,
}

impl SimEventSpec {
    pub fn looping() -> Self {
        Self::default()
    }

    pub fn one_shot(length: Duration) -> Self {
        Self {
            length: Some(length),
            ..Self::default()
        }
    }

    pub fn with_release(mut self, release: Duration) -> Self {
        self.release = Some(release);
        self
    }

    pub fn on_bus(mut self, path: impl Into<String>) -> Self {
        self.bus = Some(path.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERNAL STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Playing { since: Instant },
    Stopping { until: Instant },
    Stopped,
}

struct SimInstance {
    event: EventRef,
    spec: SimEventSpec,
    phase: Phase,
    paused: bool,
    volume: f32,
    params: HashMap<String, f32>,
    callback: Option<TimelineCallback>,
    released: bool,
}

impl SimInstance {
    /// Advance lazily-evaluated transitions to `now`
    fn refresh(&mut self, now: Instant) {
        match self.phase {
            Phase::Playing { since } => {
                if let Some(length) = self.spec.length {
                    if now >= since + length {
                        self.phase = Phase::Stopped;
                    }
                }
            }
            Phase::Stopping { until } => {
                if now >= until {
                    self.phase = Phase::Stopped;
                }
            }
            Phase::Idle | Phase::Stopped => {}
        }
    }

    fn state(&self) -> PlaybackState {
        match self.phase {
            Phase::Playing { .. } => PlaybackState::Playing,
            Phase::Stopping { .. } => PlaybackState::Stopping,
            Phase::Idle | Phase::Stopped => PlaybackState::Stopped,
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Stopped)
    }
}

struct SimBus {
    path: String,
    volume: f32,
    mute: bool,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    /// Known events; unknown events are accepted unless `strict_events`
    events: HashMap<EventGuid, SimEventSpec>,
    strict_events: bool,
    rejected: HashSet<EventGuid>,
    instances: HashMap<InstanceHandle, SimInstance>,
    /// Lowercased path -> bus
    buses: HashMap<String, SimBus>,
    /// Live bus handles -> lowercased path
    bus_handles: HashMap<BusHandle, String>,
    known_banks: HashSet<String>,
    /// Bank name -> sample data loaded
    loaded_banks: HashMap<String, bool>,
    globals: HashMap<String, f32>,
    calls: Vec<EngineCall>,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn instance_mut(&mut self, handle: InstanceHandle) -> EngineResult<&mut SimInstance> {
        let now = Instant::now();
        let inst = self
            .instances
            .get_mut(&handle)
            .ok_or(EngineError::InvalidHandle)?;
        inst.refresh(now);
        Ok(inst)
    }

    /// Destroy released instances that have reached a terminal state
    fn collect_released(&mut self) {
        let now = Instant::now();
        self.instances.retain(|_, inst| {
            inst.refresh(now);
            !(inst.released && inst.is_finished())
        });
    }

    fn bus_mut(&mut self, bus: BusHandle) -> EngineResult<&mut SimBus> {
        let key = self
            .bus_handles
            .get(&bus)
            .ok_or(EngineError::InvalidHandle)?
            .clone();
        self.buses.get_mut(&key).ok_or(EngineError::InvalidHandle)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATED ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory engine
///
/// ```rust
/// use fmx_engine::{AudioEngine, SimulatedEngine};
/// use fmx_core::EventRef;
///
/// let engine = SimulatedEngine::new();
/// engine.add_bus("bus:/Music", 1.0);
///
/// let theme = EventRef::from_path("event:/Music/Theme");
/// let handle = engine.create_instance(&theme).unwrap();
/// engine.start(handle).unwrap();
/// assert!(engine.playback_state(handle).unwrap().is_running());
/// ```
pub struct SimulatedEngine {
    state: Mutex<SimState>,
}

impl SimulatedEngine {
    /// Create an engine with only the master bus
    pub fn new() -> Self {
        let engine = Self {
            state: Mutex::new(SimState::default()),
        };
        engine.add_bus(MASTER_BUS_PATH, 1.0);
        engine
    }

    // ═══════════════════════════════════════════════════════════════════════
    // AUTHORING
    // ═══════════════════════════════════════════════════════════════════════

    /// Register an event with its simulated behaviour
    pub fn add_event(&self, event: &EventRef, spec: SimEventSpec) {
        self.state.lock().events.insert(event.guid, spec);
    }

    /// Only registered events can be instantiated
    pub fn set_strict_events(&self, strict: bool) {
        self.state.lock().strict_events = strict;
    }

    /// Make `create_instance` fail for this event
    pub fn reject_event(&self, event: &EventRef) {
        self.state.lock().rejected.insert(event.guid);
    }

    pub fn add_bus(&self, path: &str, volume: f32) {
        self.state.lock().buses.insert(
            path.to_lowercase(),
            SimBus {
                path: path.to_string(),
                volume,
                mute: false,
            },
        );
    }

    /// Drop every live handle of a bus (simulates an engine reload)
    pub fn invalidate_bus(&self, path: &str) {
        let key = path.to_lowercase();
        self.state.lock().bus_handles.retain(|_, p| *p != key);
    }

    pub fn add_bank(&self, name: &str) {
        self.state.lock().known_banks.insert(name.to_string());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DRIVING THE SIMULATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Let an instance end naturally (as if its timeline ran out)
    pub fn finish(&self, instance: InstanceHandle) {
        let mut state = self.state.lock();
        if let Some(inst) = state.instances.get_mut(&instance) {
            inst.phase = Phase::Stopped;
        }
        state.collect_released();
    }

    /// Let every instance of an event end naturally
    pub fn finish_event(&self, event: &EventRef) {
        let mut state = self.state.lock();
        for inst in state.instances.values_mut() {
            if inst.event.guid == event.guid && !inst.is_finished() {
                inst.phase = Phase::Stopped;
            }
        }
        state.collect_released();
    }

    /// Deliver a timeline notification to the instance's registered callback
    ///
    /// The callback runs without the engine lock held.
    pub fn emit_timeline(&self, instance: InstanceHandle, event: TimelineEvent) -> bool {
        let callback = self
            .state
            .lock()
            .instances
            .get(&instance)
            .and_then(|inst| inst.callback.clone());
        match callback {
            Some(cb) => {
                cb(&event);
                true
            }
            None => false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════════════════════════════════

    /// Snapshot of the call log
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Handles of every existing instance of an event
    pub fn instances_of(&self, event: &EventRef) -> Vec<InstanceHandle> {
        let mut handles: Vec<_> = self
            .state
            .lock()
            .instances
            .iter()
            .filter(|(_, inst)| inst.event.guid == event.guid)
            .map(|(h, _)| *h)
            .collect();
        handles.sort();
        handles
    }

    /// Number of instances of an event that are currently live
    pub fn live_count(&self, event: &EventRef) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        state
            .instances
            .values_mut()
            .filter(|inst| inst.event.guid == event.guid)
            .map(|inst| {
                inst.refresh(now);
                inst.state().is_live()
            })
            .filter(|live| *live)
            .count()
    }

    /// Total number of instances alive in the engine (released or not)
    pub fn instance_count(&self) -> usize {
        let mut state = self.state.lock();
        state.collect_released();
        state.instances.len()
    }

    pub fn is_paused(&self, instance: InstanceHandle) -> bool {
        self.state
            .lock()
            .instances
            .get(&instance)
            .is_some_and(|inst| inst.paused)
    }

    pub fn has_timeline_callback(&self, instance: InstanceHandle) -> bool {
        self.state
            .lock()
            .instances
            .get(&instance)
            .is_some_and(|inst| inst.callback.is_some())
    }

    /// Bus volume by path (ignores handle validity)
    pub fn bus_volume_by_path(&self, path: &str) -> Option<f32> {
        self.state
            .lock()
            .buses
            .get(&path.to_lowercase())
            .map(|b| b.volume)
    }

    pub fn bank_sample_data_loaded(&self, name: &str) -> bool {
        self.state
            .lock()
            .loaded_banks
            .get(name)
            .copied()
            .unwrap_or(false)
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn bus_covers(bus_path: &str, event_bus: &str) -> bool {
    let bus_path = bus_path.to_lowercase();
    let event_bus = event_bus.to_lowercase();
    if bus_path == MASTER_BUS_PATH {
        return true;
    }
    event_bus == bus_path
        || event_bus
            .strip_prefix(bus_path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}

impl AudioEngine for SimulatedEngine {
    fn create_instance(&self, event: &EventRef) -> EngineResult<InstanceHandle> {
        let mut state = self.state.lock();
        if state.rejected.contains(&event.guid) {
            log::debug!("[SimEngine] Rejecting {}", event);
            return Err(EngineError::EventNotFound);
        }
        let spec = match state.events.get(&event.guid) {
            Some(spec) => spec.clone(),
            None if state.strict_events => {
                log::debug!("[SimEngine] Unknown event {}", event);
                return Err(EngineError::EventNotFound);
            }
            None => SimEventSpec::default(),
        };
        let handle = InstanceHandle(state.next_id());
        state.instances.insert(
            handle,
            SimInstance {
                event: event.clone(),
                spec,
                phase: Phase::Idle,
                paused: false,
                volume: 1.0,
                params: HashMap::new(),
                callback: None,
                released: false,
            },
        );
        state.calls.push(EngineCall::Create {
            event: event.guid,
            instance: handle,
        });
        Ok(handle)
    }

    fn is_instance_valid(&self, instance: InstanceHandle) -> bool {
        let mut state = self.state.lock();
        state.collect_released();
        state.instances.contains_key(&instance)
    }

    fn start(&self, instance: InstanceHandle) -> EngineResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let inst = state.instance_mut(instance)?;
        inst.phase = Phase::Playing { since: now };
        let event = inst.event.guid;
        state.calls.push(EngineCall::Start { event, instance });
        Ok(())
    }

    fn stop(&self, instance: InstanceHandle, mode: StopMode) -> EngineResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let inst = state.instance_mut(instance)?;
        inst.phase = match (inst.phase, mode, inst.spec.release) {
            (Phase::Playing { .. }, StopMode::AllowFadeOut, Some(release)) => Phase::Stopping {
                until: now + release,
            },
            (Phase::Stopping { until }, StopMode::AllowFadeOut, _) => Phase::Stopping { until },
            (Phase::Idle, _, _) => Phase::Idle,
            _ => Phase::Stopped,
        };
        let event = inst.event.guid;
        state.calls.push(EngineCall::Stop {
            event,
            instance,
            mode,
        });
        state.collect_released();
        Ok(())
    }

    fn set_paused(&self, instance: InstanceHandle, paused: bool) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.instance_mut(instance)?.paused = paused;
        state.calls.push(EngineCall::SetPaused { instance, paused });
        Ok(())
    }

    fn release(&self, instance: InstanceHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        let inst = state.instance_mut(instance)?;
        if inst.released {
            return Err(EngineError::InvalidHandle);
        }
        inst.released = true;
        state.calls.push(EngineCall::Release { instance });
        state.collect_released();
        Ok(())
    }

    fn playback_state(&self, instance: InstanceHandle) -> EngineResult<PlaybackState> {
        let mut state = self.state.lock();
        let playback = state.instance_mut(instance)?.state();
        state.collect_released();
        Ok(playback)
    }

    fn set_parameter(&self, instance: InstanceHandle, name: &str, value: f32) -> EngineResult<()> {
        let mut state = self.state.lock();
        state
            .instance_mut(instance)?
            .params
            .insert(name.to_string(), value);
        Ok(())
    }

    fn parameter(&self, instance: InstanceHandle, name: &str) -> EngineResult<f32> {
        let mut state = self.state.lock();
        Ok(state
            .instance_mut(instance)?
            .params
            .get(name)
            .copied()
            .unwrap_or(0.0))
    }

    fn set_instance_volume(&self, instance: InstanceHandle, volume: f32) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.instance_mut(instance)?.volume = volume.max(0.0);
        Ok(())
    }

    fn instance_volume(&self, instance: InstanceHandle) -> EngineResult<f32> {
        let mut state = self.state.lock();
        Ok(state.instance_mut(instance)?.volume)
    }

    fn set_timeline_callback(
        &self,
        instance: InstanceHandle,
        callback: Option<TimelineCallback>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.instance_mut(instance)?.callback = callback;
        Ok(())
    }

    fn bus(&self, path: &str) -> EngineResult<BusHandle> {
        let key = path.to_lowercase();
        let mut state = self.state.lock();
        if !state.buses.contains_key(&key) {
            return Err(EngineError::BusNotFound);
        }
        if let Some((handle, _)) = state.bus_handles.iter().find(|(_, p)| **p == key) {
            return Ok(*handle);
        }
        let handle = BusHandle(state.next_id());
        state.bus_handles.insert(handle, key);
        Ok(handle)
    }

    fn is_bus_valid(&self, bus: BusHandle) -> bool {
        self.state.lock().bus_handles.contains_key(&bus)
    }

    fn set_bus_volume(&self, bus: BusHandle, volume: f32) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.bus_mut(bus)?.volume = volume.max(0.0);
        Ok(())
    }

    fn bus_volume(&self, bus: BusHandle) -> EngineResult<f32> {
        let mut state = self.state.lock();
        Ok(state.bus_mut(bus)?.volume)
    }

    fn set_bus_mute(&self, bus: BusHandle, mute: bool) -> EngineResult<()> {
        let mut state = self.state.lock();
        let b = state.bus_mut(bus)?;
        b.mute = mute;
        let path = b.path.clone();
        state.calls.push(EngineCall::SetBusMute { path, mute });
        Ok(())
    }

    fn bus_mute(&self, bus: BusHandle) -> EngineResult<bool> {
        let mut state = self.state.lock();
        Ok(state.bus_mut(bus)?.mute)
    }

    fn stop_all_bus_events(&self, bus: BusHandle, mode: StopMode) -> EngineResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let path = state.bus_mut(bus)?.path.clone();
        for inst in state.instances.values_mut() {
            inst.refresh(now);
            let event_bus = inst.spec.bus.as_deref().unwrap_or(MASTER_BUS_PATH);
            if !bus_covers(&path, event_bus) || inst.is_finished() {
                continue;
            }
            inst.phase = match (mode, inst.spec.release, inst.phase) {
                (StopMode::AllowFadeOut, Some(release), Phase::Playing { .. }) => {
                    Phase::Stopping { until: now + release }
                }
                (StopMode::AllowFadeOut, _, Phase::Stopping { until }) => Phase::Stopping { until },
                _ => Phase::Stopped,
            };
        }
        state.calls.push(EngineCall::StopBusEvents { path, mode });
        state.collect_released();
        Ok(())
    }

    fn load_bank(&self, name: &str, _blocking: bool) -> EngineResult<()> {
        let mut state = self.state.lock();
        if !state.known_banks.contains(name) {
            return Err(EngineError::BankNotFound);
        }
        if state.loaded_banks.contains_key(name) {
            return Err(EngineError::BankAlreadyLoaded);
        }
        state.loaded_banks.insert(name.to_string(), false);
        log::debug!("[SimEngine] Bank '{}' loaded", name);
        state.calls.push(EngineCall::LoadBank {
            name: name.to_string(),
        });
        Ok(())
    }

    fn unload_bank(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.loaded_banks.remove(name).is_none() {
            return Err(EngineError::BankNotFound);
        }
        log::debug!("[SimEngine] Bank '{}' unloaded", name);
        state.calls.push(EngineCall::UnloadBank {
            name: name.to_string(),
        });
        Ok(())
    }

    fn is_bank_loaded(&self, name: &str) -> bool {
        self.state.lock().loaded_banks.contains_key(name)
    }

    fn load_bank_sample_data(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        let loaded = state
            .loaded_banks
            .get_mut(name)
            .ok_or(EngineError::BankNotFound)?;
        *loaded = true;
        Ok(())
    }

    fn set_global_parameter(&self, name: &str, value: f32) -> EngineResult<()> {
        self.state.lock().globals.insert(name.to_string(), value);
        Ok(())
    }

    fn global_parameter(&self, name: &str) -> EngineResult<f32> {
        Ok(self.state.lock().globals.get(name).copied().unwrap_or(0.0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn theme() -> EventRef {
        EventRef::from_path("event:/Music/Theme")
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_stops_by_itself() {
        let engine = SimulatedEngine::new();
        let ev = EventRef::from_path("event:/SFX/Hit");
        engine.add_event(&ev, SimEventSpec::one_shot(Duration::from_millis(200)));

        let h = engine.create_instance(&ev).unwrap();
        assert_eq!(engine.playback_state(h).unwrap(), PlaybackState::Stopped);

        engine.start(h).unwrap();
        assert_eq!(engine.playback_state(h).unwrap(), PlaybackState::Playing);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(engine.playback_state(h).unwrap(), PlaybackState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_count_refreshes_finished() {
        let engine = SimulatedEngine::new();
        let ev = EventRef::from_path("event:/SFX/Hit");
        engine.add_event(&ev, SimEventSpec::one_shot(Duration::from_millis(200)));

        let a = engine.create_instance(&ev).unwrap();
        let b = engine.create_instance(&ev).unwrap();
        engine.create_instance(&ev).unwrap();
        engine.start(a).unwrap();
        engine.start(b).unwrap();
        assert_eq!(engine.live_count(&ev), 2);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(engine.live_count(&ev), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_out_release() {
        let engine = SimulatedEngine::new();
        let ev = theme();
        engine.add_event(
            &ev,
            SimEventSpec::looping().with_release(Duration::from_millis(500)),
        );
        let h = engine.create_instance(&ev).unwrap();
        engine.start(h).unwrap();

        engine.stop(h, StopMode::AllowFadeOut).unwrap();
        assert_eq!(engine.playback_state(h).unwrap(), PlaybackState::Stopping);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(engine.playback_state(h).unwrap(), PlaybackState::Stopped);

        // Immediate stop skips the release
        engine.start(h).unwrap();
        engine.stop(h, StopMode::Immediate).unwrap();
        assert_eq!(engine.playback_state(h).unwrap(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn test_release_invalidates_after_stop() {
        let engine = SimulatedEngine::new();
        let h = engine.create_instance(&theme()).unwrap();
        engine.start(h).unwrap();
        engine.release(h).unwrap();

        // Still playing, so still valid
        assert!(engine.is_instance_valid(h));

        engine.stop(h, StopMode::Immediate).unwrap();
        assert!(!engine.is_instance_valid(h));
        assert_eq!(engine.playback_state(h), Err(EngineError::InvalidHandle));
    }

    #[tokio::test]
    async fn test_strict_and_rejected_events() {
        let engine = SimulatedEngine::new();
        let ev = theme();
        engine.reject_event(&ev);
        assert_eq!(engine.create_instance(&ev), Err(EngineError::EventNotFound));

        engine.set_strict_events(true);
        let other = EventRef::from_path("event:/Other");
        assert_eq!(engine.create_instance(&other), Err(EngineError::EventNotFound));
        engine.add_event(&other, SimEventSpec::looping());
        assert!(engine.create_instance(&other).is_ok());
    }

    #[tokio::test]
    async fn test_call_log_order() {
        let engine = SimulatedEngine::new();
        let ev = theme();
        let h = engine.create_instance(&ev).unwrap();
        engine.start(h).unwrap();
        engine.stop(h, StopMode::Immediate).unwrap();

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Create { event: ev.guid, instance: h },
                EngineCall::Start { event: ev.guid, instance: h },
                EngineCall::Stop { event: ev.guid, instance: h, mode: StopMode::Immediate },
            ]
        );
        engine.clear_calls();
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bus_lookup_and_invalidation() {
        let engine = SimulatedEngine::new();
        engine.add_bus("bus:/Music", 0.8);

        assert_eq!(engine.bus("bus:/Missing"), Err(EngineError::BusNotFound));

        let b = engine.bus("bus:/Music").unwrap();
        assert_eq!(engine.bus("BUS:/music").unwrap(), b);
        assert_eq!(engine.bus_volume(b).unwrap(), 0.8);

        engine.invalidate_bus("bus:/Music");
        assert!(!engine.is_bus_valid(b));
        assert_eq!(engine.set_bus_volume(b, 0.5), Err(EngineError::InvalidHandle));

        let b2 = engine.bus("bus:/Music").unwrap();
        assert_ne!(b, b2);
        engine.set_bus_volume(b2, 0.5).unwrap();
        assert_eq!(engine.bus_volume_by_path("bus:/Music"), Some(0.5));
    }

    #[tokio::test]
    async fn test_stop_all_bus_events_respects_hierarchy() {
        let engine = SimulatedEngine::new();
        engine.add_bus("bus:/SFX", 1.0);
        let sfx = EventRef::from_path("event:/SFX/Loop");
        let music = theme();
        engine.add_event(&sfx, SimEventSpec::looping().on_bus("bus:/SFX/Ambience"));
        engine.add_event(&music, SimEventSpec::looping().on_bus("bus:/Music"));

        let a = engine.create_instance(&sfx).unwrap();
        let m = engine.create_instance(&music).unwrap();
        engine.start(a).unwrap();
        engine.start(m).unwrap();

        let bus = engine.bus("bus:/SFX").unwrap();
        engine.stop_all_bus_events(bus, StopMode::Immediate).unwrap();

        assert_eq!(engine.playback_state(a).unwrap(), PlaybackState::Stopped);
        assert_eq!(engine.playback_state(m).unwrap(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_banks() {
        let engine = SimulatedEngine::new();
        assert_eq!(engine.load_bank("Master", true), Err(EngineError::BankNotFound));

        engine.add_bank("Master");
        engine.load_bank("Master", true).unwrap();
        assert!(engine.is_bank_loaded("Master"));
        assert_eq!(engine.load_bank("Master", true), Err(EngineError::BankAlreadyLoaded));

        engine.load_bank_sample_data("Master").unwrap();
        assert!(engine.bank_sample_data_loaded("Master"));

        engine.unload_bank("Master").unwrap();
        assert!(!engine.is_bank_loaded("Master"));
    }

    #[tokio::test]
    async fn test_timeline_callback_table() {
        let engine = SimulatedEngine::new();
        let h = engine.create_instance(&theme()).unwrap();

        assert!(!engine.emit_timeline(h, TimelineEvent::Marker { name: "A".into(), position_ms: 0 }));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        engine
            .set_timeline_callback(
                h,
                Some(Arc::new(move |_ev: &TimelineEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        assert!(engine.has_timeline_callback(h));
        assert!(engine.emit_timeline(h, TimelineEvent::Marker { name: "A".into(), position_ms: 0 }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        engine.set_timeline_callback(h, None).unwrap();
        assert!(!engine.has_timeline_callback(h));
    }

    #[tokio::test]
    async fn test_parameters_and_globals() {
        let engine = SimulatedEngine::new();
        let h = engine.create_instance(&theme()).unwrap();
        assert_eq!(engine.parameter(h, "Intensity").unwrap(), 0.0);
        engine.set_parameter(h, "Intensity", 0.7).unwrap();
        assert_eq!(engine.parameter(h, "Intensity").unwrap(), 0.7);

        engine.set_global_parameter("TimeOfDay", 12.0).unwrap();
        assert_eq!(engine.global_parameter("TimeOfDay").unwrap(), 12.0);
    }
}
