//! Event Container
//!
//! Owns one live engine instance of an authored event plus its timeline
//! state. The handle is valid from creation until `dispose`, which stops
//! playback immediately and releases the instance exactly once.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fmx_core::{ContainerId, EventRef, FmxError, FmxResult, PlaybackState, StopMode};
use fmx_engine::{AudioEngine, InstanceHandle, TimelineCallback, TimelineEvent};

use crate::error::EngineResultExt;

/// Bar or beat listener (receives the new value)
pub type CountListener = Arc<dyn Fn(i32) + Send + Sync>;

/// Marker listener (receives the marker name)
pub type MarkerListener = Arc<dyn Fn(&str) + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// TIMELINE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of timeline counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineInfo {
    pub bar: i32,
    pub beat: i32,
    pub tempo: f32,
    pub position_ms: i32,
    pub last_marker: Option<String>,
}

#[derive(Default)]
struct TimelineState {
    info: TimelineInfo,
    on_beat: Vec<CountListener>,
    on_bar: Vec<CountListener>,
    on_marker: Vec<MarkerListener>,
}

enum Fired {
    Count(CountListener, i32),
    Marker(MarkerListener, String),
}

impl TimelineState {
    /// Update counters, returning the listener calls to make after unlocking
    fn apply(&mut self, event: &TimelineEvent) -> Vec<Fired> {
        let mut fired = Vec::new();
        match event {
            TimelineEvent::Beat {
                bar,
                beat,
                tempo,
                position_ms,
            } => {
                self.info.tempo = *tempo;
                self.info.position_ms = *position_ms;
                if *bar != self.info.bar {
                    self.info.bar = *bar;
                    fired.extend(self.on_bar.iter().map(|l| Fired::Count(Arc::clone(l), *bar)));
                }
                if *beat != self.info.beat {
                    self.info.beat = *beat;
                    fired.extend(self.on_beat.iter().map(|l| Fired::Count(Arc::clone(l), *beat)));
                }
            }
            TimelineEvent::Marker { name, position_ms } => {
                self.info.position_ms = *position_ms;
                if self.info.last_marker.as_deref() != Some(name.as_str()) {
                    self.info.last_marker = Some(name.clone());
                    fired.extend(
                        self.on_marker
                            .iter()
                            .map(|l| Fired::Marker(Arc::clone(l), name.clone())),
                    );
                }
            }
        }
        fired
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT CONTAINER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct EventContainer {
    id: ContainerId,
    name: String,
    event: EventRef,
    handle: InstanceHandle,
    stop_mode: StopMode,
    engine: Arc<dyn AudioEngine>,
    timeline: Arc<Mutex<TimelineState>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for EventContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContainer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("event", &self.event)
            .field("handle", &self.handle)
            .field("stop_mode", &self.stop_mode)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl EventContainer {
    /// Instantiate the event in the engine and register its timeline callback
    pub fn create(
        engine: Arc<dyn AudioEngine>,
        name: impl Into<String>,
        event: EventRef,
        stop_mode: StopMode,
    ) -> FmxResult<Arc<Self>> {
        let name = name.into();
        let handle = engine.create_instance(&event).op("create instance", &event)?;

        let timeline = Arc::new(Mutex::new(TimelineState::default()));
        let state = Arc::clone(&timeline);
        let callback: TimelineCallback = Arc::new(move |ev: &TimelineEvent| {
            let fired = state.lock().apply(ev);
            for call in fired {
                match call {
                    Fired::Count(listener, value) => listener(value),
                    Fired::Marker(listener, name) => listener(&name),
                }
            }
        });
        if let Err(e) = engine
            .set_timeline_callback(handle, Some(callback))
            .op("set timeline callback", &name)
        {
            log::warn!("[Registry] {}", e);
        }

        Ok(Arc::new(Self {
            id: ContainerId::generate(),
            name,
            event,
            handle,
            stop_mode,
            engine,
            timeline,
            disposed: AtomicBool::new(false),
        }))
    }

    // ─── Identity ──────────────────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> ContainerId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn event(&self) -> &EventRef {
        &self.event
    }

    #[inline]
    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    #[inline]
    pub fn stop_mode(&self) -> StopMode {
        self.stop_mode
    }

    #[inline]
    pub fn allows_fade_out(&self) -> bool {
        self.stop_mode == StopMode::AllowFadeOut
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Not disposed and the engine still knows the handle
    pub fn is_valid(&self) -> bool {
        !self.is_disposed() && self.engine.is_instance_valid(self.handle)
    }

    fn guard(&self, op: &'static str) -> FmxResult<()> {
        if self.is_disposed() {
            return Err(FmxError::InvalidHandle(format!("{op} on disposed '{}'", self.name)));
        }
        Ok(())
    }

    // ─── Playback ──────────────────────────────────────────────────────────

    pub fn play(&self) -> FmxResult<()> {
        self.guard("start")?;
        self.engine.start(self.handle).op("start", &self.name)
    }

    /// Stop using the container's stop policy
    pub fn stop(&self) -> FmxResult<()> {
        self.stop_with(self.stop_mode)
    }

    pub fn stop_with(&self, mode: StopMode) -> FmxResult<()> {
        self.guard("stop")?;
        self.engine.stop(self.handle, mode).op("stop", &self.name)
    }

    pub fn set_paused(&self, paused: bool) -> FmxResult<()> {
        self.guard("set paused")?;
        self.engine
            .set_paused(self.handle, paused)
            .op("set paused", &self.name)
    }

    pub fn playback_state(&self) -> FmxResult<PlaybackState> {
        self.guard("playback state")?;
        self.engine
            .playback_state(self.handle)
            .op("playback state", &self.name)
    }

    /// Playback state, treating an unusable handle as stopped
    pub fn state_or_stopped(&self) -> PlaybackState {
        self.playback_state().unwrap_or(PlaybackState::Stopped)
    }

    pub fn set_parameter(&self, name: &str, value: f32) -> FmxResult<()> {
        self.guard("set parameter")?;
        self.engine
            .set_parameter(self.handle, name, value)
            .op("set parameter", &self.name)
    }

    pub fn parameter(&self, name: &str) -> FmxResult<f32> {
        self.guard("get parameter")?;
        self.engine
            .parameter(self.handle, name)
            .op("get parameter", &self.name)
    }

    pub fn set_volume(&self, volume: f32) -> FmxResult<()> {
        self.guard("set volume")?;
        self.engine
            .set_instance_volume(self.handle, volume.max(0.0))
            .op("set volume", &self.name)
    }

    pub fn volume(&self) -> FmxResult<f32> {
        self.guard("get volume")?;
        self.engine
            .instance_volume(self.handle)
            .op("get volume", &self.name)
    }

    // ─── Timeline ──────────────────────────────────────────────────────────

    pub fn on_beat(&self, listener: impl Fn(i32) + Send + Sync + 'static) {
        self.timeline.lock().on_beat.push(Arc::new(listener));
    }

    pub fn on_bar(&self, listener: impl Fn(i32) + Send + Sync + 'static) {
        self.timeline.lock().on_bar.push(Arc::new(listener));
    }

    pub fn on_marker(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.timeline.lock().on_marker.push(Arc::new(listener));
    }

    pub fn timeline(&self) -> TimelineInfo {
        self.timeline.lock().info.clone()
    }

    // ─── Teardown ──────────────────────────────────────────────────────────

    /// Clear the callback, stop immediately and release; runs once
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = &self.engine;
        if let Err(e) = engine
            .set_timeline_callback(self.handle, None)
            .op("clear timeline callback", &self.name)
        {
            log::debug!("[Registry] {}", e);
        }
        if let Err(e) = engine
            .stop(self.handle, StopMode::Immediate)
            .op("stop", &self.name)
        {
            log::debug!("[Registry] {}", e);
        }
        if let Err(e) = engine.release(self.handle).op("release", &self.name) {
            log::warn!("[Registry] {}", e);
        }
        let mut timeline = self.timeline.lock();
        timeline.on_beat.clear();
        timeline.on_bar.clear();
        timeline.on_marker.clear();
    }
}

impl Drop for EventContainer {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use fmx_engine::{EngineCall, SimulatedEngine};
    use std::sync::atomic::AtomicI32;

    fn setup() -> (Arc<SimulatedEngine>, Arc<EventContainer>) {
        let engine = Arc::new(SimulatedEngine::new());
        let container = EventContainer::create(
            engine.clone(),
            "Theme",
            EventRef::from_path("event:/Music/Theme"),
            StopMode::AllowFadeOut,
        )
        .unwrap();
        (engine, container)
    }

    #[tokio::test]
    async fn test_play_stop_state() {
        let (_engine, c) = setup();
        assert_eq!(c.playback_state().unwrap(), PlaybackState::Stopped);
        c.play().unwrap();
        assert!(c.playback_state().unwrap().is_running());
        c.stop().unwrap();
        assert_eq!(c.state_or_stopped(), PlaybackState::Stopped);
        assert!(c.allows_fade_out());
    }

    #[tokio::test]
    async fn test_dispose_releases_once() {
        let (engine, c) = setup();
        let handle = c.handle();
        c.play().unwrap();
        c.dispose();
        c.dispose();
        drop(c);

        let releases = engine
            .calls()
            .into_iter()
            .filter(|call| matches!(call, EngineCall::Release { instance } if *instance == handle))
            .count();
        assert_eq!(releases, 1);
        assert!(!engine.is_instance_valid(handle));
    }

    #[tokio::test]
    async fn test_disposed_guard() {
        let (_engine, c) = setup();
        c.dispose();
        assert!(!c.is_valid());
        assert!(c.play().unwrap_err().is_invalid_handle());
        assert_eq!(c.state_or_stopped(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn test_create_failure() {
        let engine = Arc::new(SimulatedEngine::new());
        let ev = EventRef::from_path("event:/Missing");
        engine.reject_event(&ev);
        let err = EventContainer::create(engine, "Missing", ev, StopMode::Immediate).unwrap_err();
        assert!(matches!(err, FmxError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_timeline_listeners_fire_on_change() {
        let (engine, c) = setup();
        let bars = Arc::new(AtomicI32::new(0));
        let beats = Arc::new(AtomicI32::new(0));
        let markers = Arc::new(Mutex::new(Vec::<String>::new()));

        let b = Arc::clone(&bars);
        c.on_bar(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });
        let bt = Arc::clone(&beats);
        c.on_beat(move |_| {
            bt.fetch_add(1, Ordering::SeqCst);
        });
        let m = Arc::clone(&markers);
        c.on_marker(move |name| m.lock().push(name.to_string()));

        let beat = |bar, beat| TimelineEvent::Beat {
            bar,
            beat,
            tempo: 120.0,
            position_ms: 0,
        };
        engine.emit_timeline(c.handle(), beat(1, 1));
        engine.emit_timeline(c.handle(), beat(1, 2));
        engine.emit_timeline(c.handle(), beat(1, 2));
        engine.emit_timeline(c.handle(), beat(2, 1));

        assert_eq!(bars.load(Ordering::SeqCst), 2);
        assert_eq!(beats.load(Ordering::SeqCst), 3);

        let marker = |name: &str| TimelineEvent::Marker {
            name: name.into(),
            position_ms: 500,
        };
        engine.emit_timeline(c.handle(), marker("Drop"));
        engine.emit_timeline(c.handle(), marker("Drop"));
        engine.emit_timeline(c.handle(), marker("Outro"));
        assert_eq!(*markers.lock(), vec!["Drop".to_string(), "Outro".to_string()]);

        let info = c.timeline();
        assert_eq!(info.bar, 2);
        assert_eq!(info.beat, 1);
        assert_eq!(info.tempo, 120.0);
        assert_eq!(info.last_marker.as_deref(), Some("Outro"));
        assert_eq!(info.position_ms, 500);
    }

    #[tokio::test]
    async fn test_volume_and_parameters() {
        let (_engine, c) = setup();
        c.set_volume(-1.0).unwrap();
        assert_eq!(c.volume().unwrap(), 0.0);
        c.set_parameter("Intensity", 0.3).unwrap();
        assert_eq!(c.parameter("Intensity").unwrap(), 0.3);
    }
}
