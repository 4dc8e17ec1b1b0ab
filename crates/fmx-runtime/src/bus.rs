//! Buses
//!
//! [`BusController`] wraps one mixer bus (volume, mute, stop-all, fades,
//! ducking). [`BusDirectory`] is the facade's path -> controller map plus
//! the volume persistence rules.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use fmx_core::{FadeCurve, FmxError, FmxResult, StopMode, positive_duration, unit_volume};
use fmx_engine::{AudioEngine, BusHandle};

use crate::error::EngineResultExt;
use crate::ramp::{RampOutcome, ramp};
use crate::settings::{BusInit, BusSettings};
use crate::store::VolumeStore;
use crate::timing::sleep_or_cancel;

// ═══════════════════════════════════════════════════════════════════════════════
// BUS CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

/// One mixer bus
///
/// Engine calls go through a validity check; a stale handle is dropped and
/// reported, and the caller must `initialize()` again.
pub struct BusController {
    path: String,
    engine: Arc<dyn AudioEngine>,
    handle: Mutex<Option<BusHandle>>,
    tick: Duration,
    shutdown: CancellationToken,
    /// Sequence number and token of the fade or duck driving this bus
    fade: Mutex<(u64, Option<CancellationToken>)>,
}

impl BusController {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        path: impl Into<String>,
        tick: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            engine,
            handle: Mutex::new(None),
            tick,
            shutdown,
            fade: Mutex::new((0, None)),
        }
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve the bus in the engine; `true` once a valid handle is held
    pub fn initialize(&self) -> bool {
        let mut handle = self.handle.lock();
        if let Some(h) = *handle {
            if self.engine.is_bus_valid(h) {
                return true;
            }
        }
        if self.path.trim().is_empty() {
            log::error!("[Bus] Bus path is empty, cannot initialize");
            return false;
        }
        match self.engine.bus(&self.path).op("get bus", &self.path) {
            Ok(h) => {
                *handle = Some(h);
                true
            }
            Err(e) => {
                log::warn!("[Bus] Could not resolve '{}': {}", self.path, e);
                *handle = None;
                false
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.lock().is_some()
    }

    fn ensure(&self, op: &'static str) -> FmxResult<BusHandle> {
        let mut handle = self.handle.lock();
        let Some(h) = *handle else {
            return Err(FmxError::InvalidHandle(format!(
                "{op} on uninitialized bus '{}'",
                self.path
            )));
        };
        if !self.engine.is_bus_valid(h) {
            *handle = None;
            return Err(FmxError::InvalidHandle(format!(
                "{op} on stale bus '{}', re-initialize",
                self.path
            )));
        }
        Ok(h)
    }

    // ─── Volume / mute ─────────────────────────────────────────────────────

    pub fn try_set_volume(&self, volume: f32) -> FmxResult<()> {
        let h = self.ensure("set volume")?;
        let volume = if volume.is_nan() { 0.0 } else { volume.max(0.0) };
        self.engine.set_bus_volume(h, volume).op("set volume", &self.path)
    }

    /// Set volume (clamped to `>= 0`); failures are logged
    pub fn set_volume(&self, volume: f32) -> bool {
        match self.try_set_volume(volume) {
            Ok(()) => true,
            Err(e) => {
                log_bus_error(&e);
                false
            }
        }
    }

    pub fn try_volume(&self) -> FmxResult<f32> {
        let h = self.ensure("get volume")?;
        self.engine.bus_volume(h).op("get volume", &self.path)
    }

    /// Current volume, `-1.0` when unavailable
    pub fn volume(&self) -> f32 {
        self.try_volume().unwrap_or_else(|e| {
            log_bus_error(&e);
            -1.0
        })
    }

    pub fn set_mute(&self, mute: bool) -> bool {
        let result = self
            .ensure("set mute")
            .and_then(|h| self.engine.set_bus_mute(h, mute).op("set mute", &self.path));
        result.map_err(|e| log_bus_error(&e)).is_ok()
    }

    pub fn is_muted(&self) -> bool {
        self.ensure("get mute")
            .and_then(|h| self.engine.bus_mute(h).op("get mute", &self.path))
            .unwrap_or_else(|e| {
                log_bus_error(&e);
                false
            })
    }

    pub fn stop_all_events(&self, mode: StopMode) -> bool {
        let result = self.ensure("stop all events").and_then(|h| {
            self.engine
                .stop_all_bus_events(h, mode)
                .op("stop all events", &self.path)
        });
        result.map_err(|e| log_bus_error(&e)).is_ok()
    }

    // ─── Fades ─────────────────────────────────────────────────────────────

    /// Take over the bus's ramp slot, cancelling any fade in progress
    fn begin_fade(&self) -> (u64, CancellationToken) {
        let token = self.shutdown.child_token();
        let mut slot = self.fade.lock();
        slot.0 += 1;
        if let Some(previous) = slot.1.replace(token.clone()) {
            previous.cancel();
        }
        (slot.0, token)
    }

    /// Cancel the fade or duck in progress, if any
    pub fn cancel_fade(&self) {
        let mut slot = self.fade.lock();
        slot.0 += 1;
        if let Some(previous) = slot.1.take() {
            previous.cancel();
        }
    }

    fn end_fade(&self, seq: u64) {
        let mut slot = self.fade.lock();
        if slot.0 == seq {
            slot.1 = None;
        }
    }

    /// Linear fade from the current volume; `duration <= 0` is instant
    pub async fn fade_to(&self, to_volume: f32, duration_secs: f32) -> RampOutcome {
        let (seq, token) = self.begin_fade();
        let start = self.volume().max(0.0);
        let to = unit_volume(to_volume);
        let outcome = ramp(
            start,
            to,
            positive_duration(duration_secs),
            FadeCurve::Linear,
            self.tick,
            &token,
            |v| {
                self.set_volume(v);
            },
        )
        .await;
        self.end_fade(seq);
        outcome
    }

    /// Three-phase duck: attack to `to_volume`, hold, release back
    ///
    /// The baseline is sampled once when the duck starts.
    pub async fn duck(
        &self,
        to_volume: f32,
        attack_secs: f32,
        hold_secs: f32,
        release_secs: f32,
    ) -> RampOutcome {
        let (seq, token) = self.begin_fade();
        let baseline = self.volume().max(0.0);
        let to = unit_volume(to_volume);
        let apply = |v: f32| {
            self.set_volume(v);
        };

        let mut outcome = ramp(
            baseline,
            to,
            positive_duration(attack_secs),
            FadeCurve::Linear,
            self.tick,
            &token,
            apply,
        )
        .await;
        if outcome.is_completed() {
            if let Some(hold) = positive_duration(hold_secs) {
                if !sleep_or_cancel(hold, &token).await {
                    outcome = RampOutcome::Cancelled;
                }
            }
        }
        if outcome.is_completed() {
            outcome = ramp(
                to,
                baseline,
                positive_duration(release_secs),
                FadeCurve::Linear,
                self.tick,
                &token,
                apply,
            )
            .await;
        }
        self.end_fade(seq);
        outcome
    }
}

fn log_bus_error(e: &FmxError) {
    if e.is_invalid_handle() {
        log::warn!("[Bus] {}", e);
    } else {
        log::error!("[Bus] {}", e);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUS DIRECTORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Case-insensitive bus map with persisted volumes
pub struct BusDirectory {
    engine: Arc<dyn AudioEngine>,
    settings: BusSettings,
    store: Arc<dyn VolumeStore>,
    tick: Duration,
    shutdown: CancellationToken,
    buses: Mutex<HashMap<String, Arc<BusController>>>,
}

impl BusDirectory {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        settings: BusSettings,
        store: Arc<dyn VolumeStore>,
        tick: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            settings,
            store,
            tick,
            shutdown,
            buses: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// Resolve every configured bus and apply persisted (or default) volumes
    ///
    /// Returns the number of buses in the map afterwards.
    pub fn initialize(&self) -> usize {
        let inits = self.settings.buses.clone();
        for init in &inits {
            self.add_bus(init);
        }
        self.buses.lock().len()
    }

    /// Resolve one bus and add it to the map
    ///
    /// A path that is already mapped keeps its controller; any fade on it is
    /// cancelled and the bus is re-resolved.
    pub fn add_bus(&self, init: &BusInit) -> Option<Arc<BusController>> {
        let key = init.path.to_lowercase();
        let existing = self.buses.lock().get(&key).cloned();
        let bus = match existing {
            Some(bus) => {
                bus.cancel_fade();
                bus
            }
            None => Arc::new(BusController::new(
                Arc::clone(&self.engine),
                init.path.clone(),
                self.tick,
                self.shutdown.clone(),
            )),
        };
        if !bus.initialize() {
            log::error!("[Bus] Failed to initialize bus '{}'", init.path);
            return None;
        }
        let volume = self
            .load_volume(init)
            .unwrap_or_else(|| unit_volume(init.default_volume));
        bus.set_volume(volume);
        log::debug!("[Bus] '{}' ready at volume {:.2}", init.path, volume);

        self.buses.lock().insert(key, Arc::clone(&bus));
        Some(bus)
    }

    pub fn find(&self, path: &str) -> Option<Arc<BusController>> {
        if path.is_empty() {
            return None;
        }
        self.buses.lock().get(&path.to_lowercase()).cloned()
    }

    fn find_or_warn(&self, path: &str) -> Option<Arc<BusController>> {
        let bus = self.find(path);
        if bus.is_none() {
            log::warn!("[Bus] Unknown bus '{}'", path);
        }
        bus
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .buses
            .lock()
            .values()
            .map(|b| b.path().to_string())
            .collect();
        paths.sort();
        paths
    }

    /// Persisted volume for a configured bus
    pub fn load_volume(&self, init: &BusInit) -> Option<f32> {
        self.store.get_f32(&self.settings.prefs_key(init))
    }

    /// Set a bus volume (clamped to `[0, 1]`), persisting it when requested
    ///
    /// Persistence needs `persist`, `persist_volumes` and a config entry
    /// for the bus.
    pub fn set_volume(&self, path: &str, volume: f32, persist: bool) -> bool {
        let Some(bus) = self.find_or_warn(path) else {
            return false;
        };
        let volume = unit_volume(volume);
        let applied = bus.set_volume(volume);

        if !persist || !self.settings.persist_volumes {
            return applied;
        }
        let Some(init) = self.settings.find_init(path) else {
            return applied;
        };
        let key = self.settings.prefs_key(init);
        if let Err(e) = self.store.set_f32(&key, volume) {
            log::error!("[Bus] Failed to persist '{}': {}", key, e);
        }
        applied
    }

    /// Bus volume, `-1.0` for unknown or unavailable buses
    pub fn volume(&self, path: &str) -> f32 {
        self.find_or_warn(path).map_or(-1.0, |b| b.volume())
    }

    pub fn set_mute(&self, path: &str, mute: bool) -> bool {
        self.find_or_warn(path).is_some_and(|b| b.set_mute(mute))
    }

    pub fn is_muted(&self, path: &str) -> bool {
        self.find(path).is_some_and(|b| b.is_muted())
    }

    pub fn stop_events(&self, path: &str, mode: StopMode) -> bool {
        self.find_or_warn(path)
            .is_some_and(|b| b.stop_all_events(mode))
    }

    pub async fn fade(&self, path: &str, to_volume: f32, duration_secs: f32) -> Option<RampOutcome> {
        let bus = self.find_or_warn(path)?;
        Some(bus.fade_to(to_volume, duration_secs).await)
    }

    pub async fn duck(
        &self,
        path: &str,
        to_volume: f32,
        attack_secs: f32,
        hold_secs: f32,
        release_secs: f32,
    ) -> Option<RampOutcome> {
        let bus = self.find_or_warn(path)?;
        Some(bus.duck(to_volume, attack_secs, hold_secs, release_secs).await)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
