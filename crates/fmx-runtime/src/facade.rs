//! Audio Facade
//!
//! Composition root of the runtime. Owns the event cache, bus map, music
//! slot, snapshot stack, tag index and bank service, plus the cooldown and
//! concurrency gates. Construct it once and share it (`Arc<AudioFacade>`).
//!
//! Nothing below the facade panics on a failed engine call: every error is
//! logged here and surfaced as `bool`, `Option` or a sentinel value.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fmx_core::{EventGuid, EventRef, FmxResult, StopMode, positive_duration};
use fmx_engine::{AudioEngine, InstanceHandle};

use crate::bank::BankService;
use crate::bus::{BusController, BusDirectory};
use crate::container::EventContainer;
use crate::error::EngineResultExt;
use crate::music::MusicSequencer;
use crate::notification::{self, AudioNotification, emit};
use crate::ramp::ParameterRamp;
use crate::registry::EventRegistry;
use crate::selection::{EventSequence, WeightPolicy, WeightTable};
use crate::settings::{AudioSettings, BusInit};
use crate::snapshot::SnapshotStack;
use crate::store::VolumeStore;
use crate::tags::TagIndex;
use crate::timing::deadline_after;
use crate::tracker::InstanceTracker;

/// Log a failed runtime call and turn it into an `Option`
fn logged<T>(result: FmxResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_invalid_handle() => {
            log::warn!("[Audio] {}", e);
            None
        }
        Err(e) => {
            log::error!("[Audio] {}", e);
            None
        }
    }
}

pub struct AudioFacade {
    engine: Arc<dyn AudioEngine>,
    settings: AudioSettings,
    registry: Arc<EventRegistry>,
    buses: BusDirectory,
    music: MusicSequencer,
    snapshots: SnapshotStack,
    tags: Arc<TagIndex>,
    banks: BankService,
    params: ParameterRamp,
    tracker: Arc<InstanceTracker>,
    /// Event -> earliest time the next cooldown-gated one-shot may play
    cooldowns: Mutex<HashMap<EventGuid, Instant>>,
    notify: broadcast::Sender<AudioNotification>,
    initialized: AtomicBool,
    shutdown: CancellationToken,
}

impl AudioFacade {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        settings: AudioSettings,
        store: Arc<dyn VolumeStore>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let tick = settings.runtime.tick();
        let notify = notification::channel();

        let registry = Arc::new(EventRegistry::new(
            Arc::clone(&engine),
            settings.events.max_cached_events,
        ));
        let buses = BusDirectory::new(
            Arc::clone(&engine),
            settings.buses.clone(),
            store,
            tick,
            shutdown.clone(),
        );
        let policy: Option<Arc<dyn WeightPolicy>> = if settings.music.shuffle_weights.is_empty() {
            None
        } else {
            Some(Arc::new(WeightTable::from_entries(
                &settings.music.shuffle_weights,
            )))
        };
        let music = MusicSequencer::new(
            Arc::clone(&registry),
            settings.music.clone(),
            policy,
            tick,
            settings.runtime.rng_seed,
            shutdown.clone(),
            notify.clone(),
        );
        let snapshots = SnapshotStack::new(
            Arc::clone(&registry),
            settings.snapshots.default_fade_secs,
            shutdown.clone(),
        );
        let tags = Arc::new(TagIndex::new());
        let tracker = Arc::new(InstanceTracker::new(
            Arc::clone(&tags),
            tick,
            settings.runtime.watch_timeout(),
            shutdown.clone(),
        ));
        let params = ParameterRamp::new(Arc::clone(&engine), tick)
            .with_curves(settings.parameters.global_curve, settings.parameters.event_curve);

        Self {
            banks: BankService::new(Arc::clone(&engine)),
            engine,
            settings,
            registry,
            buses,
            music,
            snapshots,
            tags,
            params,
            tracker,
            cooldowns: Mutex::new(HashMap::new()),
            notify,
            initialized: AtomicBool::new(false),
            shutdown,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Resolve buses, load boot banks, preload events and install tag
    /// templates. Runs once; later calls return `false`.
    pub fn initialize(&self) -> bool {
        if self.shutdown.is_cancelled() {
            log::warn!("[Audio] initialize() after shutdown is ignored");
            return false;
        }
        if self.initialized.swap(true, Ordering::AcqRel) {
            return false;
        }

        let buses = self.buses.initialize();
        let banks = self.banks.load_banks(
            &self.settings.banks.load_on_boot,
            self.settings.banks.load_sample_data,
        );

        let mut preloaded = 0;
        for entry in &self.settings.events.preload {
            let result = self
                .registry
                .create_instance(entry.name.as_deref(), &entry.event, None);
            if logged(result).is_some() {
                preloaded += 1;
            }
        }

        for template in &self.settings.tags {
            for tag in &template.tags {
                self.tags.register_template(template.event.guid, tag);
            }
        }

        log::info!(
            "[Audio] Initialized: {} bus(es), {} bank(s), {} preloaded event(s)",
            buses,
            banks,
            preloaded
        );
        true
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Cancel every running task, stop and dispose every container
    ///
    /// Terminal: the facade cannot be restarted afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.music.shutdown();
        self.snapshots.clear();
        self.tags.clear_active();
        self.tracker.clear();
        self.registry.clear();
        self.cooldowns.lock().clear();
        self.initialized.store(false, Ordering::Release);
        log::info!("[Audio] Shut down");
    }

    /// Apply the scene-change policy
    pub fn on_scene_changed(&self) {
        if self.settings.lifecycle.stop_all_on_scene_change {
            let stopped = self.stop_all();
            log::debug!("[Audio] Scene changed, stopped {} event(s)", stopped);
        }
    }

    #[inline]
    pub fn persists_across_scenes(&self) -> bool {
        self.settings.lifecycle.persist_across_scenes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioNotification> {
        self.notify.subscribe()
    }

    // ─── Accessors ─────────────────────────────────────────────────────────

    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<dyn AudioEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn music(&self) -> &MusicSequencer {
        &self.music
    }

    pub fn tag_index(&self) -> &Arc<TagIndex> {
        &self.tags
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn create_instance(
        &self,
        name: Option<&str>,
        event: &EventRef,
        stop_mode: Option<StopMode>,
    ) -> Option<Arc<EventContainer>> {
        logged(self.registry.create_instance(name, event, stop_mode))
    }

    pub fn find_container(&self, name: &str) -> Option<Arc<EventContainer>> {
        self.registry.find_by_name(name)
    }

    pub fn is_loaded(&self, event: &EventRef) -> bool {
        self.registry.is_loaded(event)
    }

    /// Fire-and-forget: create, start and release an uncached instance
    pub fn play_one_shot(&self, event: &EventRef) -> bool {
        let started = self
            .engine
            .create_instance(event)
            .op("create instance", event)
            .and_then(|handle| {
                self.engine.start(handle).op("start", event)?;
                self.engine.release(handle).op("release", event)
            });
        if logged(started).is_none() {
            return false;
        }
        if let Some(cached) = self.registry.find_by_event(event) {
            self.registry.touch(&cached);
        }
        self.notify_started(event, event.derive_name());
        true
    }

    /// One-shot that is rejected while the event's cooldown runs
    pub fn play_one_shot_with_cooldown(&self, event: &EventRef, cooldown_secs: f32) -> bool {
        let now = Instant::now();
        if self
            .cooldowns
            .lock()
            .get(&event.guid)
            .is_some_and(|until| now < *until)
        {
            log::debug!("[Audio] {} is cooling down", event);
            return false;
        }
        if !self.play_one_shot(event) {
            return false;
        }
        let mut cooldowns = self.cooldowns.lock();
        match positive_duration(cooldown_secs) {
            Some(cooldown) => {
                cooldowns.insert(event.guid, deadline_after(now, cooldown));
            }
            None => {
                cooldowns.remove(&event.guid);
            }
        }
        true
    }

    /// Start a fresh uncached voice, tracked until it stops
    pub fn play_instance(&self, event: &EventRef) -> Option<Arc<EventContainer>> {
        let voice = logged(EventContainer::create(
            Arc::clone(&self.engine),
            event.derive_name(),
            event.clone(),
            StopMode::default(),
        ))?;
        if logged(voice.play()).is_none() {
            voice.dispose();
            return None;
        }
        self.tracker.track(&voice, true);
        self.notify_started(event, voice.name().to_string());
        Some(voice)
    }

    /// Start a voice unless `limit` (at least 1) instances are still live
    pub fn play_if_under_limit(&self, event: &EventRef, limit: usize) -> bool {
        let limit = limit.max(1);
        if self.tracker.active_count(event.guid) >= limit {
            log::debug!("[Audio] {} is at its limit of {}", event, limit);
            return false;
        }
        self.play_instance(event).is_some()
    }

    /// Play the cached container of `event`, loading it on first use
    pub fn play(&self, event: &EventRef) -> bool {
        match logged(self.registry.ensure_loaded(event)) {
            Some(container) => self.play_container(&container),
            None => false,
        }
    }

    pub fn play_by_name(&self, name: &str) -> bool {
        match self.registry.find_by_name(name) {
            Some(container) => self.play_container(&container),
            None => {
                log::warn!("[Audio] No event loaded as '{}'", name);
                false
            }
        }
    }

    fn play_container(&self, container: &Arc<EventContainer>) -> bool {
        if logged(container.play()).is_none() {
            return false;
        }
        self.registry.touch(container);
        self.tracker.track(container, false);
        self.notify_started(container.event(), container.name().to_string());
        true
    }

    fn notify_started(&self, event: &EventRef, name: String) {
        emit(
            &self.notify,
            AudioNotification::EventStarted {
                event: event.clone(),
                name,
            },
        );
    }

    /// Stop the cached container of `event` using its stop policy
    pub fn stop(&self, event: &EventRef) -> bool {
        match self.registry.find_by_event(event) {
            Some(container) => self.stop_container(&container),
            None => false,
        }
    }

    pub fn stop_by_name(&self, name: &str) -> bool {
        match self.registry.find_by_name(name) {
            Some(container) => self.stop_container(&container),
            None => false,
        }
    }

    fn stop_container(&self, container: &EventContainer) -> bool {
        self.tags.unbind_active(container);
        logged(container.stop()).is_some()
    }

    /// Stop every running cached container and tracked voice
    pub fn stop_all(&self) -> usize {
        let mut stopped = self.registry.stop_all();
        for voice in self.tracker.voices() {
            if voice.state_or_stopped().is_running() && logged(voice.stop()).is_some() {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn set_paused_all(&self, paused: bool) {
        self.registry.set_paused_all(paused);
        for voice in self.tracker.voices() {
            logged(voice.set_paused(paused));
        }
    }

    pub fn unload(&self, event: &EventRef) -> bool {
        if let Some(container) = self.registry.find_by_event(event) {
            self.tags.unbind_active(&container);
        }
        self.registry.unload(event)
    }

    pub fn unload_by_name(&self, name: &str) -> bool {
        if let Some(container) = self.registry.find_by_name(name) {
            self.tags.unbind_active(&container);
        }
        self.registry.unload_by_name(name)
    }

    /// Tracked instances of `event` not yet observed stopped
    pub fn active_count(&self, event: &EventRef) -> usize {
        self.tracker.active_count(event.guid)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PARAMETERS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_global_parameter(&self, name: &str, value: f32) -> bool {
        logged(self.params.set_global(name, value)).is_some()
    }

    pub fn global_parameter(&self, name: &str) -> Option<f32> {
        logged(self.params.global(name))
    }

    /// Ramp a global parameter; `true` if the ramp ran to completion
    pub async fn ramp_global_parameter(&self, name: &str, target: f32, duration_secs: f32) -> bool {
        let outcome = self
            .params
            .ramp_global(name, target, duration_secs, &self.shutdown)
            .await;
        logged(outcome).is_some_and(|o| o.is_completed())
    }

    pub fn set_event_parameter(&self, event: &EventRef, name: &str, value: f32) -> bool {
        self.registry
            .find_by_event(event)
            .and_then(|c| logged(c.set_parameter(name, value)))
            .is_some()
    }

    pub async fn ramp_event_parameter(
        &self,
        event: &EventRef,
        name: &str,
        target: f32,
        duration_secs: f32,
    ) -> bool {
        let container = self.registry.find_by_event(event);
        self.ramp_container(container, name, target, duration_secs).await
    }

    pub async fn ramp_parameter_by_name(
        &self,
        container_name: &str,
        name: &str,
        target: f32,
        duration_secs: f32,
    ) -> bool {
        let container = self.registry.find_by_name(container_name);
        self.ramp_container(container, name, target, duration_secs).await
    }

    pub async fn ramp_parameter_by_handle(
        &self,
        handle: InstanceHandle,
        name: &str,
        target: f32,
        duration_secs: f32,
    ) -> bool {
        let container = self.registry.find_by_handle(handle);
        self.ramp_container(container, name, target, duration_secs).await
    }

    async fn ramp_container(
        &self,
        container: Option<Arc<EventContainer>>,
        name: &str,
        target: f32,
        duration_secs: f32,
    ) -> bool {
        let Some(container) = container else {
            log::warn!("[Audio] Cannot ramp '{}': event not loaded", name);
            return false;
        };
        let outcome = self
            .params
            .ramp_event(&container, name, target, duration_secs, &self.shutdown)
            .await;
        logged(outcome).is_some_and(|o| o.is_completed())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BUSES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn find_bus(&self, path: &str) -> Option<Arc<BusController>> {
        self.buses.find(path)
    }

    /// Resolve a bus that is not in the configuration
    pub fn add_bus(&self, init: &BusInit) -> Option<Arc<BusController>> {
        self.buses.add_bus(init)
    }

    pub fn bus_paths(&self) -> Vec<String> {
        self.buses.paths()
    }

    pub fn set_bus_volume(&self, path: &str, volume: f32, persist: bool) -> bool {
        self.buses.set_volume(path, volume, persist)
    }

    /// `-1.0` for unknown or unavailable buses
    pub fn bus_volume(&self, path: &str) -> f32 {
        self.buses.volume(path)
    }

    /// Persisted volume of a configured bus
    pub fn load_bus_volume(&self, path: &str) -> Option<f32> {
        let init = self.buses.settings().find_init(path)?;
        self.buses.load_volume(init)
    }

    pub fn set_bus_mute(&self, path: &str, mute: bool) -> bool {
        self.buses.set_mute(path, mute)
    }

    pub fn is_bus_muted(&self, path: &str) -> bool {
        self.buses.is_muted(path)
    }

    pub fn stop_bus_events(&self, path: &str, mode: StopMode) -> bool {
        self.buses.stop_events(path, mode)
    }

    /// `true` if the fade ran to completion
    pub async fn fade_bus_volume(&self, path: &str, to_volume: f32, duration_secs: f32) -> bool {
        self.buses
            .fade(path, to_volume, duration_secs)
            .await
            .is_some_and(|o| o.is_completed())
    }

    pub async fn duck_bus(
        &self,
        path: &str,
        to_volume: f32,
        attack_secs: f32,
        hold_secs: f32,
        release_secs: f32,
    ) -> bool {
        self.buses
            .duck(path, to_volume, attack_secs, hold_secs, release_secs)
            .await
            .is_some_and(|o| o.is_completed())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BANKS
    // ═══════════════════════════════════════════════════════════════════════

    /// `load_sample_data` of `None` uses the configured default
    pub fn load_bank(&self, name: &str, load_sample_data: Option<bool>) -> bool {
        let sample_data = load_sample_data.unwrap_or(self.settings.banks.load_sample_data);
        self.banks.load_bank(name, sample_data)
    }

    pub fn load_banks<S: AsRef<str>>(&self, names: &[S]) -> usize {
        self.banks
            .load_banks(names, self.settings.banks.load_sample_data)
    }

    pub fn unload_bank(&self, name: &str) -> bool {
        self.banks.unload_bank(name)
    }

    pub fn is_bank_loaded(&self, name: &str) -> bool {
        self.banks.is_bank_loaded(name)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MUSIC
    // ═══════════════════════════════════════════════════════════════════════

    pub fn play_music(&self, event: &EventRef, fade_secs: Option<f32>) -> bool {
        self.music.play_music(event, fade_secs)
    }

    pub fn stop_music(&self, mode: StopMode) {
        self.music.stop_music(mode);
    }

    pub fn current_music(&self) -> Option<EventRef> {
        self.music.current_music().map(|c| c.event().clone())
    }

    pub fn start_playlist(&self, tracks: Vec<EventRef>, looping: bool, crossfade_secs: Option<f32>) {
        self.music.start_playlist(tracks, looping, crossfade_secs);
    }

    pub fn start_sequence(&self, sequence: &EventSequence, crossfade_secs: Option<f32>) {
        self.music.start_sequence(sequence, crossfade_secs);
    }

    pub fn stop_playlist(&self) {
        self.music.stop_playlist();
    }

    pub fn next_track(&self, fade_secs: Option<f32>) -> bool {
        self.music.next_track(fade_secs)
    }

    pub fn previous_track(&self, fade_secs: Option<f32>) -> bool {
        self.music.previous_track(fade_secs)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SNAPSHOTS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn start_snapshot(&self, snapshot: &EventRef) -> bool {
        logged(self.snapshots.start(snapshot)).is_some()
    }

    pub fn stop_snapshot(&self, snapshot: &EventRef, mode: StopMode) -> bool {
        self.snapshots.stop(snapshot, mode)
    }

    pub async fn push_snapshot(&self, snapshot: &EventRef, fade_secs: Option<f32>) -> bool {
        self.snapshots.push(snapshot, fade_secs).await
    }

    pub async fn pop_snapshot(&self, fade_secs: Option<f32>) -> Option<EventRef> {
        self.snapshots.pop(fade_secs).await
    }

    pub fn active_snapshot(&self) -> Option<EventRef> {
        self.snapshots.active()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TAGS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn register_tag(&self, event: &EventRef, tag: &str) -> bool {
        self.tags.register_template(event.guid, tag)
    }

    pub fn unregister_tag(&self, event: &EventRef, tag: &str) -> bool {
        self.tags.unregister_template(event.guid, tag)
    }

    /// Stop every live container bound to `tag`
    pub fn stop_by_tag(&self, tag: &str, mode: StopMode) -> usize {
        self.tags.stop_by_tag(tag, mode)
    }

    /// Tags a container is currently bound to
    pub fn tags_of(&self, container: &EventContainer) -> Vec<String> {
        self.tags.tags_of(container)
    }
}

impl Drop for AudioFacade {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
