//! Music Sequencer
//!
//! One "current music" slot with crossfades, plus a playlist driver:
//!
//! ```text
//! Idle → PreDelay → Selecting → Playing (crossfade in) → WaitingForStop
//!      → PostDelay → Selecting … (or Idle when a one-shot list is exhausted)
//! ```
//!
//! The slot owns one cancellation token for the running crossfade and one
//! for the playlist driver. Starting a new crossfade cancels the old one
//! and takes over every container it was still fading out, so no track is
//! ever left stuck mid-fade.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use fmx_core::{EventRef, FadeCurve, StopMode, non_negative_secs, positive_duration};

use crate::container::EventContainer;
use crate::notification::{AudioNotification, emit};
use crate::ramp::ramp;
use crate::registry::EventRegistry;
use crate::selection::{EventSequence, SelectionMode, TrackSelector, WeightPolicy};
use crate::settings::MusicSettings;
use crate::timing::{sleep_or_cancel, spawn_detached};

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

struct MusicState {
    current: Option<Arc<EventContainer>>,
    /// Containers being faded out by the running crossfade
    outgoing: Vec<Arc<EventContainer>>,
    crossfade: Option<(u64, CancellationToken)>,
    playlist: Option<(u64, CancellationToken)>,
    seq: u64,
    tracks: Vec<EventRef>,
    selector: TrackSelector,
}

impl MusicState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

struct MusicShared {
    registry: Arc<EventRegistry>,
    settings: MusicSettings,
    policy: Option<Arc<dyn WeightPolicy>>,
    tick: Duration,
    shutdown: CancellationToken,
    notify: broadcast::Sender<AudioNotification>,
    state: Mutex<MusicState>,
}

/// Resolved playlist timing
#[derive(Debug, Clone, Copy)]
struct RunTiming {
    crossfade_secs: f32,
    pre_delay: Option<Duration>,
    post_delay: Option<Duration>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEQUENCER
// ═══════════════════════════════════════════════════════════════════════════════

/// Cheap to clone; clones share the same slot
#[derive(Clone)]
pub struct MusicSequencer {
    shared: Arc<MusicShared>,
}

impl MusicSequencer {
    pub fn new(
        registry: Arc<EventRegistry>,
        settings: MusicSettings,
        policy: Option<Arc<dyn WeightPolicy>>,
        tick: Duration,
        rng_seed: Option<u64>,
        shutdown: CancellationToken,
        notify: broadcast::Sender<AudioNotification>,
    ) -> Self {
        Self {
            shared: Arc::new(MusicShared {
                registry,
                settings,
                policy,
                tick,
                shutdown,
                notify,
                state: Mutex::new(MusicState {
                    current: None,
                    outgoing: Vec::new(),
                    crossfade: None,
                    playlist: None,
                    seq: 0,
                    tracks: Vec::new(),
                    selector: TrackSelector::new(rng_seed),
                }),
            }),
        }
    }

    // ─── Single track ──────────────────────────────────────────────────────

    /// Make `event` the current music, crossfading from whatever played before
    ///
    /// `fade_secs` of `None` (or negative) uses the music default. Returns
    /// `false` if the event cannot be loaded.
    pub fn play_music(&self, event: &EventRef, fade_secs: Option<f32>) -> bool {
        self.shared.play_music(event, fade_secs)
    }

    /// Stop the current music (and anything fading out) and end the playlist
    pub fn stop_music(&self, mode: StopMode) {
        let (current, outgoing) = {
            let mut state = self.shared.state.lock();
            if let Some((_, token)) = state.crossfade.take() {
                token.cancel();
            }
            if let Some((_, token)) = state.playlist.take() {
                token.cancel();
            }
            (state.current.take(), std::mem::take(&mut state.outgoing))
        };
        for c in current.iter().chain(outgoing.iter()) {
            if let Err(e) = c.stop_with(mode) {
                log::debug!("[Music] {}", e);
            }
        }
    }

    pub fn current_music(&self) -> Option<Arc<EventContainer>> {
        self.shared.state.lock().current.clone()
    }

    pub fn is_crossfading(&self) -> bool {
        self.shared.state.lock().crossfade.is_some()
    }

    // ─── Playlist ──────────────────────────────────────────────────────────

    /// Start a playlist from a plain track list using the music defaults
    pub fn start_playlist(&self, tracks: Vec<EventRef>, looping: bool, crossfade_secs: Option<f32>) {
        let defaults = &self.shared.settings;
        let sequence = EventSequence::new(tracks)
            .with_loop(looping)
            .with_shuffle(defaults.default_shuffle)
            .with_no_repeat_window(defaults.default_no_repeat_window)
            .with_crossfade(defaults.default_fade_secs)
            .with_delays(defaults.default_pre_delay_secs, defaults.default_post_delay_secs);
        self.start_sequence(&sequence, crossfade_secs);
    }

    /// Start an authored sequence
    ///
    /// An explicit non-negative `crossfade_secs` overrides the sequence's.
    pub fn start_sequence(&self, sequence: &EventSequence, crossfade_secs: Option<f32>) {
        let shared = &self.shared;
        let count = sequence.tracks.len();

        let weights = match &sequence.weights {
            Some(w) if w.len() == count => Some(w.clone()),
            _ if sequence.shuffle => shared
                .policy
                .as_ref()
                .map(|p| p.weights(&sequence.tracks))
                .filter(|w| w.len() == count),
            _ => None,
        };
        let mode = SelectionMode {
            shuffle: sequence.shuffle,
            no_repeat_window: sequence.no_repeat_window,
            weights,
        };
        let timing = RunTiming {
            crossfade_secs: match crossfade_secs {
                Some(secs) if secs >= 0.0 => secs,
                _ => non_negative_secs(sequence.crossfade_secs),
            },
            pre_delay: positive_duration(sequence.pre_delay_secs),
            post_delay: positive_duration(sequence.post_delay_secs),
        };

        let token = shared.shutdown.child_token();
        let run = {
            let mut state = shared.state.lock();
            if let Some((_, old)) = state.playlist.take() {
                old.cancel();
            }
            state.tracks = sequence.tracks.clone();
            state.selector.reset(count, sequence.looping, mode);
            let run = state.next_seq();
            if count > 0 {
                state.playlist = Some((run, token.clone()));
            }
            run
        };
        if count == 0 {
            log::debug!("[Music] Empty playlist, nothing to play");
            return;
        }

        log::info!(
            "[Music] Playlist of {} track(s), loop={}, shuffle={}",
            count,
            sequence.looping,
            sequence.shuffle
        );
        let task_shared = Arc::clone(shared);
        if !spawn_detached(
            "playlist",
            run_playlist(task_shared, run, token, timing),
        ) {
            shared.clear_playlist(run);
        }
    }

    /// Cancel the playlist driver; the current track keeps playing
    pub fn stop_playlist(&self) {
        if let Some((_, token)) = self.shared.state.lock().playlist.take() {
            token.cancel();
        }
    }

    pub fn is_playlist_running(&self) -> bool {
        self.shared.state.lock().playlist.is_some()
    }

    /// Cursor of the playlist (last selected or jumped-to track)
    pub fn playlist_index(&self) -> usize {
        self.shared.state.lock().selector.cursor()
    }

    pub fn playlist_len(&self) -> usize {
        self.shared.state.lock().tracks.len()
    }

    pub fn next_track(&self, fade_secs: Option<f32>) -> bool {
        self.jump(1, fade_secs)
    }

    pub fn previous_track(&self, fade_secs: Option<f32>) -> bool {
        self.jump(-1, fade_secs)
    }

    fn jump(&self, delta: isize, fade_secs: Option<f32>) -> bool {
        let track = {
            let mut state = self.shared.state.lock();
            let Some(index) = state.selector.step(delta) else {
                return false;
            };
            state.tracks[index].clone()
        };
        self.shared.play_music(&track, fade_secs)
    }

    /// Cancel every music task and forget the slot
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if let Some((_, token)) = state.crossfade.take() {
            token.cancel();
        }
        if let Some((_, token)) = state.playlist.take() {
            token.cancel();
        }
        state.current = None;
        state.outgoing.clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CROSSFADE
// ═══════════════════════════════════════════════════════════════════════════════

impl MusicShared {
    fn play_music(self: &Arc<Self>, event: &EventRef, fade_secs: Option<f32>) -> bool {
        let fade_secs = match fade_secs {
            Some(secs) if secs >= 0.0 => secs,
            _ => non_negative_secs(self.settings.default_fade_secs),
        };
        let next = match self.registry.ensure_loaded(event) {
            Ok(c) => c,
            Err(e) => {
                log::error!("[Music] Cannot play {}: {}", event, e);
                return false;
            }
        };
        self.registry.touch(&next);
        self.crossfade_to(next, fade_secs);
        true
    }

    fn crossfade_to(self: &Arc<Self>, next: Arc<EventContainer>, fade_secs: f32) {
        let token = self.shutdown.child_token();
        let (seq, outgoing) = {
            let mut state = self.state.lock();
            if let Some((_, old)) = state.crossfade.take() {
                old.cancel();
            }
            let mut outgoing = std::mem::take(&mut state.outgoing);
            if let Some(prev) = state.current.replace(Arc::clone(&next)) {
                outgoing.push(prev);
            }
            outgoing.retain(|c| c.id() != next.id() && c.is_valid());
            let seq = state.next_seq();
            (seq, outgoing)
        };

        if let Err(e) = next.set_volume(0.0) {
            log::warn!("[Music] {}", e);
        }
        if let Err(e) = next.play() {
            log::error!("[Music] {}", e);
        }
        log::debug!("[Music] Now playing '{}'", next.name());

        let duration = positive_duration(fade_secs);
        if outgoing.is_empty() || duration.is_none() {
            finish_crossfade(&next, &outgoing);
            return;
        }

        let starts: Vec<f32> = outgoing
            .iter()
            .map(|c| c.volume().unwrap_or(1.0).clamp(0.0, 1.0))
            .collect();
        {
            let mut state = self.state.lock();
            state.crossfade = Some((seq, token.clone()));
            state.outgoing = outgoing.clone();
        }

        let shared = Arc::clone(self);
        let tick = self.tick;
        let task_next = Arc::clone(&next);
        let task_outgoing = outgoing.clone();
        let task = async move {
            let outcome = ramp(0.0, 1.0, duration, FadeCurve::Linear, tick, &token, |a| {
                if let Err(e) = task_next.set_volume(a) {
                    log::debug!("[Music] {}", e);
                }
                for (c, start) in task_outgoing.iter().zip(&starts) {
                    if let Err(e) = c.set_volume(start * (1.0 - a)) {
                        log::debug!("[Music] {}", e);
                    }
                }
            })
            .await;
            // A superseding crossfade owns the outgoing set now
            if !outcome.is_completed() {
                return;
            }
            finish_crossfade(&task_next, &task_outgoing);
            let mut state = shared.state.lock();
            if state.crossfade.as_ref().is_some_and(|(s, _)| *s == seq) {
                state.crossfade = None;
                state.outgoing.clear();
            }
        };
        if !spawn_detached("music crossfade", task) {
            finish_crossfade(&next, &outgoing);
            let mut state = self.state.lock();
            state.crossfade = None;
            state.outgoing.clear();
        }
    }

    fn clear_playlist(&self, run: u64) {
        let mut state = self.state.lock();
        if state.playlist.as_ref().is_some_and(|(r, _)| *r == run) {
            state.playlist = None;
        }
    }

    fn current_is_stopped(&self) -> bool {
        let current = self.state.lock().current.clone();
        current.is_none_or(|c| c.state_or_stopped().is_stopped())
    }
}

/// Snap the incoming track to full volume and stop everything outgoing
fn finish_crossfade(next: &EventContainer, outgoing: &[Arc<EventContainer>]) {
    if let Err(e) = next.set_volume(1.0) {
        log::debug!("[Music] {}", e);
    }
    for c in outgoing {
        if let Err(e) = c.stop() {
            log::debug!("[Music] {}", e);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYLIST DRIVER
// ═══════════════════════════════════════════════════════════════════════════════

async fn run_playlist(
    shared: Arc<MusicShared>,
    run: u64,
    token: CancellationToken,
    timing: RunTiming,
) {
    loop {
        if let Some(delay) = timing.pre_delay {
            if !sleep_or_cancel(delay, &token).await {
                return;
            }
        }
        if token.is_cancelled() {
            return;
        }

        let (index, track) = {
            let mut state = shared.state.lock();
            if state.tracks.is_empty() {
                break;
            }
            let index = state.selector.select_next();
            (index, state.tracks[index].clone())
        };

        emit(
            &shared.notify,
            AudioNotification::TrackStarted {
                event: track.clone(),
                index,
            },
        );
        if shared.play_music(&track, Some(timing.crossfade_secs)) {
            while !shared.current_is_stopped() {
                if !sleep_or_cancel(shared.tick, &token).await {
                    return;
                }
            }
        } else if !sleep_or_cancel(shared.tick, &token).await {
            return;
        }
        emit(&shared.notify, AudioNotification::TrackEnded { event: track, index });

        if let Some(delay) = timing.post_delay {
            if !sleep_or_cancel(delay, &token).await {
                return;
            }
        }
        if !shared.state.lock().selector.advance() {
            log::debug!("[Music] Playlist finished");
            break;
        }
    }
    shared.clear_playlist(run);
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification;
    use fmx_core::PlaybackState;
    use fmx_engine::{AudioEngine, SimEventSpec, SimulatedEngine};

    const TICK: Duration = Duration::from_millis(10);

    struct Rig {
        engine: Arc<SimulatedEngine>,
        music: MusicSequencer,
        notes: broadcast::Receiver<AudioNotification>,
    }

    fn rig(settings: MusicSettings) -> Rig {
        let engine = Arc::new(SimulatedEngine::new());
        let registry = Arc::new(EventRegistry::new(engine.clone(), 0));
        let tx = notification::channel();
        let notes = tx.subscribe();
        let music = MusicSequencer::new(
            registry,
            settings,
            None,
            TICK,
            Some(11),
            CancellationToken::new(),
            tx,
        );
        Rig { engine, music, notes }
    }

    fn track(name: &str) -> EventRef {
        EventRef::from_path(format!("event:/Music/{name}"))
    }

    fn volume(engine: &SimulatedEngine, c: &EventContainer) -> f32 {
        engine.instance_volume(c.handle()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_track_snaps_to_full() {
        let r = rig(MusicSettings::default());
        assert!(r.music.play_music(&track("A"), None));
        let a = r.music.current_music().unwrap();
        assert_eq!(volume(&r.engine, &a), 1.0);
        assert_eq!(a.playback_state().unwrap(), PlaybackState::Playing);
        assert!(!r.music.is_crossfading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossfade_completes() {
        let r = rig(MusicSettings::default());
        r.music.play_music(&track("A"), None);
        let a = r.music.current_music().unwrap();

        r.music.play_music(&track("B"), Some(1.0));
        let b = r.music.current_music().unwrap();
        assert!(r.music.is_crossfading());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let mid = volume(&r.engine, &a);
        assert!(mid > 0.3 && mid < 0.7, "mid = {mid}");

        tokio::time::sleep(Duration::from_millis(520)).await;
        assert_eq!(a.playback_state().unwrap(), PlaybackState::Stopped);
        assert_eq!(volume(&r.engine, &b), 1.0);
        assert!(!r.music.is_crossfading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_crossfade_leaves_nothing_stuck() {
        let r = rig(MusicSettings::default());
        r.music.play_music(&track("A"), None);
        let a = r.music.current_music().unwrap();
        r.music.play_music(&track("B"), Some(1.0));
        let b = r.music.current_music().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        r.music.play_music(&track("C"), Some(1.0));
        let c = r.music.current_music().unwrap();

        tokio::time::sleep(Duration::from_millis(1020)).await;
        assert_eq!(a.playback_state().unwrap(), PlaybackState::Stopped);
        assert_eq!(b.playback_state().unwrap(), PlaybackState::Stopped);
        assert_eq!(volume(&r.engine, &a), 0.0);
        assert_eq!(c.playback_state().unwrap(), PlaybackState::Playing);
        assert_eq!(volume(&r.engine, &c), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_fade_stops_previous_at_once() {
        let r = rig(MusicSettings::default());
        r.music.play_music(&track("A"), None);
        let a = r.music.current_music().unwrap();
        r.music.play_music(&track("B"), Some(0.0));
        assert_eq!(a.playback_state().unwrap(), PlaybackState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_playlist_runs_once() {
        let mut r = rig(MusicSettings::default());
        let (a, b) = (track("A"), track("B"));
        for t in [&a, &b] {
            r.engine.add_event(t, SimEventSpec::one_shot(Duration::from_secs(1)));
        }

        r.music.start_playlist(vec![a.clone(), b.clone()], false, Some(0.0));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut notes = Vec::new();
        while let Ok(n) = r.notes.try_recv() {
            notes.push(n);
        }
        assert_eq!(
            notes,
            vec![
                AudioNotification::TrackStarted { event: a.clone(), index: 0 },
                AudioNotification::TrackEnded { event: a, index: 0 },
                AudioNotification::TrackStarted { event: b.clone(), index: 1 },
                AudioNotification::TrackEnded { event: b, index: 1 },
            ]
        );
        assert!(!r.music.is_playlist_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_and_post_delays() {
        let r = rig(MusicSettings::default());
        let a = track("A");
        r.engine.add_event(&a, SimEventSpec::one_shot(Duration::from_millis(500)));

        let seq = EventSequence::new(vec![a.clone()])
            .with_loop(true)
            .with_delays(1.0, 2.0);
        r.music.start_sequence(&seq, Some(0.0));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(r.engine.instances_of(&a).is_empty());

        // Pre 1s + play 0.5s + post 2s + pre 1s = second start at 4.5s
        tokio::time::sleep(Duration::from_millis(200)).await;
        let h = r.engine.instances_of(&a)[0];
        assert_eq!(r.engine.playback_state(h).unwrap(), PlaybackState::Playing);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(r.engine.playback_state(h).unwrap(), PlaybackState::Stopped);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(r.engine.playback_state(h).unwrap(), PlaybackState::Playing);

        r.music.stop_playlist();
        assert!(!r.music.is_playlist_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_playlist_keeps_track_playing() {
        let r = rig(MusicSettings::default());
        let a = track("A");
        r.music.start_playlist(vec![a.clone()], true, Some(0.0));
        tokio::time::sleep(Duration::from_millis(50)).await;

        r.music.stop_playlist();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let current = r.music.current_music().unwrap();
        assert_eq!(current.playback_state().unwrap(), PlaybackState::Playing);

        r.music.stop_music(StopMode::Immediate);
        assert_eq!(current.playback_state().unwrap(), PlaybackState::Stopped);
        assert!(r.music.current_music().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_weighted_sequence_picks_only_positive() {
        let r = rig(MusicSettings::default());
        let tracks = vec![track("A"), track("B"), track("C")];
        for t in &tracks {
            r.engine.add_event(t, SimEventSpec::one_shot(Duration::from_millis(100)));
        }
        let seq = EventSequence::new(tracks.clone())
            .with_shuffle(true)
            .with_weights(vec![0.0, 1.0, 0.0]);
        r.music.start_sequence(&seq, Some(0.0));
        tokio::time::sleep(Duration::from_secs(2)).await;
        r.music.stop_playlist();

        assert!(r.engine.instances_of(&tracks[0]).is_empty());
        assert!(r.engine.instances_of(&tracks[2]).is_empty());
        assert_eq!(r.engine.instances_of(&tracks[1]).len(), 1);
        assert_eq!(r.music.playlist_index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_and_previous_wrap() {
        let r = rig(MusicSettings::default());
        let tracks = vec![track("A"), track("B"), track("C")];
        r.music.start_playlist(tracks.clone(), true, Some(0.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        r.music.stop_playlist();
        assert_eq!(r.music.playlist_index(), 0);

        assert!(r.music.previous_track(Some(0.0)));
        assert_eq!(r.music.playlist_index(), 2);
        assert_eq!(r.music.current_music().unwrap().event(), &tracks[2]);

        assert!(r.music.next_track(Some(0.0)));
        assert_eq!(r.music.playlist_index(), 0);
        assert_eq!(r.music.current_music().unwrap().event(), &tracks[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_playlist_is_noop() {
        let r = rig(MusicSettings::default());
        r.music.start_playlist(Vec::new(), true, None);
        assert!(!r.music.is_playlist_running());
        assert!(!r.music.next_track(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_track_does_not_spin() {
        let r = rig(MusicSettings::default());
        let bad = track("Broken");
        r.engine.reject_event(&bad);
        r.music.start_playlist(vec![bad], true, Some(0.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(r.music.is_playlist_running());
        r.music.stop_playlist();
    }
}
