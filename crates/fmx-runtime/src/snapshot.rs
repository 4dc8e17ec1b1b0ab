//! Snapshot Stack
//!
//! Mix snapshots are ordinary events. The stack keeps at most one of them
//! started on its behalf: pushing stops the current top, waits the fade,
//! then starts the new top; popping reverses it. Transitions are
//! serialized. Starting or stopping a stack-managed snapshot directly is
//! the caller's responsibility.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use fmx_core::{EventRef, FmxResult, StopMode, positive_duration};

use crate::container::EventContainer;
use crate::registry::EventRegistry;
use crate::timing::sleep_or_cancel;

pub struct SnapshotStack {
    registry: Arc<EventRegistry>,
    default_fade_secs: f32,
    shutdown: CancellationToken,
    stack: Mutex<Vec<Arc<EventContainer>>>,
    transition: tokio::sync::Mutex<()>,
}

impl SnapshotStack {
    pub fn new(
        registry: Arc<EventRegistry>,
        default_fade_secs: f32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            default_fade_secs,
            shutdown,
            stack: Mutex::new(Vec::new()),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    // ─── Direct control ────────────────────────────────────────────────────

    /// Start a snapshot outside the stack
    pub fn start(&self, snapshot: &EventRef) -> FmxResult<Arc<EventContainer>> {
        let container = self.registry.ensure_loaded(snapshot)?;
        container.play()?;
        self.registry.touch(&container);
        log::debug!("[Snapshots] Started {}", snapshot);
        Ok(container)
    }

    /// Stop a loaded snapshot; `false` if it was never loaded
    pub fn stop(&self, snapshot: &EventRef, mode: StopMode) -> bool {
        let Some(container) = self.registry.find_by_event(snapshot) else {
            return false;
        };
        match container.stop_with(mode) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[Snapshots] {}", e);
                false
            }
        }
    }

    // ─── Stack ─────────────────────────────────────────────────────────────

    fn fade_for(&self, fade_secs: Option<f32>) -> Option<std::time::Duration> {
        positive_duration(fade_secs.unwrap_or(self.default_fade_secs))
    }

    /// Push a snapshot on top, replacing the active one
    ///
    /// Returns `false` if the snapshot cannot be loaded or the transition
    /// was cancelled by shutdown.
    pub async fn push(&self, snapshot: &EventRef, fade_secs: Option<f32>) -> bool {
        let container = match self.registry.ensure_loaded(snapshot) {
            Ok(c) => c,
            Err(e) => {
                log::error!("[Snapshots] Cannot push {}: {}", snapshot, e);
                return false;
            }
        };

        let _transition = self.transition.lock().await;
        let top = self.stack.lock().last().cloned();
        if let Some(top) = top {
            if let Err(e) = top.stop() {
                log::warn!("[Snapshots] {}", e);
            }
            if let Some(fade) = self.fade_for(fade_secs) {
                if !sleep_or_cancel(fade, &self.shutdown).await {
                    return false;
                }
            }
        }

        self.stack.lock().push(Arc::clone(&container));
        if let Err(e) = container.play() {
            log::warn!("[Snapshots] {}", e);
        }
        self.registry.touch(&container);
        log::debug!("[Snapshots] Pushed {}", snapshot);
        true
    }

    /// Stop and remove the top, then restart the one below it
    ///
    /// No-op (`None`) on an empty stack; returns the popped snapshot.
    pub async fn pop(&self, fade_secs: Option<f32>) -> Option<EventRef> {
        let _transition = self.transition.lock().await;
        let popped = self.stack.lock().pop()?;
        if let Err(e) = popped.stop() {
            log::warn!("[Snapshots] {}", e);
        }

        let below = self.stack.lock().last().cloned();
        if let Some(below) = below {
            if let Some(fade) = self.fade_for(fade_secs) {
                if !sleep_or_cancel(fade, &self.shutdown).await {
                    return Some(popped.event().clone());
                }
            }
            if let Err(e) = below.play() {
                log::warn!("[Snapshots] {}", e);
            }
            self.registry.touch(&below);
        }
        log::debug!("[Snapshots] Popped {}", popped.event());
        Some(popped.event().clone())
    }

    /// Snapshot currently on top
    pub fn active(&self) -> Option<EventRef> {
        self.stack.lock().last().map(|c| c.event().clone())
    }

    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Forget the stack without touching playback
    pub fn clear(&self) {
        self.stack.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmx_core::PlaybackState;
    use fmx_engine::{EngineCall, SimulatedEngine};
    use std::time::Duration;
    use tokio::time::Instant;

    fn setup() -> (Arc<SimulatedEngine>, SnapshotStack) {
        let engine = Arc::new(SimulatedEngine::new());
        let registry = Arc::new(EventRegistry::new(engine.clone(), 0));
        (engine, SnapshotStack::new(registry, 0.25, CancellationToken::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_waits_fade_between_stop_and_start() {
        let (engine, stack) = setup();
        let s1 = EventRef::from_path("snapshot:/Underwater");
        let s2 = EventRef::from_path("snapshot:/Pause");

        assert!(stack.push(&s1, None).await);
        let start = Instant::now();
        assert!(stack.push(&s2, Some(0.5)).await);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(stack.active(), Some(s2.clone()));
        assert_eq!(stack.depth(), 2);

        let order: Vec<_> = engine
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Start { event, .. } => Some(("start", event)),
                EngineCall::Stop { event, .. } => Some(("stop", event)),
                _ => None,
            })
            .collect();
        assert_eq!(
            order,
            vec![("start", s1.guid), ("stop", s1.guid), ("start", s2.guid)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_restarts_below() {
        let (engine, stack) = setup();
        let s1 = EventRef::from_path("snapshot:/Underwater");
        let s2 = EventRef::from_path("snapshot:/Pause");
        stack.push(&s1, Some(0.0)).await;
        stack.push(&s2, Some(0.0)).await;
        engine.clear_calls();

        assert_eq!(stack.pop(None).await, Some(s2.clone()));
        assert_eq!(stack.active(), Some(s1.clone()));
        let calls = engine.calls();
        assert!(matches!(calls[0], EngineCall::Stop { event, .. } if event == s2.guid));
        assert!(matches!(calls[1], EngineCall::Start { event, .. } if event == s1.guid));

        assert_eq!(stack.pop(None).await, Some(s1.clone()));
        assert_eq!(stack.pop(None).await, None);
        assert_eq!(stack.depth(), 0);
    }

    #[tokio::test]
    async fn test_direct_start_stop() {
        let (_engine, stack) = setup();
        let s = EventRef::from_path("snapshot:/Combat");
        let c = stack.start(&s).unwrap();
        assert_eq!(c.playback_state().unwrap(), PlaybackState::Playing);
        assert!(stack.stop(&s, StopMode::Immediate));
        assert!(!stack.stop(&EventRef::from_path("snapshot:/Other"), StopMode::Immediate));
    }
}
