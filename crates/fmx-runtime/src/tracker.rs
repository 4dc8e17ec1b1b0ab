//! Instance tracking
//!
//! Every started container gets one watcher task that polls until the
//! engine reports it stopped, then unbinds its tags and drops it from the
//! per-event live count. Uncached voices are owned here and disposed by
//! their watcher.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use fmx_core::{ContainerId, EventGuid};

use crate::container::EventContainer;
use crate::tags::TagIndex;
use crate::timing::{WaitOutcome, spawn_detached, wait_until_stopped};

#[derive(Default)]
struct TrackerState {
    counts: HashMap<EventGuid, usize>,
    watched: HashSet<ContainerId>,
    voices: HashMap<ContainerId, Arc<EventContainer>>,
}

pub(crate) struct InstanceTracker {
    tags: Arc<TagIndex>,
    tick: Duration,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
    state: Mutex<TrackerState>,
}

impl InstanceTracker {
    pub fn new(
        tags: Arc<TagIndex>,
        tick: Duration,
        timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tags,
            tick,
            timeout,
            shutdown,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Bind tags and watch a container that just started
    ///
    /// `owned` voices are disposed once stopped. A container that is
    /// already being watched only gets its tags re-bound.
    pub fn track(self: &Arc<Self>, container: &Arc<EventContainer>, owned: bool) {
        self.tags.bind_active(container);
        {
            let mut state = self.state.lock();
            if !state.watched.insert(container.id()) {
                return;
            }
            *state.counts.entry(container.event().guid).or_default() += 1;
            if owned {
                state.voices.insert(container.id(), Arc::clone(container));
            }
        }

        let tracker = Arc::clone(self);
        let watched = Arc::clone(container);
        let watcher = async move {
            let outcome =
                wait_until_stopped(&watched, tracker.tick, tracker.timeout, &tracker.shutdown).await;
            if outcome == WaitOutcome::TimedOut {
                log::warn!(
                    "[Audio] '{}' never reported stopped, releasing its bookkeeping",
                    watched.name()
                );
            }
            tracker.finish(&watched);
        };
        if !spawn_detached("instance watcher", watcher) {
            self.finish(container);
        }
    }

    fn finish(&self, container: &EventContainer) {
        self.tags.unbind_active(container);
        let id = container.id();
        let voice = {
            let mut state = self.state.lock();
            if !state.watched.remove(&id) {
                return;
            }
            let guid = container.event().guid;
            if let Some(count) = state.counts.get_mut(&guid) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.counts.remove(&guid);
                }
            }
            state.voices.remove(&id)
        };
        if let Some(voice) = voice {
            voice.dispose();
        }
    }

    /// Tracked instances of `event` not yet observed stopped
    pub fn active_count(&self, event: EventGuid) -> usize {
        self.state.lock().counts.get(&event).copied().unwrap_or(0)
    }

    pub fn voices(&self) -> Vec<Arc<EventContainer>> {
        self.state.lock().voices.values().cloned().collect()
    }

    /// Dispose owned voices and forget every count
    pub fn clear(&self) {
        let voices: Vec<_> = {
            let mut state = self.state.lock();
            state.counts.clear();
            state.watched.clear();
            state.voices.drain().map(|(_, v)| v).collect()
        };
        for voice in voices {
            voice.dispose();
        }
    }
}
