//! Event Registry
//!
//! Cache of live [`EventContainer`]s indexed by name and by event GUID,
//! with an optional LRU cap. Both indices always point at live (not
//! disposed) containers; eviction never touches a container whose
//! instance is still sounding.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use fmx_core::{ContainerId, EventGuid, EventRef, FmxResult, StopMode};
use fmx_engine::{AudioEngine, InstanceHandle};

use crate::container::EventContainer;

#[derive(Default)]
struct RegistryInner {
    /// Insertion order (eviction ties go to the oldest entry)
    containers: Vec<Arc<EventContainer>>,
    by_name: HashMap<String, Arc<EventContainer>>,
    by_event: HashMap<EventGuid, Arc<EventContainer>>,
    last_used: HashMap<ContainerId, Instant>,
}

impl RegistryInner {
    /// Drop every index entry of a container
    fn remove(&mut self, container: &Arc<EventContainer>) {
        let id = container.id();
        self.containers.retain(|c| c.id() != id);
        self.last_used.remove(&id);
        if self.by_name.get(container.name()).is_some_and(|c| c.id() == id) {
            self.by_name.remove(container.name());
        }
        let guid = container.event().guid;
        if self.by_event.get(&guid).is_some_and(|c| c.id() == id) {
            // Another cached container of the same event takes over the slot
            match self.containers.iter().find(|c| c.event().guid == guid) {
                Some(other) => {
                    self.by_event.insert(guid, Arc::clone(other));
                }
                None => {
                    self.by_event.remove(&guid);
                }
            }
        }
    }
}

/// Container cache
pub struct EventRegistry {
    engine: Arc<dyn AudioEngine>,
    max_cached: usize,
    inner: Mutex<RegistryInner>,
}

impl EventRegistry {
    /// `max_cached == 0` disables eviction
    pub fn new(engine: Arc<dyn AudioEngine>, max_cached: usize) -> Self {
        Self {
            engine,
            max_cached,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn AudioEngine> {
        &self.engine
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CREATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create (or return the existing) container bound to `name`
    ///
    /// Idempotent by name: an existing container is returned unchanged even
    /// if it was created for a different event. Without a name, one is
    /// derived from the event path or GUID.
    pub fn create_instance(
        &self,
        name: Option<&str>,
        event: &EventRef,
        stop_mode: Option<StopMode>,
    ) -> FmxResult<Arc<EventContainer>> {
        let name = match name {
            Some(n) if !n.trim().is_empty() => n.to_string(),
            _ => event.derive_name(),
        };
        if let Some(existing) = self.inner.lock().by_name.get(&name) {
            return Ok(Arc::clone(existing));
        }

        let container = EventContainer::create(
            Arc::clone(&self.engine),
            name.clone(),
            event.clone(),
            stop_mode.unwrap_or_default(),
        )?;

        let evicted = {
            let mut inner = self.inner.lock();
            // Lost a race against another creator of the same name
            if let Some(existing) = inner.by_name.get(&name) {
                let existing = Arc::clone(existing);
                drop(inner);
                container.dispose();
                return Ok(existing);
            }
            inner.containers.push(Arc::clone(&container));
            inner.by_name.insert(name, Arc::clone(&container));
            inner.by_event.insert(event.guid, Arc::clone(&container));
            inner.last_used.insert(container.id(), Instant::now());
            self.evict_candidate(&mut inner, container.id())
        };

        log::debug!("[Registry] Created '{}' for {}", container.name(), event);
        if let Some(victim) = evicted {
            log::debug!("[Registry] Evicted '{}'", victim.name());
            victim.dispose();
        }
        Ok(container)
    }

    /// Find-by-event or create with a derived name
    pub fn preload(&self, event: &EventRef) -> FmxResult<Arc<EventContainer>> {
        match self.find_by_event(event) {
            Some(c) => Ok(c),
            None => self.create_instance(None, event, None),
        }
    }

    #[inline]
    pub fn ensure_loaded(&self, event: &EventRef) -> FmxResult<Arc<EventContainer>> {
        self.preload(event)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOOKUP
    // ═══════════════════════════════════════════════════════════════════════

    pub fn find_by_name(&self, name: &str) -> Option<Arc<EventContainer>> {
        self.inner.lock().by_name.get(name).cloned()
    }

    pub fn find_by_event(&self, event: &EventRef) -> Option<Arc<EventContainer>> {
        self.inner.lock().by_event.get(&event.guid).cloned()
    }

    pub fn find_by_handle(&self, handle: InstanceHandle) -> Option<Arc<EventContainer>> {
        self.inner
            .lock()
            .containers
            .iter()
            .find(|c| c.handle() == handle)
            .cloned()
    }

    pub fn is_loaded(&self, event: &EventRef) -> bool {
        self.inner.lock().by_event.contains_key(&event.guid)
    }

    pub fn is_loaded_name(&self, name: &str) -> bool {
        self.inner.lock().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Container names in creation order
    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .containers
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn containers(&self) -> Vec<Arc<EventContainer>> {
        self.inner.lock().containers.clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // USAGE / EVICTION
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a use of a cached container
    pub fn touch(&self, container: &EventContainer) {
        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(container.name()) {
            inner.last_used.insert(container.id(), Instant::now());
        }
    }

    /// Pick and unlink at most one idle, least-recently-used container
    ///
    /// The container that triggered the check is never its own victim.
    fn evict_candidate(
        &self,
        inner: &mut RegistryInner,
        created: ContainerId,
    ) -> Option<Arc<EventContainer>> {
        if self.max_cached == 0 || inner.containers.len() <= self.max_cached {
            return None;
        }

        let mut candidate: Option<(&Arc<EventContainer>, Instant)> = None;
        for c in &inner.containers {
            if c.id() == created || c.state_or_stopped().is_live() {
                continue;
            }
            let Some(last) = inner.last_used.get(&c.id()).copied() else {
                candidate = Some((c, Instant::now()));
                break;
            };
            if candidate.is_none_or(|(_, oldest)| last < oldest) {
                candidate = Some((c, last));
            }
        }

        let victim = Arc::clone(candidate?.0);
        inner.remove(&victim);
        Some(victim)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UNLOAD / BULK
    // ═══════════════════════════════════════════════════════════════════════

    pub fn unload_by_name(&self, name: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let Some(c) = inner.by_name.get(name).cloned() else {
                return false;
            };
            inner.remove(&c);
            c
        };
        removed.dispose();
        true
    }

    pub fn unload(&self, event: &EventRef) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let Some(c) = inner.by_event.get(&event.guid).cloned() else {
                return false;
            };
            inner.remove(&c);
            c
        };
        removed.dispose();
        true
    }

    /// Stop containers observed playing or starting
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for c in self.containers() {
            if !c.state_or_stopped().is_running() {
                continue;
            }
            match c.stop() {
                Ok(()) => stopped += 1,
                Err(e) => log::warn!("[Registry] {}", e),
            }
        }
        stopped
    }

    pub fn set_paused_all(&self, paused: bool) {
        for c in self.containers() {
            if let Err(e) = c.set_paused(paused) {
                log::warn!("[Registry] {}", e);
            }
        }
    }

    /// Dispose every container and empty the cache
    pub fn clear(&self) {
        let drained = {
            let mut inner = self.inner.lock();
            inner.by_name.clear();
            inner.by_event.clear();
            inner.last_used.clear();
            std::mem::take(&mut inner.containers)
        };
        for c in drained {
            c.dispose();
        }
    }

    /// Both indices agree with the container list
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let inner = self.inner.lock();
        assert_eq!(inner.by_name.len(), inner.containers.len());
        for c in &inner.containers {
            assert!(!c.is_disposed());
            assert_eq!(inner.by_name.get(c.name()).map(|x| x.id()), Some(c.id()));
            let slot = inner.by_event.get(&c.event().guid).expect("event slot");
            assert_eq!(slot.event().guid, c.event().guid);
        }
        for c in inner.by_event.values() {
            assert!(inner.containers.iter().any(|x| x.id() == c.id()));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use fmx_core::PlaybackState;
    use fmx_engine::{SimEventSpec, SimulatedEngine};
    use std::time::Duration;

    fn ev(path: &str) -> EventRef {
        EventRef::from_path(path)
    }

    fn registry(cap: usize) -> (Arc<SimulatedEngine>, EventRegistry) {
        let engine = Arc::new(SimulatedEngine::new());
        let registry = EventRegistry::new(engine.clone(), cap);
        (engine, registry)
    }

    #[tokio::test]
    async fn test_create_is_idempotent_by_name() {
        let (_engine, reg) = registry(0);
        let a = reg.create_instance(Some("Hit"), &ev("event:/SFX/Hit"), None).unwrap();
        let b = reg.create_instance(Some("Hit"), &ev("event:/SFX/Other"), None).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(b.event(), &ev("event:/SFX/Hit"));
        assert_eq!(reg.len(), 1);
        reg.assert_consistent();
    }

    #[tokio::test]
    async fn test_derived_names_and_lookup() {
        let (_engine, reg) = registry(0);
        let c = reg.create_instance(None, &ev("event:/UI/Click"), Some(StopMode::Immediate)).unwrap();
        assert_eq!(c.name(), "Click");
        assert_eq!(c.stop_mode(), StopMode::Immediate);
        assert!(reg.is_loaded_name("Click"));
        assert!(reg.is_loaded(&ev("event:/UI/Click")));
        assert_eq!(reg.find_by_handle(c.handle()).map(|x| x.id()), Some(c.id()));
        assert!(reg.find_by_name("Nope").is_none());

        let guid_only = EventRef::new(EventGuid::from_u128(42));
        let g = reg.create_instance(None, &guid_only, None).unwrap();
        assert_eq!(g.name(), guid_only.guid.to_string());
    }

    #[tokio::test]
    async fn test_create_failure_leaves_no_entry() {
        let (engine, reg) = registry(0);
        let missing = ev("event:/Missing");
        engine.reject_event(&missing);
        assert!(reg.create_instance(None, &missing, None).is_err());
        assert!(reg.is_empty());
        reg.assert_consistent();
    }

    #[tokio::test]
    async fn test_unload_by_name_and_event() {
        let (engine, reg) = registry(0);
        let a = reg.create_instance(Some("A"), &ev("event:/A"), None).unwrap();
        reg.create_instance(Some("B"), &ev("event:/B"), None).unwrap();

        assert!(reg.unload_by_name("A"));
        assert!(!reg.unload_by_name("A"));
        assert!(a.is_disposed());
        assert!(!engine.is_instance_valid(a.handle()));

        assert!(reg.unload(&ev("event:/B")));
        assert!(!reg.unload(&ev("event:/B")));
        assert!(reg.is_empty());
        reg.assert_consistent();
    }

    #[tokio::test]
    async fn test_two_names_one_event_keeps_slot() {
        let (_engine, reg) = registry(0);
        let e = ev("event:/Amb/Wind");
        let a = reg.create_instance(Some("WindA"), &e, None).unwrap();
        let b = reg.create_instance(Some("WindB"), &e, None).unwrap();
        assert_eq!(reg.find_by_event(&e).map(|c| c.id()), Some(b.id()));

        assert!(reg.unload_by_name("WindB"));
        assert_eq!(reg.find_by_event(&e).map(|c| c.id()), Some(a.id()));
        reg.assert_consistent();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_picks_oldest_idle() {
        let (_engine, reg) = registry(2);
        let a = reg.create_instance(Some("A"), &ev("event:/A"), None).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        let b = reg.create_instance(Some("B"), &ev("event:/B"), None).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        reg.touch(&a);
        tokio::time::advance(Duration::from_millis(10)).await;

        reg.create_instance(Some("C"), &ev("event:/C"), None).unwrap();
        assert!(b.is_disposed());
        assert_eq!(reg.names(), vec!["A".to_string(), "C".to_string()]);
        reg.assert_consistent();
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_skips_live_containers() {
        let (engine, reg) = registry(1);
        let a_ev = ev("event:/A");
        engine.add_event(&a_ev, SimEventSpec::looping().with_release(Duration::from_secs(1)));

        let a = reg.create_instance(Some("A"), &a_ev, None).unwrap();
        a.play().unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;

        // Nothing idle besides the new container: stays over cap
        let b = reg.create_instance(Some("B"), &ev("event:/B"), None).unwrap();
        assert!(!a.is_disposed());
        assert!(!b.is_disposed());
        assert_eq!(reg.len(), 2);

        // Stopping (fading out) is still live, idle B goes
        a.stop().unwrap();
        assert_eq!(a.playback_state().unwrap(), PlaybackState::Stopping);
        tokio::time::advance(Duration::from_millis(10)).await;
        let c = reg.create_instance(Some("C"), &ev("event:/C"), None).unwrap();
        assert!(!a.is_disposed());
        assert!(b.is_disposed());
        assert!(!c.is_disposed());
        assert_eq!(reg.names(), vec!["A".to_string(), "C".to_string()]);
        reg.assert_consistent();
    }

    #[tokio::test]
    async fn test_stop_all_only_running() {
        let (engine, reg) = registry(0);
        let a = reg.create_instance(Some("A"), &ev("event:/A"), None).unwrap();
        reg.create_instance(Some("B"), &ev("event:/B"), None).unwrap();
        a.play().unwrap();
        engine.clear_calls();

        assert_eq!(reg.stop_all(), 1);
        assert_eq!(engine.calls().len(), 1);
        assert_eq!(reg.stop_all(), 0);
    }

    #[tokio::test]
    async fn test_set_paused_all_and_clear() {
        let (engine, reg) = registry(0);
        let a = reg.create_instance(Some("A"), &ev("event:/A"), None).unwrap();
        reg.set_paused_all(true);
        assert!(engine.is_paused(a.handle()));

        reg.clear();
        assert!(reg.is_empty());
        assert!(a.is_disposed());
    }
}
