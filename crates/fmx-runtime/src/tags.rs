//! Tag Index
//!
//! Group tags (case-insensitive) over live containers. Templates map an
//! event to tags; every container of that event is bound to those tags
//! when it starts and unbound when it stops or is disposed.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use fmx_core::{ContainerId, EventGuid, StopMode};

use crate::container::EventContainer;

#[derive(Default)]
struct TagState {
    templates: HashMap<EventGuid, BTreeSet<String>>,
    active_by_tag: HashMap<String, HashMap<ContainerId, Arc<EventContainer>>>,
    tags_by_container: HashMap<ContainerId, HashSet<String>>,
}

#[derive(Default)]
pub struct TagIndex {
    state: Mutex<TagState>,
}

fn normalize(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_lowercase())
    }
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Templates ─────────────────────────────────────────────────────────

    /// Tag every future instance of `event`; `false` for a blank tag
    pub fn register_template(&self, event: EventGuid, tag: &str) -> bool {
        let Some(tag) = normalize(tag) else {
            log::warn!("[Tags] Ignoring blank tag for {}", event);
            return false;
        };
        self.state
            .lock()
            .templates
            .entry(event)
            .or_default()
            .insert(tag);
        true
    }

    /// Containers already bound keep the tag until they stop
    pub fn unregister_template(&self, event: EventGuid, tag: &str) -> bool {
        let Some(tag) = normalize(tag) else {
            return false;
        };
        let mut state = self.state.lock();
        let Some(tags) = state.templates.get_mut(&event) else {
            return false;
        };
        let removed = tags.remove(&tag);
        if tags.is_empty() {
            state.templates.remove(&event);
        }
        removed
    }

    pub fn template_tags(&self, event: EventGuid) -> Vec<String> {
        self.state
            .lock()
            .templates
            .get(&event)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ─── Binding ───────────────────────────────────────────────────────────

    /// Bind a just-started container to its event's template tags
    pub fn bind_active(&self, container: &Arc<EventContainer>) {
        let mut state = self.state.lock();
        let Some(tags) = state.templates.get(&container.event().guid).cloned() else {
            return;
        };
        let id = container.id();
        for tag in tags {
            state
                .active_by_tag
                .entry(tag.clone())
                .or_default()
                .insert(id, Arc::clone(container));
            state.tags_by_container.entry(id).or_default().insert(tag);
        }
    }

    /// Remove a container from every tag it is bound to
    pub fn unbind_active(&self, container: &EventContainer) {
        let id = container.id();
        let mut state = self.state.lock();
        let Some(tags) = state.tags_by_container.remove(&id) else {
            return;
        };
        for tag in tags {
            if let Some(set) = state.active_by_tag.get_mut(&tag) {
                set.remove(&id);
                if set.is_empty() {
                    state.active_by_tag.remove(&tag);
                }
            }
        }
    }

    // ─── Queries / group ops ───────────────────────────────────────────────

    /// Snapshot of containers bound to a tag
    pub fn active(&self, tag: &str) -> Vec<Arc<EventContainer>> {
        let Some(tag) = normalize(tag) else {
            return Vec::new();
        };
        self.state
            .lock()
            .active_by_tag
            .get(&tag)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Tags a container is currently bound to (sorted)
    pub fn tags_of(&self, container: &EventContainer) -> Vec<String> {
        let mut tags: Vec<String> = self
            .state
            .lock()
            .tags_by_container
            .get(&container.id())
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        tags.sort();
        tags
    }

    pub fn is_bound(&self, container: &EventContainer) -> bool {
        self.state.lock().tags_by_container.contains_key(&container.id())
    }

    /// Stop every running container bound to `tag`; returns how many were stopped
    ///
    /// Works on a snapshot, so bindings may change while stopping. Stopped
    /// containers are unbound right away; ones already stopped are only
    /// unbound.
    pub fn stop_by_tag(&self, tag: &str, mode: StopMode) -> usize {
        let targets = self.active(tag);
        let mut stopped = 0;
        for c in &targets {
            if !c.state_or_stopped().is_running() {
                self.unbind_active(c);
                continue;
            }
            match c.stop_with(mode) {
                Ok(()) => {
                    self.unbind_active(c);
                    stopped += 1;
                }
                Err(e) => log::warn!("[Tags] {}", e),
            }
        }
        log::debug!("[Tags] Stopped {} container(s) tagged '{}'", stopped, tag);
        stopped
    }

    /// Drop all bindings (templates survive)
    pub fn clear_active(&self) {
        let mut state = self.state.lock();
        state.active_by_tag.clear();
        state.tags_by_container.clear();
    }

    /// Every tag-set entry has a matching reverse entry
    #[cfg(test)]
    pub(crate) fn assert_paired(&self) {
        let state = self.state.lock();
        for (tag, set) in &state.active_by_tag {
            assert!(!set.is_empty());
            for id in set.keys() {
                assert!(state.tags_by_container[id].contains(tag));
            }
        }
        for (id, tags) in &state.tags_by_container {
            for tag in tags {
                assert!(state.active_by_tag[tag].contains_key(id));
            }
        }
    }
}
