//! Identifiers
//!
//! - [`EventGuid`]: stable identity of an authored sound event (many
//!   live instances may share one GUID)
//! - [`EventRef`]: GUID plus optional authoring path, the handle callers pass around
//! - [`ContainerId`]: process-unique id of one live container

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT GUID
// ═══════════════════════════════════════════════════════════════════════════════

/// GUID of an authored event (or snapshot, which is an event under the hood)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventGuid(pub Uuid);

impl EventGuid {
    /// Random GUID
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic GUID derived from an event path
    pub fn from_path(path: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, path.as_bytes()))
    }

    /// Parse the hyphenated string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl fmt::Display for EventGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT REFERENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference to an authored event
///
/// Equality and hashing use the GUID only; the path is informational and
/// is used to derive friendly container names.
///
/// In configuration files either field may be omitted, but not both:
/// ```json
/// { "path": "event:/Music/Theme" }
/// { "guid": "6f1c0b6e-...", "path": "event:/SFX/Step" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "EventRefRepr")]
pub struct EventRef {
    pub guid: EventGuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Deserialize)]
struct EventRefRepr {
    #[serde(default)]
    guid: Option<EventGuid>,
    #[serde(default)]
    path: Option<String>,
}

impl TryFrom<EventRefRepr> for EventRef {
    type Error = String;

    fn try_from(repr: EventRefRepr) -> Result<Self, Self::Error> {
        let path = repr.path.filter(|p| !p.trim().is_empty());
        match (repr.guid, path) {
            (Some(guid), path) => Ok(Self { guid, path }),
            (None, Some(path)) => Ok(Self::from_path(path)),
            (None, None) => Err("event reference needs a guid or a path".to_string()),
        }
    }
}

impl EventRef {
    /// Reference by GUID only
    pub fn new(guid: EventGuid) -> Self {
        Self { guid, path: None }
    }

    /// Reference by path; the GUID is derived deterministically from it
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            guid: EventGuid::from_path(&path),
            path: Some(path),
        }
    }

    /// Attach an authoring path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Default container name: last path segment, or the GUID string
    pub fn derive_name(&self) -> String {
        self.path
            .as_deref()
            .and_then(|p| p.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.guid.to_string())
    }
}

impl PartialEq for EventRef {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
    }
}

impl Eq for EventRef {}

impl Hash for EventRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.guid.hash(state);
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => f.write_str(path),
            None => write!(f, "{{{}}}", self.guid),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTAINER ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Global container id counter
static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of one live event container
///
/// Used as the key of the timeline callback table and of tag bindings, so
/// nothing needs to round-trip raw pointers through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

impl ContainerId {
    /// Generate a unique id
    #[inline]
    pub fn generate() -> Self {
        Self(NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derive_name_from_path() {
        let ev = EventRef::from_path("event:/Music/Level1/Theme");
        assert_eq!(ev.derive_name(), "Theme");
    }

    #[test]
    fn test_derive_name_falls_back_to_guid() {
        let guid = EventGuid::from_u128(0x1234);
        let ev = EventRef::new(guid);
        assert_eq!(ev.derive_name(), guid.to_string());

        let trailing = EventRef::new(guid).with_path("event:/Music/");
        assert_eq!(trailing.derive_name(), guid.to_string());
    }

    #[test]
    fn test_path_guid_is_deterministic() {
        let a = EventRef::from_path("event:/SFX/Step");
        let b = EventRef::from_path("event:/SFX/Step");
        let c = EventRef::from_path("event:/SFX/Jump");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_equality_ignores_path() {
        let guid = EventGuid::new_random();
        let a = EventRef::new(guid);
        let b = EventRef::new(guid).with_path("event:/Anything");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_deserialize_path_only() {
        let ev: EventRef = serde_json::from_str(r#"{ "path": "event:/UI/Click" }"#).unwrap();
        assert_eq!(ev, EventRef::from_path("event:/UI/Click"));
        assert_eq!(ev.derive_name(), "Click");
    }

    #[test]
    fn test_deserialize_requires_identity() {
        let result: Result<EventRef, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_container_ids_unique() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
