//! Audio Settings
//!
//! Plain configuration loaded once at startup:
//! - Lifecycle (scene-change policy)
//! - Music defaults and shuffle weight table
//! - Bus initialization list and volume persistence
//! - Event preload list and cache cap
//! - Parameter ramp curves, snapshot fade, bank boot list
//! - Tag templates
//! - Runtime tick and safety timeouts

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use fmx_core::{EventRef, FadeCurve, FmxError, FmxResult, non_negative_secs, unit_volume};

/// Default key prefix for persisted bus volumes
pub const DEFAULT_VOLUME_KEY_PREFIX: &str = "FMODBusVolume::";

/// Root settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub lifecycle: LifecycleSettings,
    pub music: MusicSettings,
    pub buses: BusSettings,
    pub events: EventSettings,
    pub parameters: ParameterSettings,
    pub snapshots: SnapshotSettings,
    pub banks: BankSettings,
    /// Tag templates applied to every future instance of an event
    pub tags: Vec<TagTemplate>,
    pub runtime: RuntimeSettings,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleSettings::default(),
            music: MusicSettings::default(),
            buses: BusSettings::default(),
            events: EventSettings::default(),
            parameters: ParameterSettings::default(),
            snapshots: SnapshotSettings::default(),
            banks: BankSettings::default(),
            tags: Vec::new(),
            runtime: RuntimeSettings::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SECTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Facade outlives scene transitions
    pub persist_across_scenes: bool,
    /// Stop every cached event when the active scene changes
    pub stop_all_on_scene_change: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            persist_across_scenes: true,
            stop_all_on_scene_change: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicSettings {
    pub default_fade_secs: f32,
    pub default_pre_delay_secs: f32,
    pub default_post_delay_secs: f32,
    pub default_shuffle: bool,
    pub default_no_repeat_window: usize,
    /// Weight table for shuffled playlists; missing events weigh 0
    pub shuffle_weights: Vec<EventWeight>,
}

impl Default for MusicSettings {
    fn default() -> Self {
        Self {
            default_fade_secs: 0.5,
            default_pre_delay_secs: 0.0,
            default_post_delay_secs: 0.0,
            default_shuffle: false,
            default_no_repeat_window: 0,
            shuffle_weights: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventWeight {
    pub event: EventRef,
    pub weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Write explicit volume changes to the key-value store
    pub persist_volumes: bool,
    pub volume_key_prefix: String,
    pub buses: Vec<BusInit>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            persist_volumes: true,
            volume_key_prefix: DEFAULT_VOLUME_KEY_PREFIX.to_string(),
            buses: Vec::new(),
        }
    }
}

impl BusSettings {
    /// Case-insensitive lookup of a bus init entry
    pub fn find_init(&self, path: &str) -> Option<&BusInit> {
        self.buses.iter().find(|b| b.path.eq_ignore_ascii_case(path))
    }

    /// Store key for a bus: explicit override, else prefix + path
    pub fn prefs_key(&self, init: &BusInit) -> String {
        match init.prefs_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key.to_string(),
            _ => format!("{}{}", self.volume_key_prefix, init.path),
        }
    }
}

/// One bus to resolve at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusInit {
    pub path: String,
    #[serde(default = "default_bus_volume")]
    pub default_volume: f32,
    #[serde(default)]
    pub prefs_key: Option<String>,
}

impl BusInit {
    pub fn new(path: impl Into<String>, default_volume: f32) -> Self {
        Self {
            path: path.into(),
            default_volume,
            prefs_key: None,
        }
    }

    pub fn with_prefs_key(mut self, key: impl Into<String>) -> Self {
        self.prefs_key = Some(key.into());
        self
    }
}

fn default_bus_volume() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub preload: Vec<PreloadEvent>,
    /// Cache cap; 0 = unbounded
    pub max_cached_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadEvent {
    /// Container name; derived from the event when absent
    #[serde(default)]
    pub name: Option<String>,
    pub event: EventRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSettings {
    pub global_curve: FadeCurve,
    pub event_curve: FadeCurve,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub default_fade_secs: f32,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            default_fade_secs: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankSettings {
    pub load_sample_data: bool,
    /// Banks loaded during `initialize`
    pub load_on_boot: Vec<String>,
}

impl Default for BankSettings {
    fn default() -> Self {
        Self {
            load_sample_data: true,
            load_on_boot: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagTemplate {
    pub event: EventRef,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Ramp and poll granularity
    pub tick_ms: u64,
    /// Upper bound on watching a tracked instance; `None` waits forever
    pub instance_watch_timeout_secs: Option<f32>,
    /// Fixed seed for playlist selection
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_ms: 16,
            instance_watch_timeout_secs: Some(600.0),
            rng_seed: None,
        }
    }
}

impl RuntimeSettings {
    #[inline]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn watch_timeout(&self) -> Option<Duration> {
        self.instance_watch_timeout_secs
            .and_then(fmx_core::positive_duration)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOAD / SAVE
// ═══════════════════════════════════════════════════════════════════════════════

impl AudioSettings {
    /// Parse and validate settings from JSON text
    pub fn from_json_str(json: &str) -> FmxResult<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| FmxError::Serialization(e.to_string()))?;
        Ok(settings.validated())
    }

    /// Load and validate settings from a JSON file
    pub fn load_from<P: AsRef<Path>>(path: P) -> FmxResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Load settings, falling back to defaults on a missing or malformed file
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load_from(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("[Audio] Using default settings, {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> FmxResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FmxError::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Clamp out-of-range values and drop unusable entries
    pub fn validated(mut self) -> Self {
        let music = &mut self.music;
        music.default_fade_secs = non_negative_secs(music.default_fade_secs);
        music.default_pre_delay_secs = non_negative_secs(music.default_pre_delay_secs);
        music.default_post_delay_secs = non_negative_secs(music.default_post_delay_secs);
        for entry in &mut music.shuffle_weights {
            entry.weight = non_negative_secs(entry.weight);
        }

        self.snapshots.default_fade_secs = non_negative_secs(self.snapshots.default_fade_secs);

        self.buses.buses.retain(|b| {
            let keep = !b.path.trim().is_empty();
            if !keep {
                log::warn!("[Bus] Skipping bus entry with empty path");
            }
            keep
        });
        for bus in &mut self.buses.buses {
            bus.default_volume = unit_volume(bus.default_volume);
        }

        for template in &mut self.tags {
            template.tags.retain(|t| {
                let keep = !t.trim().is_empty();
                if !keep {
                    log::warn!("[Tags] Skipping blank tag for {}", template.event);
                }
                keep
            });
        }
        self.tags.retain(|t| !t.tags.is_empty());

        if let Some(secs) = self.runtime.instance_watch_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                self.runtime.instance_watch_timeout_secs = None;
            }
        }
        self
    }
}
