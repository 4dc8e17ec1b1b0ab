//! Playback state and stop modes

use serde::{Deserialize, Serialize};

/// Playback state reported by the engine for one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlaybackState {
    Playing = 0,
    Sustaining = 1,
    /// Terminal state; also the state of a created-but-never-started instance
    #[default]
    Stopped = 2,
    Starting = 3,
    Stopping = 4,
}

impl PlaybackState {
    /// Instance is producing (or about to produce / finishing) sound.
    ///
    /// Live instances are never evicted from the cache.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.is_stopped()
    }

    /// Instance was started and has not been asked to stop yet
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Starting)
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        *self == PlaybackState::Stopped
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "Playing",
            PlaybackState::Sustaining => "Sustaining",
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Starting => "Starting",
            PlaybackState::Stopping => "Stopping",
        }
    }
}

/// How an instance is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Let AHDSR release / authored fade-outs play
    #[default]
    AllowFadeOut,
    /// Cut immediately
    Immediate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_states() {
        assert!(PlaybackState::Playing.is_live());
        assert!(PlaybackState::Starting.is_live());
        assert!(PlaybackState::Stopping.is_live());
        assert!(PlaybackState::Sustaining.is_live());
        assert!(!PlaybackState::Stopped.is_live());
    }

    #[test]
    fn test_running_states() {
        assert!(PlaybackState::Playing.is_running());
        assert!(PlaybackState::Starting.is_running());
        assert!(!PlaybackState::Stopping.is_running());
        assert!(!PlaybackState::Sustaining.is_running());
        assert!(!PlaybackState::Stopped.is_running());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(PlaybackState::default(), PlaybackState::Stopped);
        assert_eq!(StopMode::default(), StopMode::AllowFadeOut);
    }
}
