//! Engine handles and timeline notifications

use std::fmt;
use std::sync::Arc;

/// Handle of a live event instance inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(pub u64);

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst:{}", self.0)
    }
}

/// Handle of a mixer bus inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusHandle(pub u64);

impl fmt::Display for BusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus:{}", self.0)
    }
}

/// Timeline notification emitted by a playing instance
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    /// Beat reached
    Beat {
        bar: i32,
        beat: i32,
        tempo: f32,
        position_ms: i32,
    },
    /// Named marker reached
    Marker { name: String, position_ms: i32 },
}

/// Callback registered for one instance's timeline
///
/// May be invoked from the engine's own thread.
pub type TimelineCallback = Arc<dyn Fn(&TimelineEvent) + Send + Sync>;
