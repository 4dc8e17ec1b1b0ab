//! fmx-core: Shared types for the FMX audio runtime
//!
//! Vocabulary used by both the engine driver contract (`fmx-engine`) and the
//! orchestration layer (`fmx-runtime`): event references, container ids,
//! playback state, stop modes, fade curves and the common error type.

mod curve;
mod error;
mod ids;
mod playback;
mod time;

pub use curve::*;
pub use error::*;
pub use ids::*;
pub use playback::*;
pub use time::*;

/// Master bus path
pub const MASTER_BUS_PATH: &str = "bus:/";
