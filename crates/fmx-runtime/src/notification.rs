//! Runtime notifications

use tokio::sync::broadcast;

use fmx_core::EventRef;

/// Capacity of the notification channel; slow receivers see `Lagged`
pub const NOTIFICATION_CAPACITY: usize = 256;

/// Something observable happened in the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum AudioNotification {
    /// A cached or one-shot event started playing
    EventStarted { event: EventRef, name: String },
    /// A playlist track is about to play
    TrackStarted { event: EventRef, index: usize },
    /// A playlist track was observed stopped
    TrackEnded { event: EventRef, index: usize },
}

pub fn channel() -> broadcast::Sender<AudioNotification> {
    broadcast::channel(NOTIFICATION_CAPACITY).0
}

/// Send without caring whether anyone listens
#[inline]
pub(crate) fn emit(tx: &broadcast::Sender<AudioNotification>, note: AudioNotification) {
    let _ = tx.send(note);
}
