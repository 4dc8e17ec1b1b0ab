//! Parameter Ramp
//!
//! Time-based scalar interpolation used by bus fades, ducking, music
//! crossfades and parameter ramps. A ramp writes the start value at once,
//! then one value per tick, and always finishes on exactly the target.
//! Cancellation is observed at every tick and leaves the last written
//! value in place.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fmx_core::{FadeCurve, FmxResult};
use fmx_engine::AudioEngine;

use crate::container::EventContainer;
use crate::error::EngineResultExt;
use crate::timing::sleep_or_cancel;

/// How a ramp ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampOutcome {
    Completed,
    Cancelled,
}

impl RampOutcome {
    #[inline]
    pub fn is_completed(&self) -> bool {
        *self == RampOutcome::Completed
    }
}

/// Drive `apply` from `from` to `to` over `duration`
///
/// `None` duration writes the target immediately.
pub async fn ramp<F>(
    from: f32,
    to: f32,
    duration: Option<Duration>,
    curve: FadeCurve,
    tick: Duration,
    cancel: &CancellationToken,
    mut apply: F,
) -> RampOutcome
where
    F: FnMut(f32),
{
    if cancel.is_cancelled() {
        return RampOutcome::Cancelled;
    }
    let Some(duration) = duration else {
        apply(to);
        return RampOutcome::Completed;
    };

    let start = Instant::now();
    apply(from);
    loop {
        // Last step is shortened so the ramp lands on its deadline
        let remaining = duration.saturating_sub(start.elapsed());
        if !sleep_or_cancel(tick.min(remaining), cancel).await {
            return RampOutcome::Cancelled;
        }
        let t = start.elapsed().as_secs_f32() / duration.as_secs_f32();
        if t >= 1.0 {
            apply(to);
            return RampOutcome::Completed;
        }
        apply(curve.interpolate(from, to, t));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETER RAMPS
// ═══════════════════════════════════════════════════════════════════════════════

/// Smooth global and per-event parameter changes
#[derive(Clone)]
pub struct ParameterRamp {
    engine: Arc<dyn AudioEngine>,
    global_curve: FadeCurve,
    event_curve: FadeCurve,
    tick: Duration,
}

impl ParameterRamp {
    pub fn new(engine: Arc<dyn AudioEngine>, tick: Duration) -> Self {
        Self {
            engine,
            global_curve: FadeCurve::Linear,
            event_curve: FadeCurve::Linear,
            tick,
        }
    }

    pub fn with_curves(mut self, global: FadeCurve, event: FadeCurve) -> Self {
        self.global_curve = global;
        self.event_curve = event;
        self
    }

    pub fn set_global(&self, name: &str, value: f32) -> FmxResult<()> {
        self.engine
            .set_global_parameter(name, value)
            .op("set global parameter", name)
    }

    pub fn global(&self, name: &str) -> FmxResult<f32> {
        self.engine
            .global_parameter(name)
            .op("get global parameter", name)
    }

    /// Ramp a global parameter from its current value
    pub async fn ramp_global(
        &self,
        name: &str,
        target: f32,
        duration_secs: f32,
        cancel: &CancellationToken,
    ) -> FmxResult<RampOutcome> {
        let duration = fmx_core::positive_duration(duration_secs);
        if duration.is_none() {
            self.set_global(name, target)?;
            return Ok(RampOutcome::Completed);
        }
        let from = self.global(name)?;
        let engine = &self.engine;
        let outcome = ramp(from, target, duration, self.global_curve, self.tick, cancel, |v| {
            if let Err(e) = engine.set_global_parameter(name, v) {
                log::warn!("[Audio] Ramp of global '{}' failed: {}", name, e);
            }
        })
        .await;
        Ok(outcome)
    }

    /// Ramp a parameter of one container from its current value
    pub async fn ramp_event(
        &self,
        container: &EventContainer,
        name: &str,
        target: f32,
        duration_secs: f32,
        cancel: &CancellationToken,
    ) -> FmxResult<RampOutcome> {
        let duration = fmx_core::positive_duration(duration_secs);
        if duration.is_none() {
            container.set_parameter(name, target)?;
            return Ok(RampOutcome::Completed);
        }
        let from = container.parameter(name)?;
        let outcome = ramp(from, target, duration, self.event_curve, self.tick, cancel, |v| {
            if let Err(e) = container.set_parameter(name, v) {
                log::debug!("[Audio] {}", e);
            }
        })
        .await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fmx_core::{EventRef, StopMode};
    use fmx_engine::SimulatedEngine;

    const TICK: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn test_ramp_hits_target_exactly() {
        let token = CancellationToken::new();
        let mut values = Vec::new();
        let start = Instant::now();
        let outcome = ramp(
            1.0,
            0.0,
            Some(Duration::from_millis(100)),
            FadeCurve::Linear,
            TICK,
            &token,
            |v| values.push(v),
        )
        .await;

        assert!(outcome.is_completed());
        assert_eq!(values.first(), Some(&1.0));
        assert_eq!(values.last(), Some(&0.0));
        assert!(values.windows(2).all(|w| w[1] <= w[0]));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(130));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_instant_without_duration() {
        let token = CancellationToken::new();
        let mut values = Vec::new();
        ramp(0.0, 0.7, None, FadeCurve::Linear, TICK, &token, |v| values.push(v)).await;
        assert_eq!(values, vec![0.7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_cancelled_stops_writing() {
        let token = CancellationToken::new();
        let child = token.clone();
        let values = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        let task = tokio::spawn(async move {
            ramp(
                0.0,
                1.0,
                Some(Duration::from_secs(1)),
                FadeCurve::Linear,
                TICK,
                &child,
                |v| sink.lock().push(v),
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(305)).await;
        token.cancel();
        assert_eq!(task.await.unwrap(), RampOutcome::Cancelled);

        let written = values.lock().clone();
        let last = *written.last().unwrap();
        assert!(last > 0.2 && last < 0.4, "last = {last}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameter_ramps() {
        let engine = Arc::new(SimulatedEngine::new());
        let params = ParameterRamp::new(engine.clone(), TICK);
        let token = CancellationToken::new();

        params.set_global("Rain", 0.2).unwrap();
        let outcome = params.ramp_global("Rain", 1.0, 0.5, &token).await.unwrap();
        assert!(outcome.is_completed());
        assert_relative_eq!(params.global("Rain").unwrap(), 1.0);

        params.ramp_global("Rain", 0.0, 0.0, &token).await.unwrap();
        assert_eq!(params.global("Rain").unwrap(), 0.0);

        let c = EventContainer::create(
            engine.clone(),
            "Wind",
            EventRef::from_path("event:/Amb/Wind"),
            StopMode::AllowFadeOut,
        )
        .unwrap();
        params.ramp_event(&c, "Gust", 0.8, 0.2, &token).await.unwrap();
        assert_relative_eq!(c.parameter("Gust").unwrap(), 0.8);
    }
}
