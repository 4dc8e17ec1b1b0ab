//! Engine result mapping

use std::fmt::Display;

use fmx_core::{FmxError, FmxResult};
use fmx_engine::{EngineError, EngineResult};

/// Attach operation name and bus/event identity to a raw engine result
pub(crate) trait EngineResultExt<T> {
    fn op(self, op: &'static str, target: impl Display) -> FmxResult<T>;
}

impl<T> EngineResultExt<T> for EngineResult<T> {
    fn op(self, op: &'static str, target: impl Display) -> FmxResult<T> {
        self.map_err(|e| match e {
            EngineError::InvalidHandle => FmxError::InvalidHandle(format!("{op} on {target}")),
            EngineError::EventNotFound => FmxError::EventNotFound(target.to_string()),
            EngineError::BusNotFound => FmxError::BusNotFound(target.to_string()),
            EngineError::BankNotFound => FmxError::BankNotFound(target.to_string()),
            other => FmxError::engine(op, target, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping() {
        let r: EngineResult<()> = Err(EngineError::InvalidHandle);
        assert!(r.op("start", "Theme").unwrap_err().is_invalid_handle());

        let r: EngineResult<()> = Err(EngineError::BusNotFound);
        assert!(matches!(r.op("bus", "bus:/X"), Err(FmxError::BusNotFound(p)) if p == "bus:/X"));

        let r: EngineResult<()> = Err(EngineError::Internal("boom".into()));
        assert_eq!(
            r.op("set volume", "bus:/Music").unwrap_err().to_string(),
            "Engine call `set volume` failed for 'bus:/Music': internal engine error: boom"
        );
    }
}
