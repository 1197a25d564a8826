//! 리스크 엔진 에러 타입.

use thiserror::Error;
use trader_core::{HostError, PositionId};

use crate::config::ConfigValidationError;

/// 리스크 엔진 에러.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Invalid risk configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Untracked position: {0}")]
    UntrackedPosition(PositionId),

    #[error("Invalid levels for position {id}: {reason}")]
    InvalidLevels { id: PositionId, reason: String },

    #[error("Take/stop management is not configured")]
    TakesNotConfigured,

    #[error("Position host error: {0}")]
    Host(#[from] HostError),
}

/// 리스크 엔진 작업을 위한 Result 타입.
pub type RiskResult<T> = Result<T, RiskError>;
