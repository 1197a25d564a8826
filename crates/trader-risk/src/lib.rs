//! 포지션 리스크 엔진.
//!
//! 이 crate는 열린 포지션마다 언제, 어떻게 청산하거나 키울지를 결정합니다:
//! - 익절/손절 레벨 관리 (자동 또는 수동 등록)
//! - 트레일링 손절 (Classic / StartAfterTake / MoveAfterEachTake)
//! - 손절 시 재진입과 계보 전체 종료
//! - 마틴게일 그리드와 합산 청산
//! - 보유 기간 만료
//!
//! 주문 실행은 [`trader_core::PositionHost`]를 구현한 호스트가 담당합니다.
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_risk::{RiskEngine, RiskEngineConfig, TakesConfig};
//!
//! let config = RiskEngineConfig::with_takes(TakesConfig::fixed(dec!(5), dec!(3)));
//! let mut engine = RiskEngine::new(config, host.clone())?;
//!
//! // 호스트 이벤트 전달
//! engine.on_position_opened(&position);
//!
//! // 가격 관측마다
//! let summary = engine.on_observation(&observation).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expiry;
pub mod grid;
pub mod registry;
pub mod retry;
pub mod trailing;

// 주요 타입 재내보내기
pub use config::{
    ConfigValidationError, EquityDecay, EvaluationCadence, ExhaustedAction, ExpiryConfig,
    GridBias, GridConfig, GridExitAction, GridSides, GridSpacing, RegistrationMode, RetryConfig,
    RiskEngineConfig, TakesConfig, TrailingMode, UntrackedPolicy,
};
pub use engine::{levels_from_pct, RiskEngine, RiskLevels, StepSummary};
pub use error::{RiskError, RiskResult};
pub use evaluator::{evaluate, ExitDecision};
pub use expiry::ExpiryController;
pub use grid::{
    build_levels, GridController, GridDirection, GridEvent, GridExitReason, GridLevel, GridPhase,
    GridState,
};
pub use registry::{RecordLink, RiskRecord, RiskRegistry};
pub use retry::{RetryController, RetryOutcome};
pub use trailing::{TrailingController, TrailingUpdate};
