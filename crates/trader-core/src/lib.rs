//! # Trader Core
//!
//! 리스크 엔진과 그 협력자들이 공유하는 핵심 도메인 타입을 제공합니다:
//! - 포지션 방향 및 포지션 스냅샷
//! - 가격 관측 (틱 / 캔들 마감)
//! - 포지션 호스트 능력 인터페이스
//! - 로깅 인프라

pub mod domain;
pub mod logging;
pub mod types;

pub use domain::*;
pub use logging::*;
pub use types::*;
