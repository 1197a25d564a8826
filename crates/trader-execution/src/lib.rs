//! 포지션 실행 호스트.
//!
//! 이 crate는 다음을 제공합니다:
//! - 마지막 관측 가격으로 즉시 체결하는 모의 `PositionHost`
//! - 오픈/축소/종료 이벤트 기록과 실현 손익 집계
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::{PaperHost, PositionEvent};
//!
//! let host = Arc::new(PaperHost::new("BTCUSDT"));
//! host.mark(&observation).await;
//!
//! for event in host.drain_events().await {
//!     match event {
//!         PositionEvent::Opened { position } => engine.on_position_opened(&position),
//!         PositionEvent::Closed { position_id, .. } => engine.on_position_closed(position_id),
//!         PositionEvent::Reduced { .. } => {}
//!     }
//! }
//! ```

pub mod paper_host;

// 주요 타입 재내보내기
pub use paper_host::{ClosedPosition, PaperHost, PositionEvent};
