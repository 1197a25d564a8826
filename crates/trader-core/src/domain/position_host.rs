//! 포지션 호스트 추상화.
//!
//! 리스크 엔진이 포지션을 열고, 닫고, 줄이기 위해 사용하는 능력 인터페이스입니다.
//! 주문 라우팅과 체결은 호스트 쪽 책임이며, 엔진은 이 trait만 봅니다.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::{Position, Side};
use crate::types::Quantity;

// =============================================================================
// 에러 타입
// =============================================================================

/// PositionHost 에러.
#[derive(Debug, Error)]
pub enum HostError {
    /// 호스트가 요청을 거부함
    #[error("요청 거부: {0}")]
    Rejected(String),

    /// 알 수 없는 포지션
    #[error("알 수 없는 포지션: {0}")]
    UnknownPosition(String),

    /// 잘못된 요청 파라미터
    #[error("잘못된 요청: {0}")]
    InvalidRequest(String),

    /// 네트워크/연결 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 기타 에러
    #[error("기타 에러: {0}")]
    Other(String),
}

// =============================================================================
// PositionHost Trait
// =============================================================================

/// 포지션 호스트 trait.
///
/// 모든 호출은 비동기이며 엔진은 이를 순차적으로 await 합니다.
/// 포지션의 생성/종료 확정은 호스트가 별도로 엔진에 통지합니다
/// (`on_position_opened` / `on_position_closed`); 요청 성공이 곧 확정은 아닙니다.
///
/// # 구현 예시
///
/// ```ignore
/// pub struct ExchangeHost {
///     client: Arc<ExchangeClient>,
/// }
///
/// #[async_trait]
/// impl PositionHost for ExchangeHost {
///     async fn open_position(&self, ticker: &str, side: Side, size: Quantity)
///         -> Result<Option<Position>, HostError> {
///         // 시장가 주문 제출 후 체결 결과를 Position으로 변환
///     }
///
///     // ... 나머지 메서드 구현
/// }
/// ```
#[async_trait]
pub trait PositionHost: Send + Sync {
    /// 새 포지션을 엽니다.
    ///
    /// # Returns
    ///
    /// 호스트가 주문을 거부하면 `Ok(None)`. 호출자는 이를 실패로 취급해야 합니다.
    async fn open_position(
        &self,
        ticker: &str,
        side: Side,
        size: Quantity,
    ) -> Result<Option<Position>, HostError>;

    /// 포지션 하나를 닫습니다.
    async fn close_position(&self, position: &Position) -> Result<(), HostError>;

    /// 주어진 포지션들을 모두 닫습니다.
    async fn close_all(&self, positions: &[Position]) -> Result<(), HostError> {
        for position in positions {
            self.close_position(position).await?;
        }
        Ok(())
    }

    /// 포지션을 `fraction` (0 < fraction < 1) 비율만큼 줄입니다.
    async fn reduce_position(&self, position: &Position, fraction: Decimal)
        -> Result<(), HostError>;

    /// 현재 열린 포지션 목록.
    async fn positions(&self) -> Vec<Position>;

    /// 열린 포지션 수.
    async fn position_count(&self) -> usize {
        self.positions().await.len()
    }

    /// 조건을 만족하는 열린 포지션을 모두 닫습니다.
    async fn close_where(
        &self,
        predicate: &(dyn for<'p> Fn(&'p Position) -> bool + Send + Sync),
    ) -> Result<(), HostError> {
        let targets: Vec<Position> = self
            .positions()
            .await
            .into_iter()
            .filter(|p| predicate(p))
            .collect();
        self.close_all(&targets).await
    }
}

// =============================================================================
// 테스트
// =============================================================================
