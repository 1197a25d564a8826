//! 손절 재진입(에스컬레이션) 컨트롤러.
//!
//! 손절에 도달했을 때 예산이 남아 있으면 청산하는 대신 같은 방향, 같은 크기의
//! 포지션을 하나 더 열고 레벨을 현재가 쪽으로 이동합니다. 예산은 계보 루트가
//! 소유하며 에스컬레이션마다 정확히 1 감소합니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trader_core::{Position, PositionHost, PositionId, Price};

use crate::config::RetryConfig;
use crate::error::{RiskError, RiskResult};
use crate::registry::{RecordLink, RiskRegistry};

/// 에스컬레이션 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryOutcome {
    /// 대체 포지션 요청 성공
    Escalated {
        replacement: PositionId,
        retries_left: u32,
    },
    /// 예산 소진 (종료 동작 필요)
    Exhausted,
    /// 호스트가 오픈을 거부
    Rejected,
}

/// 재진입 컨트롤러.
pub struct RetryController {
    config: RetryConfig,
    host: Arc<dyn PositionHost>,
}

impl RetryController {
    /// 새 재진입 컨트롤러 생성
    pub fn new(config: RetryConfig, host: Arc<dyn PositionHost>) -> Self {
        Self { config, host }
    }

    /// 설정 조회
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 새 계보 루트에 부여할 예산.
    pub fn initial_budget(&self) -> u32 {
        self.config.max_retries
    }

    /// 손절에 도달한 포지션을 에스컬레이션합니다.
    ///
    /// 호스트 오픈이 성공한 뒤에만 레지스트리를 수정하므로, `Rejected`나
    /// 에러가 반환되면 레코드와 예산은 그대로입니다.
    pub async fn escalate(
        &self,
        registry: &mut RiskRegistry,
        position: &Position,
        price: Price,
    ) -> RiskResult<RetryOutcome> {
        let root = registry
            .root_of(position.id)
            .ok_or(RiskError::UntrackedPosition(position.id))?;

        let retries_left = registry.own(root).map(|r| r.retries_left).unwrap_or(0);
        if retries_left == 0 {
            debug!(position_id = %position.id, root = %root, "재진입 예산 소진");
            return Ok(RetryOutcome::Exhausted);
        }

        let level_id = registry
            .resolved_id(position.id)
            .ok_or(RiskError::UntrackedPosition(position.id))?;
        let Some(retry_anchor) = registry.own(level_id).map(|r| r.retry_anchor_price) else {
            return Err(RiskError::UntrackedPosition(position.id));
        };
        let delta = price - retry_anchor;

        let replacement = self
            .host
            .open_position(&position.ticker, position.side, position.quantity)
            .await?;
        let Some(replacement) = replacement else {
            warn!(
                position_id = %position.id,
                ticker = %position.ticker,
                "재진입 포지션 오픈 거부됨"
            );
            return Ok(RetryOutcome::Rejected);
        };

        // 연결 모드에서는 루트 레코드 하나가 계보 전체의 레벨
        let Some(record) = registry.own_mut(level_id) else {
            return Err(RiskError::UntrackedPosition(position.id));
        };
        record.shift(delta);
        record.retry_anchor_price = price;

        let mut child = record.clone();
        child.link = RecordLink::LinkedTo(root);
        child.retries_left = 0;
        registry.set(replacement.id, child);

        let retries_left = match registry.own_mut(root) {
            Some(root_record) => {
                root_record.retries_left -= 1;
                root_record.retries_left
            }
            None => 0,
        };

        info!(
            position_id = %position.id,
            replacement_id = %replacement.id,
            side = %position.side,
            price = %price,
            delta = %delta,
            retries_left,
            "손절 재진입"
        );

        Ok(RetryOutcome::Escalated {
            replacement: replacement.id,
            retries_left,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RiskRecord;
    use rust_decimal_macros::dec;
    use trader_core::Side;
    use trader_execution::PaperHost;

    async fn setup(
        retries: u32,
        separate: bool,
    ) -> (Arc<PaperHost>, RetryController, RiskRegistry, Position) {
        let host = Arc::new(PaperHost::new("BTCUSDT"));
        host.mark_price(dec!(100), chrono::Utc::now()).await;
        let position = host.open_position("BTCUSDT", Side::Buy, dec!(1)).await.unwrap().unwrap();

        let mut registry = RiskRegistry::new(separate);
        registry.set(
            position.id,
            RiskRecord::new(Some(dec!(105)), dec!(97), dec!(100)).with_retries(retries),
        );

        let mut config = RetryConfig::new(retries.max(1));
        config.separate_stops = separate;
        let controller = RetryController::new(config, host.clone());

        (host, controller, registry, position)
    }

    #[tokio::test]
    async fn test_escalation_shifts_levels_and_links() {
        let (host, controller, mut registry, position) = setup(2, false).await;
        host.mark_price(dec!(97), chrono::Utc::now()).await;

        let outcome = controller.escalate(&mut registry, &position, dec!(97)).await.unwrap();
        let RetryOutcome::Escalated {
            replacement,
            retries_left,
        } = outcome
        else {
            panic!("expected escalation, got {outcome:?}");
        };

        assert_eq!(retries_left, 1);
        assert_eq!(host.position_count().await, 2);

        // 원 포지션과 대체 포지션 모두 이동된 루트 레벨을 읽음
        let root = registry.get(position.id).unwrap();
        assert_eq!(root.take_price, Some(dec!(102)));
        assert_eq!(root.stop_price, dec!(94));
        assert_eq!(root.retry_anchor_price, dec!(97));
        assert_eq!(registry.get(replacement).unwrap().stop_price, dec!(94));
        assert_eq!(registry.root_of(replacement), Some(position.id));
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let (host, controller, mut registry, position) = setup(1, false).await;
        host.mark_price(dec!(97), chrono::Utc::now()).await;

        let first = controller.escalate(&mut registry, &position, dec!(97)).await.unwrap();
        assert!(matches!(first, RetryOutcome::Escalated { retries_left: 0, .. }));

        let second = controller.escalate(&mut registry, &position, dec!(94)).await.unwrap();
        assert_eq!(second, RetryOutcome::Exhausted);
        assert_eq!(host.position_count().await, 2);
    }

    #[tokio::test]
    async fn test_rejected_open_leaves_registry_untouched() {
        let (host, controller, mut registry, position) = setup(2, false).await;
        host.set_reject_opens(true).await;

        let outcome = controller.escalate(&mut registry, &position, dec!(97)).await.unwrap();
        assert_eq!(outcome, RetryOutcome::Rejected);

        let record = registry.get(position.id).unwrap();
        assert_eq!(record.stop_price, dec!(97));
        assert_eq!(record.retries_left, 2);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_separate_stops_copy_levels() {
        let (host, controller, mut registry, position) = setup(2, true).await;
        host.mark_price(dec!(97), chrono::Utc::now()).await;

        let outcome = controller.escalate(&mut registry, &position, dec!(97)).await.unwrap();
        let RetryOutcome::Escalated { replacement, .. } = outcome else {
            panic!("expected escalation");
        };

        // 독립 사본: 자식 레벨을 바꿔도 루트는 그대로
        registry.get_mut(replacement).unwrap().stop_price = dec!(90);
        assert_eq!(registry.get(position.id).unwrap().stop_price, dec!(94));
        assert_eq!(registry.get(replacement).unwrap().stop_price, dec!(90));
        assert_eq!(registry.own(position.id).unwrap().retries_left, 1);
    }

    #[tokio::test]
    async fn test_untracked_position() {
        let (_host, controller, mut registry, _) = setup(1, false).await;
        let stranger = Position::new("BTCUSDT", Side::Buy, dec!(1), dec!(100));

        let result = controller.escalate(&mut registry, &stranger, dec!(97)).await;
        assert!(matches!(result, Err(RiskError::UntrackedPosition(_))));
    }
}
