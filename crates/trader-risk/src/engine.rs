//! 리스크 엔진.
//!
//! 레지스트리, 그리드 상태, 만료 카운터를 단독으로 소유하고 관측마다
//! 컨트롤러들을 구동합니다. 관측 하나를 처리하는 동안의 순서:
//!
//! 1. 호스트에서 열린 포지션 스냅샷
//! 2. 캔들 마감이면 만료 처리
//! 3. 평가 주기가 맞으면 손익분기 대기 계보 확인
//! 4. 포지션별: 트레일링 갱신 → 청산 평가 → 익절/손절/재진입
//! 5. 그리드 컨트롤러

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn, Instrument};
use trader_core::{
    batch_pnl, position_span, DecimalExt, Position, PositionHost, PositionId, Price,
    PriceObservation, Side,
};

use crate::config::{
    EvaluationCadence, ExhaustedAction, RegistrationMode, RiskEngineConfig, UntrackedPolicy,
};
use crate::error::{RiskError, RiskResult};
use crate::evaluator::{evaluate, ExitDecision};
use crate::expiry::ExpiryController;
use crate::grid::{GridController, GridEvent};
use crate::registry::{RiskRecord, RiskRegistry};
use crate::retry::{RetryController, RetryOutcome};
use crate::trailing::{TrailingController, TrailingUpdate};

/// 포지션 하나의 현재 리스크 레벨 (조회용).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLevels {
    /// 익절 가격 (`None`이면 비활성)
    pub take_price: Option<Price>,
    /// 손절 가격
    pub stop_price: Price,
    /// 트레일링 활성화 여부
    pub trailing_armed: bool,
    /// 계보에 남은 재진입 횟수
    pub retries_left: u32,
    /// 재진입 포지션이면 계보 루트 ID
    pub linked_to: Option<PositionId>,
}

/// 관측 하나를 처리한 결과 요약.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    /// 익절 도달로 종료 요청한 포지션 수
    pub take_hits: usize,
    /// 손절 도달 수 (재진입 포함)
    pub stop_hits: usize,
    /// 재진입 수
    pub escalations: usize,
    /// 계보 전체 종료 요청 수
    pub lineage_closes: usize,
    /// 그리드 레벨 진입 수
    pub grid_opens: usize,
    /// 그리드 합산 청산 수
    pub grid_exits: usize,
    /// 보유 기간 만료로 종료 요청한 포지션 수
    pub expired: usize,
    /// 리스크 레코드가 없어 건너뛴 포지션 수
    pub untracked: usize,
}

impl StepSummary {
    /// 호스트에 요청을 보낸 동작이 있었는지 확인합니다.
    pub fn has_activity(&self) -> bool {
        self.take_hits
            + self.stop_hits
            + self.grid_opens
            + self.grid_exits
            + self.expired
            > 0
    }

    /// 다른 요약을 누적합니다.
    pub fn merge(&mut self, other: &StepSummary) {
        self.take_hits += other.take_hits;
        self.stop_hits += other.stop_hits;
        self.escalations += other.escalations;
        self.lineage_closes += other.lineage_closes;
        self.grid_opens += other.grid_opens;
        self.grid_exits += other.grid_exits;
        self.expired += other.expired;
        self.untracked += other.untracked;
    }
}

/// 포지션 리스크 엔진.
///
/// 모든 상태 변경은 `&mut self`를 통해서만 일어나며, 관측은 한 번에 하나씩
/// 처리됩니다. 레코드는 종료 요청이 아니라 호스트의 종료 확정 시 제거됩니다.
pub struct RiskEngine {
    config: RiskEngineConfig,
    host: Arc<dyn PositionHost>,
    registry: RiskRegistry,
    trailing: Option<TrailingController>,
    /// 그리드에서 전환된 포지션용 (익절 고정 Classic)
    collapse_trailing: TrailingController,
    retry: Option<RetryController>,
    grid: Option<GridController>,
    expiry: Option<ExpiryController>,
    /// 종료 요청을 보냈고 확정을 기다리는 포지션
    closing: HashSet<PositionId>,
    /// 그리드에서 트레일링 포지션으로 전환된 포지션
    collapsed: HashSet<PositionId>,
    /// 재진입 예산 소진 후 손익분기를 기다리는 계보 구성원
    awaiting_break_even: HashSet<PositionId>,
}

impl RiskEngine {
    /// 설정을 검증하고 엔진을 생성합니다.
    pub fn new(config: RiskEngineConfig, host: Arc<dyn PositionHost>) -> RiskResult<Self> {
        config.validate()?;

        let trailing = config.takes.as_ref().map(TrailingController::from_config);
        let retry = config
            .takes
            .as_ref()
            .and_then(|takes| takes.retry.clone())
            .map(|retry| RetryController::new(retry, host.clone()));
        let separate_stops = retry
            .as_ref()
            .is_some_and(|retry| retry.config().separate_stops);
        let grid = config
            .grid
            .clone()
            .map(|grid| GridController::new(grid, host.clone()));
        let expiry = config.expiry.clone().map(ExpiryController::new);

        info!(
            cadence = ?config.cadence,
            takes = config.takes.is_some(),
            trailing = ?trailing.as_ref().map(|t| t.mode()),
            retry = retry.is_some(),
            grid = grid.is_some(),
            expiry = expiry.is_some(),
            "리스크 엔진 생성"
        );

        Ok(Self {
            config,
            host,
            registry: RiskRegistry::new(separate_stops),
            trailing,
            collapse_trailing: TrailingController::pinned_classic(),
            retry,
            grid,
            expiry,
            closing: HashSet::new(),
            collapsed: HashSet::new(),
            awaiting_break_even: HashSet::new(),
        })
    }

    /// 엔진 설정
    pub fn config(&self) -> &RiskEngineConfig {
        &self.config
    }

    /// 리스크 레지스트리
    pub fn registry(&self) -> &RiskRegistry {
        &self.registry
    }

    /// 그리드 컨트롤러
    pub fn grid(&self) -> Option<&GridController> {
        self.grid.as_ref()
    }

    /// 만료 컨트롤러
    pub fn expiry(&self) -> Option<&ExpiryController> {
        self.expiry.as_ref()
    }

    /// 종료 확정을 기다리는 중인지 확인합니다.
    pub fn is_closing(&self, id: PositionId) -> bool {
        self.closing.contains(&id)
    }

    /// 포지션의 현재 리스크 레벨을 조회합니다.
    pub fn levels(&self, id: PositionId) -> Option<RiskLevels> {
        let record = self.registry.get(id)?;
        let own = self.registry.own(id)?;
        let retries_left = self
            .registry
            .root_of(id)
            .and_then(|root| self.registry.own(root))
            .map(|root| root.retries_left)
            .unwrap_or(0);

        Some(RiskLevels {
            take_price: record.take_price,
            stop_price: record.stop_price,
            trailing_armed: record.trailing_armed,
            retries_left,
            linked_to: own.parent(),
        })
    }

    /// 외부에서 계산한 레벨로 포지션을 등록합니다.
    ///
    /// 익절은 진입가보다 수익 방향으로, 손절은 손실 방향으로 엄격히 떨어져
    /// 있어야 합니다. `take`가 `None`이면 손절(과 트레일링)만으로 종료됩니다.
    pub fn register(
        &mut self,
        position: &Position,
        take: Option<Price>,
        stop: Price,
    ) -> RiskResult<()> {
        if self.config.takes.is_none() {
            return Err(RiskError::TakesNotConfigured);
        }

        let side = position.side;
        let entry = position.entry_price;
        if let Some(take) = take {
            if !side.is_favorable(take, entry) {
                return Err(RiskError::InvalidLevels {
                    id: position.id,
                    reason: format!("take {take} is not beyond entry {entry} for {side}"),
                });
            }
        }
        if !side.is_favorable(entry, stop) {
            return Err(RiskError::InvalidLevels {
                id: position.id,
                reason: format!("stop {stop} is not beyond entry {entry} for {side}"),
            });
        }

        self.insert_record(position, take, stop);
        Ok(())
    }

    /// 호스트의 포지션 오픈 확정.
    pub fn on_position_opened(&mut self, position: &Position) {
        if let Some(expiry) = &mut self.expiry {
            expiry.on_position_opened(position.id);
        }

        // 그리드 합산 청산과 개별 익절/손절은 같은 포지션에 함께 적용
        if let Some(grid) = &mut self.grid {
            if grid.on_position_opened(position) {
                debug!(position_id = %position.id, "그리드 구성원 포지션");
            }
        }

        // 재진입 포지션이나 수동 등록된 포지션은 이미 레코드가 있음
        if self.registry.contains(position.id) {
            return;
        }

        let Some(takes) = &self.config.takes else {
            return;
        };
        if takes.registration != RegistrationMode::Auto {
            return;
        }
        let (Some(tp), Some(sl)) = (takes.take_profit_pct, takes.stop_loss_pct) else {
            return;
        };

        let (take, stop) = levels_from_pct(position.side, position.entry_price, tp, sl);
        self.insert_record(position, Some(take), stop);
    }

    /// 호스트의 포지션 종료 확정.
    pub fn on_position_closed(&mut self, id: PositionId) {
        self.closing.remove(&id);
        self.collapsed.remove(&id);
        self.awaiting_break_even.remove(&id);

        if let Some(expiry) = &mut self.expiry {
            expiry.on_position_closed(id);
        }
        if let Some(grid) = &mut self.grid {
            grid.on_position_closed(id);
        }
        if self.registry.delete(id).is_some() {
            debug!(position_id = %id, "리스크 레코드 제거");
        }
    }

    /// 가격 관측 하나를 처리합니다.
    #[instrument(skip(self, observation), fields(kind = ?observation.kind, price = %observation.price))]
    pub async fn on_observation(
        &mut self,
        observation: &PriceObservation,
    ) -> RiskResult<StepSummary> {
        let price = observation.price;
        let snapshot = self.host.positions().await;
        let mut summary = StepSummary::default();

        if observation.is_candle() {
            self.process_expiry(&snapshot, price, &mut summary).await?;
        }

        let due = match self.config.cadence {
            EvaluationCadence::Tick => true,
            EvaluationCadence::Candle => observation.is_candle(),
        };
        if !due {
            return Ok(summary);
        }

        self.process_break_even(&snapshot, price, &mut summary)
            .await?;

        // takes 설정이 없으면 그리드에서 전환된 포지션만 평가
        let manages_takes = self.config.takes.is_some();
        for position in &snapshot {
            if self.closing.contains(&position.id)
                || self.awaiting_break_even.contains(&position.id)
                || (!manages_takes && !self.collapsed.contains(&position.id))
            {
                continue;
            }

            self.evaluate_position(position, price, &mut summary)
                .instrument(position_span!("evaluate_position", position, price))
                .await?;
        }

        self.process_grid(&snapshot, price, &mut summary).await?;

        if summary.has_activity() {
            debug!(?summary, "관측 처리 완료");
        }
        Ok(summary)
    }

    fn insert_record(&mut self, position: &Position, take: Option<Price>, stop: Price) {
        let take = match &self.trailing {
            Some(trailing) => trailing.initial_take(take),
            None => take,
        };
        let retries = self.retry.as_ref().map_or(0, |r| r.initial_budget());

        self.registry.set(
            position.id,
            RiskRecord::new(take, stop, position.entry_price).with_retries(retries),
        );
        debug!(
            position_id = %position.id,
            side = %position.side,
            entry = %position.entry_price,
            take = ?take,
            stop = %stop,
            retries,
            "리스크 레코드 생성"
        );
    }

    async fn evaluate_position(
        &mut self,
        position: &Position,
        price: Price,
        summary: &mut StepSummary,
    ) -> RiskResult<()> {
        let collapsed = self.collapsed.contains(&position.id);
        let trailing = if collapsed {
            Some(&self.collapse_trailing)
        } else {
            self.trailing.as_ref()
        };

        let Some(record) = self.registry.get_mut(position.id) else {
            return match self.config.untracked {
                UntrackedPolicy::Skip => {
                    summary.untracked += 1;
                    Ok(())
                }
                UntrackedPolicy::Error => Err(RiskError::UntrackedPosition(position.id)),
            };
        };

        if let Some(trailing) = trailing {
            match trailing.update(record, position.side, position.entry_price, price) {
                TrailingUpdate::Unchanged => {}
                update => debug!(
                    update = ?update,
                    take = ?record.take_price,
                    stop = %record.stop_price,
                    "트레일링 갱신"
                ),
            }
        }

        let (take, stop) = (record.take_price, record.stop_price);
        match evaluate(position.side, price, take, stop) {
            ExitDecision::None => Ok(()),
            ExitDecision::Take => {
                summary.take_hits += 1;
                info!(take = ?take, "익절 도달");
                self.request_close(position).await
            }
            ExitDecision::Stop => {
                summary.stop_hits += 1;
                info!(stop = %stop, "손절 도달");
                if collapsed {
                    return self.request_close(position).await;
                }
                self.handle_stop(position, price, summary).await
            }
        }
    }

    async fn handle_stop(
        &mut self,
        position: &Position,
        price: Price,
        summary: &mut StepSummary,
    ) -> RiskResult<()> {
        let Some(retry) = &self.retry else {
            return self.request_close(position).await;
        };

        let on_exhausted = retry.config().on_exhausted;
        let outcome = retry.escalate(&mut self.registry, position, price).await;

        match outcome {
            Ok(RetryOutcome::Escalated { .. }) => {
                summary.escalations += 1;
                Ok(())
            }
            Ok(RetryOutcome::Exhausted) => match on_exhausted {
                ExhaustedAction::CloseAll => self.close_lineage(position.id, summary).await,
                ExhaustedAction::AwaitBreakEven => {
                    let lineage = self.registry.lineage(position.id);
                    info!(members = lineage.len(), "재진입 소진, 손익분기 대기");
                    self.awaiting_break_even.extend(lineage);
                    Ok(())
                }
            },
            Ok(RetryOutcome::Rejected) => self.close_lineage(position.id, summary).await,
            Err(RiskError::Host(err)) => {
                warn!(error = %err, "재진입 실패, 계보 전체 종료");
                self.close_lineage(position.id, summary).await?;
                Err(RiskError::Host(err))
            }
            Err(err) => Err(err),
        }
    }

    async fn request_close(&mut self, position: &Position) -> RiskResult<()> {
        if self.closing.contains(&position.id) {
            return Ok(());
        }
        self.host.close_position(position).await?;
        self.closing.insert(position.id);
        Ok(())
    }

    /// 계보 구성원 중 아직 종료 요청하지 않은 열린 포지션을 모두 닫습니다.
    ///
    /// 이번 관측에서 열린 재진입 포지션도 포함하도록 호스트에서 새로 조회합니다.
    async fn close_lineage(&mut self, id: PositionId, summary: &mut StepSummary) -> RiskResult<()> {
        let lineage: HashSet<PositionId> = self.registry.lineage(id).into_iter().collect();
        let targets: Vec<Position> = self
            .host
            .positions()
            .await
            .into_iter()
            .filter(|p| lineage.contains(&p.id) && !self.closing.contains(&p.id))
            .collect();

        info!(members = targets.len(), "계보 전체 종료");
        self.host.close_all(&targets).await?;
        self.closing.extend(targets.iter().map(|p| p.id));
        summary.lineage_closes += 1;
        Ok(())
    }

    async fn process_break_even(
        &mut self,
        snapshot: &[Position],
        price: Price,
        summary: &mut StepSummary,
    ) -> RiskResult<()> {
        if self.awaiting_break_even.is_empty() {
            return Ok(());
        }

        // 스냅샷 순서대로 루트별 그룹
        let mut lineages: Vec<(PositionId, Vec<Position>)> = Vec::new();
        for position in snapshot {
            if !self.awaiting_break_even.contains(&position.id)
                || self.closing.contains(&position.id)
            {
                continue;
            }
            let root = self.registry.root_of(position.id).unwrap_or(position.id);
            match lineages.iter_mut().find(|(r, _)| *r == root) {
                Some((_, members)) => members.push(position.clone()),
                None => lineages.push((root, vec![position.clone()])),
            }
        }

        for (root, members) in lineages {
            let profit = batch_pnl(&members, price);
            if profit < Decimal::ZERO {
                continue;
            }

            info!(root = %root, profit = %profit, members = members.len(), "손익분기 도달, 계보 종료");
            self.host.close_all(&members).await?;
            for member in &members {
                self.awaiting_break_even.remove(&member.id);
                self.closing.insert(member.id);
            }
            summary.lineage_closes += 1;
        }

        Ok(())
    }

    async fn process_expiry(
        &mut self,
        snapshot: &[Position],
        price: Price,
        summary: &mut StepSummary,
    ) -> RiskResult<()> {
        let Some(expiry) = &mut self.expiry else {
            return Ok(());
        };

        let closing = &self.closing;
        let expired = expiry.on_candle(snapshot, price, |id| closing.contains(&id));
        for position in expired {
            info!(position_id = %position.id, "보유 기간 만료로 종료");
            self.request_close(&position).await?;
            summary.expired += 1;
        }
        Ok(())
    }

    async fn process_grid(
        &mut self,
        snapshot: &[Position],
        price: Price,
        summary: &mut StepSummary,
    ) -> RiskResult<()> {
        let Some(grid) = &mut self.grid else {
            return Ok(());
        };

        // 이번 관측에서 이미 청산 중인 포지션은 그리드 합산에서 제외
        let live: Vec<Position> = snapshot
            .iter()
            .filter(|p| !self.closing.contains(&p.id))
            .cloned()
            .collect();
        let events = grid.on_observation(price, &live).await?;
        for event in events {
            match event {
                GridEvent::LevelOpened { .. } => summary.grid_opens += 1,
                GridEvent::LevelRejected { .. } => {}
                GridEvent::Exited { closed, .. } => {
                    summary.grid_exits += 1;
                    self.closing.extend(closed);
                }
                GridEvent::Collapsed {
                    survivor,
                    stop_price,
                } => {
                    self.registry
                        .set(survivor, RiskRecord::new(None, stop_price, price).armed());
                    self.collapsed.insert(survivor);
                }
                GridEvent::Disposed { equity_level } => {
                    info!(equity_level = %equity_level, "그리드 컨트롤러 폐기됨");
                }
            }
        }
        Ok(())
    }
}

/// 진입가와 비율로 레벨 쌍을 계산합니다. (익절, 손절)
pub fn levels_from_pct(
    side: Side,
    entry: Price,
    take_pct: Decimal,
    stop_pct: Decimal,
) -> (Price, Price) {
    let direction = side.direction();
    (
        entry.apply_pct(take_pct * direction),
        entry.apply_pct(-stop_pct * direction),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TakesConfig;
    use rust_decimal_macros::dec;
    use trader_execution::PaperHost;

    async fn engine(config: RiskEngineConfig) -> (Arc<PaperHost>, RiskEngine) {
        let host = Arc::new(PaperHost::new("BTCUSDT"));
        host.mark_price(dec!(100), chrono::Utc::now()).await;
        let engine = RiskEngine::new(config, host.clone()).unwrap();
        (host, engine)
    }

    #[test]
    fn test_levels_from_pct() {
        assert_eq!(
            levels_from_pct(Side::Buy, dec!(100), dec!(5), dec!(3)),
            (dec!(105), dec!(97))
        );
        assert_eq!(
            levels_from_pct(Side::Sell, dec!(100), dec!(5), dec!(3)),
            (dec!(95), dec!(103))
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let host = Arc::new(PaperHost::new("BTCUSDT"));
        let result = RiskEngine::new(RiskEngineConfig::default(), host);
        assert!(matches!(result, Err(RiskError::Config(_))));
    }

    #[tokio::test]
    async fn test_auto_registration() {
        let config = RiskEngineConfig::with_takes(TakesConfig::fixed(dec!(5), dec!(3)));
        let (host, mut engine) = engine(config).await;

        let position = host.open_position("BTCUSDT", Side::Sell, dec!(1)).await.unwrap().unwrap();
        engine.on_position_opened(&position);

        let levels = engine.levels(position.id).unwrap();
        assert_eq!(levels.take_price, Some(dec!(95)));
        assert_eq!(levels.stop_price, dec!(103));
        assert_eq!(levels.retries_left, 0);
        assert_eq!(levels.linked_to, None);
    }

    #[tokio::test]
    async fn test_register_validates_levels() {
        let config = RiskEngineConfig::with_takes(TakesConfig::fixed(dec!(5), dec!(3)).manual());
        let (_host, mut engine) = engine(config).await;
        let position = Position::new("BTCUSDT", Side::Buy, dec!(1), dec!(100));

        let err = engine.register(&position, Some(dec!(99)), dec!(97)).unwrap_err();
        assert!(matches!(err, RiskError::InvalidLevels { .. }));
        let err = engine.register(&position, Some(dec!(105)), dec!(100)).unwrap_err();
        assert!(matches!(err, RiskError::InvalidLevels { .. }));

        engine.register(&position, None, dec!(97)).unwrap();
        assert_eq!(engine.levels(position.id).unwrap().take_price, None);

        // 수동 모드에서는 오픈 확정이 레코드를 덮어쓰지 않음
        engine.on_position_opened(&position);
        assert_eq!(engine.levels(position.id).unwrap().stop_price, dec!(97));
    }

    #[tokio::test]
    async fn test_register_without_takes() {
        let config = RiskEngineConfig {
            expiry: Some(crate::config::ExpiryConfig {
                candles_limit: 3,
                close_at_zero: false,
                fee_pct: Decimal::ZERO,
            }),
            ..Default::default()
        };
        let (_host, mut engine) = engine(config).await;
        let position = Position::new("BTCUSDT", Side::Buy, dec!(1), dec!(100));

        assert!(matches!(
            engine.register(&position, Some(dec!(105)), dec!(97)),
            Err(RiskError::TakesNotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_close_is_not_requested_twice() {
        let config = RiskEngineConfig::with_takes(TakesConfig::fixed(dec!(5), dec!(3)));
        let (host, mut engine) = engine(config).await;

        let position = host.open_position("BTCUSDT", Side::Buy, dec!(1)).await.unwrap().unwrap();
        engine.on_position_opened(&position);

        host.mark_price(dec!(106), chrono::Utc::now()).await;
        let observation = PriceObservation::tick(dec!(106), chrono::Utc::now());
        let summary = engine.on_observation(&observation).await.unwrap();
        assert_eq!(summary.take_hits, 1);
        assert!(engine.is_closing(position.id));

        // 종료 확정 전 두 번째 관측은 다시 요청하지 않음
        let summary = engine.on_observation(&observation).await.unwrap();
        assert_eq!(summary, StepSummary::default());

        engine.on_position_closed(position.id);
        assert!(!engine.is_closing(position.id));
        assert!(engine.levels(position.id).is_none());
    }
}
