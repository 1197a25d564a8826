//! 그리드 컨트롤러.
//!
//! 첫 포지션의 진입가를 앵커로 위/아래 레벨 사다리를 만들고, 가격이 다음 레벨을
//! 돌파할 때마다 마틴게일 배수로 커지는 포지션을 추가합니다. 그리드 포지션들은
//! 개별 익절/손절 대신 기준 금액 대비 합산 손익률로 함께 청산됩니다.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trader_core::{
    batch_pnl, DecimalExt, Position, PositionHost, PositionId, Price, Quantity, Side,
};

use crate::config::{GridBias, GridConfig, GridExitAction, GridSides, GridSpacing};
use crate::error::RiskResult;

/// 그리드 레벨.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    pub price: Price,
    pub activated: bool,
}

/// 앵커 기준 레벨 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridDirection {
    /// 앵커 위 (오름차순)
    Up,
    /// 앵커 아래 (내림차순)
    Down,
}

impl GridDirection {
    /// 이 방향 레벨을 돌파했을 때 진입할 포지션 방향.
    pub fn entry_side(&self, bias: GridBias) -> Side {
        let breached = match self {
            GridDirection::Up => Side::Buy,
            GridDirection::Down => Side::Sell,
        };
        match bias {
            GridBias::TrendFollowing => breached,
            GridBias::CounterTrend => breached.opposite(),
        }
    }

    fn enabled_by(&self, sides: GridSides) -> bool {
        matches!(
            (sides, self),
            (GridSides::Both, _)
                | (GridSides::UpOnly, GridDirection::Up)
                | (GridSides::DownOnly, GridDirection::Down)
        )
    }
}

/// 그리드 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridPhase {
    /// 레벨 감시 중
    Active,
    /// 합산 청산 요청됨, 남은 포지션 종료 확인 대기
    Closing,
}

/// 합산 청산 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridExitReason {
    TakeProfit,
    StopLoss,
}

/// 그리드 컨트롤러가 관측 하나에서 수행한 동작.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridEvent {
    /// 레벨 돌파로 포지션 오픈 요청
    LevelOpened {
        direction: GridDirection,
        level: Price,
        position_id: PositionId,
        size: Quantity,
    },
    /// 레벨 돌파했으나 호스트가 오픈 거부
    LevelRejected {
        direction: GridDirection,
        level: Price,
    },
    /// 합산 청산 요청
    Exited {
        reason: GridExitReason,
        profit_pct: Decimal,
        closed: Vec<PositionId>,
    },
    /// 하나만 남기고 트레일링 손절로 전환
    Collapsed {
        survivor: PositionId,
        stop_price: Price,
    },
    /// 자본 수준이 하한 아래로 내려가 컨트롤러 폐기
    Disposed { equity_level: Decimal },
}

/// 살아 있는 그리드 하나의 상태.
#[derive(Debug, Clone)]
pub struct GridState {
    anchor_price: Price,
    ticker: String,
    up_levels: Vec<GridLevel>,
    down_levels: Vec<GridLevel>,
    up_cursor: usize,
    down_cursor: usize,
    baseline_amount: Decimal,
    base_size: Quantity,
    members: HashSet<PositionId>,
    phase: GridPhase,
    locked_to: Option<GridDirection>,
}

impl GridState {
    fn new(anchor: &Position, config: &GridConfig) -> Self {
        let (up_levels, down_levels) = build_levels(
            anchor.entry_price,
            config.step_pct,
            config.levels_count,
            config.spacing,
        );

        Self {
            anchor_price: anchor.entry_price,
            ticker: anchor.ticker.clone(),
            up_levels,
            down_levels,
            up_cursor: 0,
            down_cursor: 0,
            baseline_amount: config.base_amount,
            base_size: anchor.quantity,
            members: HashSet::from([anchor.id]),
            phase: GridPhase::Active,
            locked_to: None,
        }
    }

    pub fn anchor_price(&self) -> Price {
        self.anchor_price
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn up_levels(&self) -> &[GridLevel] {
        &self.up_levels
    }

    pub fn down_levels(&self) -> &[GridLevel] {
        &self.down_levels
    }

    /// 방향별 다음 미사용 레벨 인덱스.
    pub fn cursor(&self, direction: GridDirection) -> usize {
        match direction {
            GridDirection::Up => self.up_cursor,
            GridDirection::Down => self.down_cursor,
        }
    }

    pub fn phase(&self) -> GridPhase {
        self.phase
    }

    pub fn locked_to(&self) -> Option<GridDirection> {
        self.locked_to
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, id: PositionId) -> bool {
        self.members.contains(&id)
    }

    /// 다음 레벨을 돌파했으면 활성화하고 커서를 전진시킨 뒤 (레벨 가격, 깊이)를 반환.
    fn advance(&mut self, direction: GridDirection, price: Price) -> Option<(Price, u32)> {
        let (levels, cursor) = match direction {
            GridDirection::Up => (&mut self.up_levels, &mut self.up_cursor),
            GridDirection::Down => (&mut self.down_levels, &mut self.down_cursor),
        };

        let level = levels.get_mut(*cursor)?;
        let crossed = match direction {
            GridDirection::Up => price >= level.price,
            GridDirection::Down => price <= level.price,
        };
        if !crossed {
            return None;
        }

        level.activated = true;
        *cursor += 1;
        Some((level.price, *cursor as u32))
    }
}

/// 앵커 기준 레벨 사다리를 만듭니다. (위 오름차순, 아래 내림차순)
pub fn build_levels(
    anchor: Price,
    step_pct: Decimal,
    count: usize,
    spacing: GridSpacing,
) -> (Vec<GridLevel>, Vec<GridLevel>) {
    let step = anchor * step_pct / Decimal::ONE_HUNDRED;
    let offsets = level_offsets(step, count, spacing);

    let level = |price| GridLevel {
        price,
        activated: false,
    };
    let up = offsets.iter().map(|offset| level(anchor + offset)).collect();
    let down = offsets.iter().map(|offset| level(anchor - offset)).collect();
    (up, down)
}

/// 앵커로부터의 누적 거리.
///
/// - Fixed: step, 2·step, 3·step ...
/// - Fibonacci: step, 2·step, 3·step, 5·step, 8·step ...
/// - Geometric: 간격이 factor배씩 커지며 누적
fn level_offsets(step: Decimal, count: usize, spacing: GridSpacing) -> Vec<Decimal> {
    match spacing {
        GridSpacing::Fixed => (1..=count).map(|i| step * Decimal::from(i)).collect(),
        GridSpacing::Fibonacci => {
            let mut offsets = Vec::with_capacity(count);
            let (mut prev, mut current) = (Decimal::ZERO, step);
            for _ in 0..count {
                let next = prev + current;
                offsets.push(next);
                prev = current;
                current = next;
            }
            offsets
        }
        GridSpacing::Geometric { factor } => {
            let mut offsets = Vec::with_capacity(count);
            let (mut gap, mut total) = (step, Decimal::ZERO);
            for _ in 0..count {
                total += gap;
                offsets.push(total);
                gap *= factor;
            }
            offsets
        }
    }
}

/// 그리드 컨트롤러.
pub struct GridController {
    config: GridConfig,
    host: Arc<dyn PositionHost>,
    state: Option<GridState>,
    equity_level: Decimal,
    disposed: bool,
}

impl GridController {
    /// 새 그리드 컨트롤러 생성
    pub fn new(config: GridConfig, host: Arc<dyn PositionHost>) -> Self {
        Self {
            config,
            host,
            state: None,
            equity_level: Decimal::ONE,
            disposed: false,
        }
    }

    /// 현재 그리드 상태
    pub fn state(&self) -> Option<&GridState> {
        self.state.as_ref()
    }

    /// 현재 자본 수준 (1에서 시작)
    pub fn equity_level(&self) -> Decimal {
        self.equity_level
    }

    /// 폐기 여부
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// 그리드 구성원인지 확인합니다.
    pub fn is_member(&self, id: PositionId) -> bool {
        self.state.as_ref().is_some_and(|s| s.contains(id))
    }

    /// 포지션 오픈 확정.
    ///
    /// 그리드가 없으면 이 포지션을 앵커로 새 그리드를 만듭니다. 포지션이 그리드
    /// 구성원이 되면 `true`를 반환합니다.
    pub fn on_position_opened(&mut self, position: &Position) -> bool {
        if self.disposed {
            return false;
        }

        match &mut self.state {
            None => {
                let state = GridState::new(position, &self.config);
                info!(
                    position_id = %position.id,
                    ticker = %position.ticker,
                    anchor = %state.anchor_price,
                    levels = self.config.levels_count,
                    "그리드 생성"
                );
                self.state = Some(state);
                true
            }
            Some(state) if state.phase == GridPhase::Active && state.ticker == position.ticker => {
                state.members.insert(position.id);
                true
            }
            Some(state) => state.members.contains(&position.id),
        }
    }

    /// 포지션 종료 확정. 구성원이 모두 닫히면 그리드를 해체합니다.
    pub fn on_position_closed(&mut self, id: PositionId) {
        let Some(state) = &mut self.state else {
            return;
        };
        if !state.members.remove(&id) {
            return;
        }

        if state.members.is_empty() {
            debug!(anchor = %state.anchor_price, phase = ?state.phase, "그리드 해체");
            self.state = None;
        }
    }

    /// 관측 하나를 처리합니다.
    ///
    /// 합산 청산 조건을 먼저 보고, 청산하지 않았으면 방향별로 최대 한 레벨씩
    /// 돌파를 확인합니다.
    pub async fn on_observation(
        &mut self,
        price: Price,
        snapshot: &[Position],
    ) -> RiskResult<Vec<GridEvent>> {
        let mut events = Vec::new();
        if self.disposed {
            return Ok(events);
        }
        let Some(state) = &self.state else {
            return Ok(events);
        };
        if state.phase != GridPhase::Active {
            return Ok(events);
        }

        // 스냅샷에 살아있는 멤버가 없으면 레벨도 열지 않음
        let members: Vec<&Position> = snapshot.iter().filter(|p| state.contains(p.id)).collect();
        if members.is_empty() {
            return Ok(events);
        }

        let profit = batch_pnl(members.iter().copied(), price);
        let profit_pct = profit.pct_of(state.baseline_amount);

        let reason = if profit_pct >= self.config.take_profit_pct {
            Some(GridExitReason::TakeProfit)
        } else if profit_pct <= -self.config.stop_loss_pct {
            Some(GridExitReason::StopLoss)
        } else {
            None
        };

        if let Some(reason) = reason {
            let members: Vec<Position> = members.into_iter().cloned().collect();
            self.exit(reason, profit_pct, price, members, &mut events)
                .await?;
            return Ok(events);
        }

        for direction in [GridDirection::Down, GridDirection::Up] {
            self.try_level(direction, price, &mut events).await?;
        }

        Ok(events)
    }

    async fn try_level(
        &mut self,
        direction: GridDirection,
        price: Price,
        events: &mut Vec<GridEvent>,
    ) -> RiskResult<()> {
        if !direction.enabled_by(self.config.sides) {
            return Ok(());
        }
        let allow_both = self.config.allow_both_legs;
        let Some(state) = &mut self.state else {
            return Ok(());
        };
        if !allow_both && state.locked_to.is_some_and(|locked| locked != direction) {
            return Ok(());
        }

        let Some((level, depth)) = state.advance(direction, price) else {
            return Ok(());
        };
        if !allow_both {
            state.locked_to = Some(direction);
        }

        let multiplier = (0..depth).fold(Decimal::ONE, |acc, _| acc * self.config.martingale);
        let size = state.base_size * multiplier * self.equity_level;
        let side = direction.entry_side(self.config.bias);
        let ticker = state.ticker.clone();

        match self.host.open_position(&ticker, side, size).await? {
            Some(position) => {
                if let Some(state) = &mut self.state {
                    state.members.insert(position.id);
                }
                info!(
                    position_id = %position.id,
                    direction = ?direction,
                    level = %level,
                    depth,
                    side = %side,
                    size = %size,
                    "그리드 레벨 진입"
                );
                events.push(GridEvent::LevelOpened {
                    direction,
                    level,
                    position_id: position.id,
                    size,
                });
            }
            None => {
                warn!(direction = ?direction, level = %level, "그리드 레벨 오픈 거부됨");
                events.push(GridEvent::LevelRejected { direction, level });
            }
        }

        Ok(())
    }

    async fn exit(
        &mut self,
        reason: GridExitReason,
        profit_pct: Decimal,
        price: Price,
        members: Vec<Position>,
        events: &mut Vec<GridEvent>,
    ) -> RiskResult<()> {
        let collapse = match (self.config.exit, reason) {
            (
                GridExitAction::CollapseToTrailing {
                    trail_pct,
                    reduce_fraction,
                },
                GridExitReason::TakeProfit,
            ) if members.len() > 1 => Some((trail_pct, reduce_fraction)),
            _ => None,
        };

        let survivor = collapse.and_then(|_| {
            members
                .iter()
                .max_by_key(|p| p.pnl_at(price))
                .cloned()
        });

        let to_close: Vec<Position> = members
            .into_iter()
            .filter(|p| survivor.as_ref().map_or(true, |s| s.id != p.id))
            .collect();
        let closed: Vec<PositionId> = to_close.iter().map(|p| p.id).collect();

        if let Some(state) = &mut self.state {
            state.phase = GridPhase::Closing;
            if let Some(survivor) = &survivor {
                state.members.remove(&survivor.id);
            }
        }

        info!(
            reason = ?reason,
            profit_pct = %profit_pct.round_dp_half_up(4),
            closing = closed.len(),
            "그리드 합산 청산"
        );
        events.push(GridEvent::Exited {
            reason,
            profit_pct,
            closed,
        });

        self.host.close_all(&to_close).await?;

        if let (Some(survivor), Some((trail_pct, reduce_fraction))) = (survivor, collapse) {
            if let Some(fraction) = reduce_fraction {
                self.host.reduce_position(&survivor, fraction).await?;
            }
            let stop_price = price.apply_pct(-trail_pct * survivor.side.direction());
            info!(
                position_id = %survivor.id,
                stop_price = %stop_price,
                "그리드를 트레일링 포지션으로 전환"
            );
            events.push(GridEvent::Collapsed {
                survivor: survivor.id,
                stop_price,
            });
        }

        if self.state.as_ref().is_some_and(|s| s.members.is_empty()) {
            self.state = None;
        }

        self.decay_equity(events);
        Ok(())
    }

    fn decay_equity(&mut self, events: &mut Vec<GridEvent>) {
        let Some(decay) = self.config.equity_decay else {
            return;
        };

        self.equity_level *= decay.factor;
        if self.equity_level < decay.floor {
            self.disposed = true;
            warn!(equity_level = %self.equity_level, "자본 수준이 하한 아래로 내려가 그리드 폐기");
            events.push(GridEvent::Disposed {
                equity_level: self.equity_level,
            });
        }
    }
}
