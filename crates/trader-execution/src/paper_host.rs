//! 모의 체결 포지션 호스트.
//!
//! 제공 기능:
//! - 마지막 관측 가격으로 즉시 체결되는 `PositionHost` 구현
//! - 오픈/축소/종료 이벤트 기록 (엔진 확정 훅으로 전달)
//! - 실현 손익 집계

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use trader_core::{
    HostError, Position, PositionHost, PositionId, Price, PriceObservation, Quantity, Side,
};

/// 포지션 이벤트 타입.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionEvent {
    /// 포지션 오픈
    Opened { position: Position },
    /// 포지션 감소
    Reduced {
        position_id: PositionId,
        quantity: Quantity,
        price: Price,
        realized_pnl: Decimal,
        remaining: Quantity,
        timestamp: DateTime<Utc>,
    },
    /// 포지션 종료
    Closed {
        position_id: PositionId,
        price: Price,
        final_pnl: Decimal,
        timestamp: DateTime<Utc>,
    },
}

impl PositionEvent {
    /// 이벤트에서 포지션 ID를 가져온다.
    pub fn position_id(&self) -> PositionId {
        match self {
            PositionEvent::Opened { position } => position.id,
            PositionEvent::Reduced { position_id, .. } => *position_id,
            PositionEvent::Closed { position_id, .. } => *position_id,
        }
    }
}

/// 종료된 포지션 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: Price,
    pub realized_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PaperState {
    /// 오픈 순서대로의 열린 포지션
    positions: Vec<Position>,
    last_price: Option<Price>,
    last_time: Option<DateTime<Utc>>,
    closed: Vec<ClosedPosition>,
    realized_pnl: Decimal,
    events: Vec<PositionEvent>,
    reject_opens: bool,
}

impl PaperState {
    fn fill_price(&self) -> Result<(Price, DateTime<Utc>), HostError> {
        let price = self
            .last_price
            .ok_or_else(|| HostError::InvalidRequest("no price observed yet".into()))?;
        Ok((price, self.last_time.unwrap_or_else(Utc::now)))
    }

    fn index_of(&self, id: PositionId) -> Result<usize, HostError> {
        self.positions
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| HostError::UnknownPosition(id.to_string()))
    }

    fn trim_history(&mut self, max_history_size: usize) {
        if self.closed.len() > max_history_size {
            let excess = self.closed.len() - max_history_size;
            self.closed.drain(0..excess);
        }
    }
}

/// 단일 ticker 모의 체결 호스트.
///
/// 모든 요청은 마지막으로 `mark_price`된 가격에 즉시 체결됩니다. 체결 결과는
/// 이벤트로 쌓이며, 호출자가 `drain_events`로 꺼내 엔진에 확정을 전달합니다.
#[derive(Debug)]
pub struct PaperHost {
    ticker: String,
    max_history_size: usize,
    state: RwLock<PaperState>,
}

impl PaperHost {
    /// 새 모의 호스트를 생성한다.
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            max_history_size: 10000,
            state: RwLock::new(PaperState::default()),
        }
    }

    /// 커스텀 히스토리 크기로 생성한다.
    pub fn with_history_size(ticker: impl Into<String>, max_history_size: usize) -> Self {
        Self {
            max_history_size,
            ..Self::new(ticker)
        }
    }

    /// 거래 ticker.
    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// 체결 기준 가격을 갱신한다.
    pub async fn mark_price(&self, price: Price, time: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.last_price = Some(price);
        state.last_time = Some(time);
    }

    /// 관측으로 체결 기준 가격을 갱신한다.
    pub async fn mark(&self, observation: &PriceObservation) {
        self.mark_price(observation.price, observation.time).await;
    }

    /// 마지막 체결 기준 가격.
    pub async fn last_price(&self) -> Option<Price> {
        self.state.read().await.last_price
    }

    /// 이후의 오픈 요청을 거부할지 설정한다.
    pub async fn set_reject_opens(&self, reject: bool) {
        self.state.write().await.reject_opens = reject;
    }

    /// 쌓인 이벤트를 꺼낸다.
    pub async fn drain_events(&self) -> Vec<PositionEvent> {
        std::mem::take(&mut self.state.write().await.events)
    }

    /// 종료된 포지션 기록.
    pub async fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.state.read().await.closed.clone()
    }

    /// 누적 실현 손익.
    pub async fn realized_pnl(&self) -> Decimal {
        self.state.read().await.realized_pnl
    }

    /// 마지막 가격 기준 미실현 손익.
    pub async fn unrealized_pnl(&self) -> Decimal {
        let state = self.state.read().await;
        match state.last_price {
            Some(price) => state.positions.iter().map(|p| p.pnl_at(price)).sum(),
            None => Decimal::ZERO,
        }
    }
}

#[async_trait]
impl PositionHost for PaperHost {
    async fn open_position(
        &self,
        ticker: &str,
        side: Side,
        size: Quantity,
    ) -> Result<Option<Position>, HostError> {
        if ticker != self.ticker {
            return Err(HostError::InvalidRequest(format!(
                "unsupported ticker: {ticker}"
            )));
        }
        if size <= Decimal::ZERO {
            return Err(HostError::InvalidRequest(format!(
                "size must be positive: {size}"
            )));
        }

        let mut state = self.state.write().await;
        if state.reject_opens {
            debug!(ticker, side = %side, size = %size, "모의 호스트 오픈 거부");
            return Ok(None);
        }

        let (price, time) = state.fill_price()?;
        let position = Position::new(ticker, side, size, price).opened_at(time);

        state.positions.push(position.clone());
        state.events.push(PositionEvent::Opened {
            position: position.clone(),
        });
        debug!(position_id = %position.id, side = %side, size = %size, price = %price, "모의 포지션 오픈");

        Ok(Some(position))
    }

    async fn close_position(&self, position: &Position) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        let index = state.index_of(position.id)?;
        let (price, time) = state.fill_price()?;

        let closed = state.positions.remove(index);
        let pnl = closed.pnl_at(price);
        state.realized_pnl += pnl;
        state.events.push(PositionEvent::Closed {
            position_id: closed.id,
            price,
            final_pnl: pnl,
            timestamp: time,
        });
        state.closed.push(ClosedPosition {
            position: closed,
            exit_price: price,
            realized_pnl: pnl,
            closed_at: time,
        });
        state.trim_history(self.max_history_size);

        debug!(position_id = %position.id, price = %price, pnl = %pnl, "모의 포지션 종료");
        Ok(())
    }

    async fn reduce_position(
        &self,
        position: &Position,
        fraction: Decimal,
    ) -> Result<(), HostError> {
        if fraction <= Decimal::ZERO || fraction >= Decimal::ONE {
            return Err(HostError::InvalidRequest(format!(
                "fraction must be between 0 and 1: {fraction}"
            )));
        }

        let mut state = self.state.write().await;
        let index = state.index_of(position.id)?;
        let (price, time) = state.fill_price()?;

        let target = &mut state.positions[index];
        let reduced = target.quantity * fraction;
        target.quantity -= reduced;
        let remaining = target.quantity;
        let pnl = (price - target.entry_price) * reduced * target.side.direction();

        state.realized_pnl += pnl;
        state.events.push(PositionEvent::Reduced {
            position_id: position.id,
            quantity: reduced,
            price,
            realized_pnl: pnl,
            remaining,
            timestamp: time,
        });
        Ok(())
    }

    async fn positions(&self) -> Vec<Position> {
        self.state.read().await.positions.clone()
    }
}
