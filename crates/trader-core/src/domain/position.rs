//! 포지션 참조 타입.
//!
//! 포지션 자체는 외부 호스트가 소유합니다. 리스크 엔진은 상관관계 ID로
//! 포지션을 참조하고, 호스트가 넘겨준 스냅샷만 읽습니다.

use crate::domain::Side;
use crate::types::{Percentage, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 포지션 상관관계 ID.
///
/// 열린 포지션마다 고유하며, 재시도 계보 전체에서 리스크 레코드를 연결하는 키입니다.
pub type PositionId = Uuid;

/// 호스트가 보고한 열린 포지션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 상관관계 ID
    pub id: PositionId,
    /// 거래 ticker
    pub ticker: String,
    /// 포지션 방향 (롱 = Buy, 숏 = Sell)
    pub side: Side,
    /// 보유 수량
    pub quantity: Quantity,
    /// 진입 가격
    pub entry_price: Price,
    /// 포지션 오픈 타임스탬프
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// 새 포지션을 생성합니다.
    pub fn new(
        ticker: impl Into<String>,
        side: Side,
        quantity: Quantity,
        entry_price: Price,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticker: ticker.into(),
            side,
            quantity,
            entry_price,
            opened_at: Utc::now(),
        }
    }

    /// 오픈 시각을 지정합니다 (리플레이용).
    pub fn opened_at(mut self, opened_at: DateTime<Utc>) -> Self {
        self.opened_at = opened_at;
        self
    }

    /// 주어진 가격에서의 미실현 손익 (호가 통화 기준).
    pub fn pnl_at(&self, price: Price) -> Decimal {
        (price - self.entry_price) * self.quantity * self.side.direction()
    }

    /// 주어진 가격에서의 수익률(%) (진입 명목 가치 대비).
    pub fn return_pct_at(&self, price: Price) -> Percentage {
        let notional = self.entry_notional_value();
        if notional.is_zero() {
            return Decimal::ZERO;
        }
        self.pnl_at(price) / notional * Decimal::ONE_HUNDRED
    }

    /// 진입 시점의 명목 가치를 반환합니다.
    pub fn entry_notional_value(&self) -> Decimal {
        self.entry_price * self.quantity
    }
}

/// 여러 포지션의 합산 미실현 손익.
pub fn batch_pnl<'a>(positions: impl IntoIterator<Item = &'a Position>, price: Price) -> Decimal {
    positions.into_iter().map(|p| p.pnl_at(price)).sum()
}
