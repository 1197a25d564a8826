//! 가격 관측 이벤트.

use crate::types::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 관측 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// 기간 내 체결 틱
    Tick,
    /// 기간 종료 (캔들 마감)
    Candle,
}

/// 가격 피드가 전달하는 단일 관측.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// 관측 종류
    pub kind: ObservationKind,
    /// 현재 가격 (캔들이면 종가)
    pub price: Price,
    /// 관측 시각
    pub time: DateTime<Utc>,
}

impl PriceObservation {
    /// 틱 관측을 생성합니다.
    pub fn tick(price: Price, time: DateTime<Utc>) -> Self {
        Self {
            kind: ObservationKind::Tick,
            price,
            time,
        }
    }

    /// 캔들 마감 관측을 생성합니다.
    pub fn candle(price: Price, time: DateTime<Utc>) -> Self {
        Self {
            kind: ObservationKind::Candle,
            price,
            time,
        }
    }

    /// 캔들 마감인지 확인합니다.
    pub fn is_candle(&self) -> bool {
        self.kind == ObservationKind::Candle
    }
}
