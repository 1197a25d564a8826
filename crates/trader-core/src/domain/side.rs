//! 포지션 방향.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 포지션 방향 (롱 = Buy, 숏 = Sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수 (롱)
    Buy,
    /// 매도 (숏)
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// 가격 변화의 부호 (롱 = 1, 숏 = -1).
    ///
    /// `(price - entry) * direction()`이 양수면 유리한 방향입니다.
    pub fn direction(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// `candidate`가 `reference`보다 이 방향에서 유리한 가격인지 확인합니다.
    pub fn is_favorable(&self, candidate: Decimal, reference: Decimal) -> bool {
        match self {
            Side::Buy => candidate > reference,
            Side::Sell => candidate < reference,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}
