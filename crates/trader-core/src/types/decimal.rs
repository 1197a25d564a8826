//! 정밀한 금융 계산을 위한 Decimal 유틸리티.
//!
//! 가격, 수량, 퍼센트는 모두 `rust_decimal::Decimal`로 표현합니다.

use rust_decimal::Decimal;

/// 금융 정밀도를 위한 가격 타입.
pub type Price = Decimal;

/// 포지션 크기를 위한 타입.
pub type Quantity = Decimal;

/// 퍼센트 타입 (5 = 5%).
pub type Percentage = Decimal;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// 퍼센트만큼 조정된 값을 반환합니다.
    ///
    /// `apply_pct(100, 5) = 105`, `apply_pct(100, -3) = 97`
    fn apply_pct(&self, pct: Percentage) -> Decimal;

    /// `self`가 `base`의 몇 퍼센트인지 반환합니다. `base`가 0이면 0.
    fn pct_of(&self, base: Decimal) -> Percentage;

    /// 퍼센트 문자열로 변환합니다 (예: "5.25%").
    fn to_percentage_string(&self) -> String;

    /// 지정된 소수점 자릿수로 반올림합니다.
    fn round_dp_half_up(&self, dp: u32) -> Decimal;
}

impl DecimalExt for Decimal {
    fn apply_pct(&self, pct: Percentage) -> Decimal {
        *self + *self * pct / HUNDRED
    }

    fn pct_of(&self, base: Decimal) -> Percentage {
        if base.is_zero() {
            return Decimal::ZERO;
        }
        *self / base * HUNDRED
    }

    fn to_percentage_string(&self) -> String {
        format!("{:.2}%", self)
    }

    fn round_dp_half_up(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
    }
}
