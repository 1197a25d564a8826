//! 청산 판정.
//!
//! 트레일링과 재진입 컨트롤러가 공유하는 단일 판정 함수입니다. 부작용이 없습니다.

use serde::{Deserialize, Serialize};
use trader_core::{Price, Side};

/// 청산 판정 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitDecision {
    /// 유지
    None,
    /// 익절 도달
    Take,
    /// 손절 도달
    Stop,
}

/// 현재가에서 포지션의 청산 여부를 판정합니다.
///
/// 롱은 `price >= take`면 익절, `price <= stop`이면 손절이며 숏은 비교가 반대입니다.
/// 두 조건이 동시에 성립하면 익절이 우선합니다. `take`가 `None`이면 익절은 발생하지 않습니다.
pub fn evaluate(side: Side, price: Price, take: Option<Price>, stop: Price) -> ExitDecision {
    if take_reached(side, price, take) {
        return ExitDecision::Take;
    }

    let stop_hit = match side {
        Side::Buy => price <= stop,
        Side::Sell => price >= stop,
    };
    if stop_hit {
        return ExitDecision::Stop;
    }

    ExitDecision::None
}

/// 익절 레벨에 도달했는지 확인합니다.
pub(crate) fn take_reached(side: Side, price: Price, take: Option<Price>) -> bool {
    take.is_some_and(|take| match side {
        Side::Buy => price >= take,
        Side::Sell => price <= take,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_levels() {
        let take = Some(dec!(105));
        let stop = dec!(97);

        assert_eq!(evaluate(Side::Buy, dec!(101), take, stop), ExitDecision::None);
        assert_eq!(evaluate(Side::Buy, dec!(105), take, stop), ExitDecision::Take);
        assert_eq!(evaluate(Side::Buy, dec!(106), take, stop), ExitDecision::Take);
        assert_eq!(evaluate(Side::Buy, dec!(97), take, stop), ExitDecision::Stop);
        assert_eq!(evaluate(Side::Buy, dec!(90), take, stop), ExitDecision::Stop);
    }

    #[test]
    fn test_short_levels() {
        let take = Some(dec!(95));
        let stop = dec!(103);

        assert_eq!(evaluate(Side::Sell, dec!(99), take, stop), ExitDecision::None);
        assert_eq!(evaluate(Side::Sell, dec!(95), take, stop), ExitDecision::Take);
        assert_eq!(evaluate(Side::Sell, dec!(103), take, stop), ExitDecision::Stop);
        assert_eq!(evaluate(Side::Sell, dec!(110), take, stop), ExitDecision::Stop);
    }

    #[test]
    fn test_take_checked_before_stop() {
        // 트레일링으로 두 레벨이 겹친 경우
        assert_eq!(
            evaluate(Side::Buy, dec!(100), Some(dec!(100)), dec!(100)),
            ExitDecision::Take
        );
        assert_eq!(
            evaluate(Side::Sell, dec!(100), Some(dec!(101)), dec!(99)),
            ExitDecision::Take
        );
    }

    #[test]
    fn test_pinned_take_never_fires() {
        assert_eq!(evaluate(Side::Buy, dec!(1000000), None, dec!(95)), ExitDecision::None);
        assert_eq!(evaluate(Side::Buy, dec!(95), None, dec!(95)), ExitDecision::Stop);
    }

    #[test]
    fn test_take_reached() {
        assert!(take_reached(Side::Buy, dec!(105), Some(dec!(105))));
        assert!(!take_reached(Side::Buy, dec!(104), Some(dec!(105))));
        assert!(take_reached(Side::Sell, dec!(94), Some(dec!(95))));
        assert!(!take_reached(Side::Sell, dec!(94), None));
    }
}
