//! 트레일링 컨트롤러
//!
//! 가격이 유리하게 움직일 때 손절(및 익절) 레벨을 앞으로 이동시킵니다:
//! - Classic: 오픈 직후부터 유리한 움직임마다 두 레벨을 같은 폭만큼 이동
//! - StartAfterTake: 익절 도달 시 손절을 진입가로 옮기고 이후 래칫
//! - MoveAfterEachTake: 익절 도달마다 현재가 기준 새 레벨 쌍
//!
//! 손절은 어떤 모드에서도 불리한 방향으로 이동하지 않습니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{DecimalExt, Price, Side};

use crate::config::{TakesConfig, TrailingMode};
use crate::evaluator::take_reached;
use crate::registry::RiskRecord;

/// 한 번의 트레일링 갱신 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingUpdate {
    /// 변경 없음
    Unchanged,
    /// 기준가 대비 델타만큼 레벨 이동
    Ratcheted { delta: Decimal },
    /// 익절 도달로 트레일링 시작 (손절 → 진입가)
    Armed { stop: Price },
    /// 현재가 기준 새 레벨 쌍
    Reanchored { take: Price, stop: Price },
}

/// 트레일링 컨트롤러.
///
/// 상태는 레코드에 있고 컨트롤러는 모드와 비율만 가집니다.
#[derive(Debug, Clone)]
pub struct TrailingController {
    mode: TrailingMode,
    take_profit_pct: Option<Decimal>,
    stop_loss_pct: Option<Decimal>,
}

impl TrailingController {
    /// 새 트레일링 컨트롤러 생성
    pub fn new(
        mode: TrailingMode,
        take_profit_pct: Option<Decimal>,
        stop_loss_pct: Option<Decimal>,
    ) -> Self {
        Self {
            mode,
            take_profit_pct,
            stop_loss_pct,
        }
    }

    /// 익절/손절 설정으로부터 생성
    pub fn from_config(takes: &TakesConfig) -> Self {
        Self::new(takes.trailing, takes.take_profit_pct, takes.stop_loss_pct)
    }

    /// 익절이 고정된 Classic 컨트롤러 (그리드 잔여 포지션용)
    pub fn pinned_classic() -> Self {
        Self::new(TrailingMode::Classic { pin_take: true }, None, None)
    }

    /// 트레일링 모드 조회
    pub fn mode(&self) -> TrailingMode {
        self.mode
    }

    /// 모드에 맞게 초기 익절 레벨을 조정합니다.
    ///
    /// 익절 고정 Classic 모드면 `None`(도달 불가능)을 반환합니다.
    pub fn initial_take(&self, take: Option<Price>) -> Option<Price> {
        match self.mode {
            TrailingMode::Classic { pin_take: true } => None,
            _ => take,
        }
    }

    /// 새 가격으로 레코드의 트레일링 상태를 갱신합니다.
    pub fn update(
        &self,
        record: &mut RiskRecord,
        side: Side,
        entry_price: Price,
        price: Price,
    ) -> TrailingUpdate {
        match self.mode {
            TrailingMode::None => TrailingUpdate::Unchanged,
            TrailingMode::Classic { .. } => ratchet(record, side, price),
            TrailingMode::StartAfterTake => {
                if record.trailing_armed {
                    return ratchet(record, side, price);
                }
                if !take_reached(side, price, record.take_price) {
                    return TrailingUpdate::Unchanged;
                }

                record.stop_price = tighter(side, record.stop_price, entry_price);
                record.take_price = None;
                record.anchor_price = price;
                record.trailing_armed = true;
                TrailingUpdate::Armed {
                    stop: record.stop_price,
                }
            }
            TrailingMode::MoveAfterEachTake => {
                if !take_reached(side, price, record.take_price) {
                    return TrailingUpdate::Unchanged;
                }
                let (Some(tp), Some(sl)) = (self.take_profit_pct, self.stop_loss_pct) else {
                    return TrailingUpdate::Unchanged;
                };

                let direction = side.direction();
                let take = price.apply_pct(tp * direction);
                let stop = tighter(side, record.stop_price, price.apply_pct(-sl * direction));

                record.take_price = Some(take);
                record.stop_price = stop;
                record.anchor_price = price;
                record.trailing_armed = true;
                TrailingUpdate::Reanchored { take, stop }
            }
        }
    }
}

/// 기준가보다 유리한 가격이면 레벨을 델타만큼 이동하고 기준가를 갱신합니다.
fn ratchet(record: &mut RiskRecord, side: Side, price: Price) -> TrailingUpdate {
    if !side.is_favorable(price, record.anchor_price) {
        return TrailingUpdate::Unchanged;
    }

    let delta = price - record.anchor_price;
    record.stop_price += delta;
    record.take_price = record.take_price.map(|take| take + delta);
    record.anchor_price = price;
    record.trailing_armed = true;
    TrailingUpdate::Ratcheted { delta }
}

/// 두 손절 후보 중 포지션에 유리한(더 타이트한) 쪽.
fn tighter(side: Side, current: Price, proposed: Price) -> Price {
    match side {
        Side::Buy => current.max(proposed),
        Side::Sell => current.min(proposed),
    }
}
