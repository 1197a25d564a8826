//! 보유 기간 만료 컨트롤러.
//!
//! 포지션마다 오픈 이후 지난 캔들 마감 수를 셉니다.

use std::collections::HashMap;

use tracing::debug;
use trader_core::{Position, PositionId, Price};

use crate::config::ExpiryConfig;

/// 만료 컨트롤러.
#[derive(Debug)]
pub struct ExpiryController {
    config: ExpiryConfig,
    counters: HashMap<PositionId, u32>,
}

impl ExpiryController {
    /// 새 만료 컨트롤러 생성
    pub fn new(config: ExpiryConfig) -> Self {
        Self {
            config,
            counters: HashMap::new(),
        }
    }

    /// 포지션 오픈 확정 시 카운터 생성
    pub fn on_position_opened(&mut self, id: PositionId) {
        self.counters.entry(id).or_insert(0);
    }

    /// 포지션 종료 확정 시 카운터 제거
    pub fn on_position_closed(&mut self, id: PositionId) {
        self.counters.remove(&id);
    }

    /// 포지션의 현재 카운터
    pub fn counter(&self, id: PositionId) -> Option<u32> {
        self.counters.get(&id).copied()
    }

    /// 캔들 마감 하나를 처리하고 닫아야 할 포지션을 반환합니다.
    ///
    /// `skip`에 포함된 포지션(이미 종료 요청됨)은 세지만 반환하지 않습니다.
    pub fn on_candle<F>(&mut self, snapshot: &[Position], price: Price, skip: F) -> Vec<Position>
    where
        F: Fn(PositionId) -> bool,
    {
        let limit = self.config.candles_limit;
        let mut expired = Vec::new();

        for position in snapshot {
            let Some(counter) = self.counters.get_mut(&position.id) else {
                continue;
            };
            *counter += 1;
            let counter = *counter;

            if skip(position.id) {
                continue;
            }

            // 한도의 절반을 넘긴 뒤에는 수수료 이상 수익이면 조기 청산
            let early = self.config.close_at_zero
                && counter * 2 > limit
                && position.return_pct_at(price) >= self.config.fee_pct;

            if counter >= limit || early {
                debug!(
                    position_id = %position.id,
                    counter,
                    limit,
                    early,
                    "보유 기간 만료"
                );
                expired.push(position.clone());
            }
        }

        expired
    }
}
