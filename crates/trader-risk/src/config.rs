//! 리스크 엔진 설정.
//!
//! 익절/손절, 트레일링, 재진입, 그리드, 만료 컨트롤러의 설정 구조체를 정의합니다.
//! 필드의 존재 여부로 동작이 바뀌는 대신, 모드는 열거형으로 표현하고
//! 잘못된 조합은 `validate()`에서 엔진 생성 시점에 거부합니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 리스크 엔진 전체 설정.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    /// 어떤 관측이 평가를 구동하는지 (기본값: tick)
    #[serde(default)]
    pub cadence: EvaluationCadence,

    /// 리스크 레코드가 없는 포지션 처리 방식 (기본값: skip)
    #[serde(default)]
    pub untracked: UntrackedPolicy,

    /// 익절/손절 관리 (없으면 비활성)
    #[serde(default)]
    pub takes: Option<TakesConfig>,

    /// 그리드 컨트롤러 (없으면 비활성)
    #[serde(default)]
    pub grid: Option<GridConfig>,

    /// 보유 기간 만료 (없으면 비활성)
    #[serde(default)]
    pub expiry: Option<ExpiryConfig>,
}

/// 평가 주기.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationCadence {
    /// 모든 틱에서 평가
    #[default]
    Tick,
    /// 캔들 마감에서만 평가
    Candle,
}

/// 추적되지 않는 포지션 처리 정책.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UntrackedPolicy {
    /// 다른 컴포넌트가 관리하는 포지션으로 보고 건너뜀
    #[default]
    Skip,
    /// 에러로 보고
    Error,
}

/// 리스크 레코드 생성 방식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    /// 오픈 확정 시 설정 비율로 자동 생성
    #[default]
    Auto,
    /// 외부 호출자가 `register`로 레벨을 지정
    Manual,
}

/// 익절/손절 관리 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakesConfig {
    /// 진입가 대비 익절 비율 (예: 5는 5%)
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,

    /// 진입가 대비 손절 비율 (예: 3은 3%)
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,

    /// 레코드 생성 방식
    #[serde(default)]
    pub registration: RegistrationMode,

    /// 트레일링 모드
    #[serde(default)]
    pub trailing: TrailingMode,

    /// 손절 시 재진입 (없으면 즉시 청산)
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl TakesConfig {
    /// 고정 익절/손절 설정을 생성합니다.
    pub fn fixed(take_profit_pct: Decimal, stop_loss_pct: Decimal) -> Self {
        Self {
            take_profit_pct: Some(take_profit_pct),
            stop_loss_pct: Some(stop_loss_pct),
            registration: RegistrationMode::Auto,
            trailing: TrailingMode::None,
            retry: None,
        }
    }

    /// 트레일링 모드를 설정합니다.
    pub fn with_trailing(mut self, trailing: TrailingMode) -> Self {
        self.trailing = trailing;
        self
    }

    /// 재진입 설정을 추가합니다.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// 수동 등록 모드로 전환합니다.
    pub fn manual(mut self) -> Self {
        self.registration = RegistrationMode::Manual;
        self
    }
}

/// 트레일링 모드.
///
/// TOML 예시: `trailing = { mode = "classic", pin_take = true }`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrailingMode {
    /// 트레일링 없음
    #[default]
    None,
    /// 오픈 직후부터 유리한 움직임마다 익절/손절을 같은 폭만큼 이동
    Classic {
        /// 익절을 도달 불가능하게 고정 (트레일링 손절만으로 청산)
        #[serde(default)]
        pin_take: bool,
    },
    /// 익절 최초 도달 후 손절을 진입가로 옮기고 익절을 끈 뒤 래칫
    StartAfterTake,
    /// 익절 도달마다 현재가 기준으로 새 익절/손절 쌍을 계산
    MoveAfterEachTake,
}

impl TrailingMode {
    /// 트레일링이 켜져 있는지 확인합니다.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TrailingMode::None)
    }
}

/// 손절 재진입 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 계보 전체가 공유하는 최대 재진입 횟수
    pub max_retries: u32,

    /// 재진입 포지션마다 독립된 레벨 사본을 가질지 여부
    /// (false면 계보 루트의 레코드를 읽음)
    #[serde(default)]
    pub separate_stops: bool,

    /// 예산 소진 후 손절 시 동작
    #[serde(default)]
    pub on_exhausted: ExhaustedAction,
}

impl RetryConfig {
    /// 새 재진입 설정을 생성합니다.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            separate_stops: false,
            on_exhausted: ExhaustedAction::CloseAll,
        }
    }
}

/// 재진입 예산 소진 후 동작.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    /// 계보 전체를 즉시 청산
    #[default]
    CloseAll,
    /// 계보 합산 손익이 0 이상이 되는 첫 관측에서 전체 청산
    AwaitBreakEven,
}

/// 그리드 레벨 간격.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridSpacing {
    /// 모든 레벨이 같은 간격
    #[default]
    Fixed,
    /// 직전 두 간격의 합으로 증가 (1, 2, 3, 5, 8 ...)
    Fibonacci,
    /// 직전 간격에 배수를 곱해 증가
    Geometric {
        /// 간격 증가 배수 (1보다 커야 함)
        factor: Decimal,
    },
}

/// 그리드 진입 방향성.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridBias {
    /// 돌파한 방향으로 진입 (아래 레벨 → 숏)
    #[default]
    TrendFollowing,
    /// 돌파 반대 방향으로 진입 (아래 레벨 → 롱, 물타기)
    CounterTrend,
}

/// 그리드 활성 방향.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSides {
    /// 위/아래 모두
    #[default]
    Both,
    /// 앵커 위 레벨만
    UpOnly,
    /// 앵커 아래 레벨만
    DownOnly,
}

/// 그리드 합산 청산 시 동작.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridExitAction {
    /// 모든 그리드 포지션 청산
    #[default]
    CloseAll,
    /// 익절 시 가장 수익이 큰 포지션 하나만 남기고 트레일링으로 전환
    /// (손절 시에는 항상 전체 청산)
    CollapseToTrailing {
        /// 남은 포지션의 트레일링 손절 거리 (%)
        trail_pct: Decimal,
        /// 전환 전 남은 포지션을 줄일 비율 (0 < x < 1)
        #[serde(default)]
        reduce_fraction: Option<Decimal>,
    },
}

/// 그리드 종료마다 가용 자본을 줄이는 설정.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityDecay {
    /// 그리드 종료마다 곱할 배수 (0 < x < 1)
    pub factor: Decimal,
    /// 이 수준 아래로 내려가면 그리드 컨트롤러 폐기
    pub floor: Decimal,
}

/// 그리드 컨트롤러 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// 첫 레벨(고정 간격이면 모든 레벨) 간격, 앵커 대비 %
    pub step_pct: Decimal,

    /// 간격 방식
    #[serde(default)]
    pub spacing: GridSpacing,

    /// 마틴게일 배수 (레벨 깊이마다 크기에 곱함)
    #[serde(default = "default_martingale")]
    pub martingale: Decimal,

    /// 방향별 레벨 수
    #[serde(default = "default_levels_count")]
    pub levels_count: usize,

    /// 합산 익절 비율 (기준 금액 대비 %)
    pub take_profit_pct: Decimal,

    /// 합산 손절 비율 (기준 금액 대비 %)
    pub stop_loss_pct: Decimal,

    /// 손익률 계산 기준 금액
    pub base_amount: Decimal,

    /// 진입 방향성
    #[serde(default)]
    pub bias: GridBias,

    /// 활성 방향
    #[serde(default)]
    pub sides: GridSides,

    /// 한 방향 레벨이 발동한 뒤에도 반대 방향을 허용할지 여부
    #[serde(default)]
    pub allow_both_legs: bool,

    /// 합산 청산 동작
    #[serde(default)]
    pub exit: GridExitAction,

    /// 자본 감소 설정
    #[serde(default)]
    pub equity_decay: Option<EquityDecay>,
}

impl GridConfig {
    /// 기본 옵션으로 그리드 설정을 생성합니다.
    pub fn new(
        step_pct: Decimal,
        levels_count: usize,
        martingale: Decimal,
        take_profit_pct: Decimal,
        stop_loss_pct: Decimal,
        base_amount: Decimal,
    ) -> Self {
        Self {
            step_pct,
            spacing: GridSpacing::Fixed,
            martingale,
            levels_count,
            take_profit_pct,
            stop_loss_pct,
            base_amount,
            bias: GridBias::TrendFollowing,
            sides: GridSides::Both,
            allow_both_legs: false,
            exit: GridExitAction::CloseAll,
            equity_decay: None,
        }
    }
}

/// 보유 기간 만료 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// 이 수의 캔들 마감 후 포지션 청산
    pub candles_limit: u32,

    /// 한도의 절반을 넘긴 뒤 수익률이 `fee_pct` 이상이면 조기 청산
    #[serde(default)]
    pub close_at_zero: bool,

    /// 조기 청산 기준 수익률 (%)
    #[serde(default)]
    pub fee_pct: Decimal,
}

// 기본값 함수들
fn default_martingale() -> Decimal {
    Decimal::ONE
}

fn default_levels_count() -> usize {
    6
}

impl RiskEngineConfig {
    /// 익절/손절 관리만 있는 설정을 생성합니다.
    pub fn with_takes(takes: TakesConfig) -> Self {
        Self {
            takes: Some(takes),
            ..Default::default()
        }
    }

    /// 그리드만 있는 설정을 생성합니다.
    pub fn with_grid(grid: GridConfig) -> Self {
        Self {
            grid: Some(grid),
            ..Default::default()
        }
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.takes.is_none() && self.grid.is_none() && self.expiry.is_none() {
            return Err(ConfigValidationError::MissingField(
                "takes | grid | expiry".into(),
            ));
        }

        if let Some(takes) = &self.takes {
            takes.validate()?;
        }
        if let Some(grid) = &self.grid {
            grid.validate()?;
        }
        if let Some(expiry) = &self.expiry {
            expiry.validate()?;
        }

        Ok(())
    }
}

impl TakesConfig {
    /// 익절/손절 설정을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let needs_both = self.registration == RegistrationMode::Auto
            || self.trailing == TrailingMode::MoveAfterEachTake;

        if needs_both {
            if self.take_profit_pct.is_none() {
                return Err(ConfigValidationError::MissingField(
                    "takes.take_profit_pct".into(),
                ));
            }
            if self.stop_loss_pct.is_none() {
                return Err(ConfigValidationError::MissingField(
                    "takes.stop_loss_pct".into(),
                ));
            }
        }

        if let Some(tp) = self.take_profit_pct {
            if tp <= Decimal::ZERO {
                return Err(ConfigValidationError::InvalidValue(
                    "take_profit_pct must be greater than 0".into(),
                ));
            }
        }

        if let Some(sl) = self.stop_loss_pct {
            if sl <= Decimal::ZERO || sl >= Decimal::ONE_HUNDRED {
                return Err(ConfigValidationError::InvalidValue(
                    "stop_loss_pct must be between 0 and 100".into(),
                ));
            }
        }

        if let Some(retry) = &self.retry {
            if retry.max_retries == 0 {
                return Err(ConfigValidationError::InvalidValue(
                    "retry.max_retries must be at least 1".into(),
                ));
            }
        }

        Ok(())
    }
}

impl GridConfig {
    /// 그리드 설정을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.step_pct <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "grid.step_pct must be greater than 0".into(),
            ));
        }

        if self.levels_count == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "grid.levels_count must be at least 1".into(),
            ));
        }

        if self.martingale <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "grid.martingale must be greater than 0".into(),
            ));
        }

        if self.take_profit_pct <= Decimal::ZERO || self.stop_loss_pct <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "grid.take_profit_pct and grid.stop_loss_pct must be greater than 0".into(),
            ));
        }

        if self.base_amount <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "grid.base_amount must be greater than 0".into(),
            ));
        }

        if let GridSpacing::Geometric { factor } = self.spacing {
            if factor <= Decimal::ONE {
                return Err(ConfigValidationError::InvalidValue(
                    "grid.spacing.factor must be greater than 1".into(),
                ));
            }
        }

        if let GridExitAction::CollapseToTrailing {
            trail_pct,
            reduce_fraction,
        } = self.exit
        {
            if trail_pct <= Decimal::ZERO || trail_pct >= Decimal::ONE_HUNDRED {
                return Err(ConfigValidationError::InvalidValue(
                    "grid.exit.trail_pct must be between 0 and 100".into(),
                ));
            }
            if let Some(fraction) = reduce_fraction {
                if fraction <= Decimal::ZERO || fraction >= Decimal::ONE {
                    return Err(ConfigValidationError::InvalidValue(
                        "grid.exit.reduce_fraction must be between 0 and 1".into(),
                    ));
                }
            }
        }

        if let Some(decay) = &self.equity_decay {
            if decay.factor <= Decimal::ZERO || decay.factor >= Decimal::ONE {
                return Err(ConfigValidationError::InvalidValue(
                    "grid.equity_decay.factor must be between 0 and 1".into(),
                ));
            }
            if decay.floor <= Decimal::ZERO || decay.floor >= Decimal::ONE {
                return Err(ConfigValidationError::InvalidValue(
                    "grid.equity_decay.floor must be between 0 and 1".into(),
                ));
            }
        }

        Ok(())
    }
}

impl ExpiryConfig {
    /// 만료 설정을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.candles_limit == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "expiry.candles_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// 설정 검증 오류.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fixed_takes_config() {
        let config = RiskEngineConfig::with_takes(TakesConfig::fixed(dec!(5), dec!(3)));

        assert!(config.validate().is_ok());
        assert_eq!(config.cadence, EvaluationCadence::Tick);
        assert_eq!(config.untracked, UntrackedPolicy::Skip);
    }

    #[test]
    fn test_empty_config_rejected() {
        let config = RiskEngineConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_auto_takes_require_both_levels() {
        let mut takes = TakesConfig::fixed(dec!(5), dec!(3));
        takes.stop_loss_pct = None;

        let err = RiskEngineConfig::with_takes(takes).validate().unwrap_err();
        assert!(err.to_string().contains("stop_loss_pct"));
    }

    #[test]
    fn test_manual_takes_without_levels() {
        let mut takes = TakesConfig::fixed(dec!(5), dec!(3)).manual();
        takes.take_profit_pct = None;
        takes.stop_loss_pct = None;

        assert!(RiskEngineConfig::with_takes(takes.clone()).validate().is_ok());

        // 현재가 기준 재계산에는 두 비율이 모두 필요
        let takes = takes.with_trailing(TrailingMode::MoveAfterEachTake);
        assert!(RiskEngineConfig::with_takes(takes).validate().is_err());
    }

    #[test]
    fn test_retry_requires_budget() {
        let takes = TakesConfig::fixed(dec!(5), dec!(3)).with_retry(RetryConfig::new(0));
        assert!(RiskEngineConfig::with_takes(takes).validate().is_err());
    }

    #[test]
    fn test_grid_validation() {
        let grid = GridConfig::new(dec!(2), 3, dec!(2), dec!(5), dec!(10), dec!(1000));
        assert!(RiskEngineConfig::with_grid(grid.clone()).validate().is_ok());

        let mut invalid = grid.clone();
        invalid.levels_count = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = grid.clone();
        invalid.spacing = GridSpacing::Geometric { factor: dec!(1) };
        assert!(invalid.validate().is_err());

        let mut invalid = grid;
        invalid.exit = GridExitAction::CollapseToTrailing {
            trail_pct: dec!(1),
            reduce_fraction: Some(dec!(1.5)),
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config: RiskEngineConfig = toml::from_str(
            r#"
            cadence = "candle"

            [takes]
            take_profit_pct = "5"
            stop_loss_pct = "3"
            trailing = { mode = "classic", pin_take = true }

            [takes.retry]
            max_retries = 2
            on_exhausted = "await_break_even"

            [grid]
            step_pct = "2"
            levels_count = 3
            martingale = "2"
            take_profit_pct = "5"
            stop_loss_pct = "10"
            base_amount = "1000"
            spacing = { kind = "fibonacci" }
            bias = "counter_trend"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.cadence, EvaluationCadence::Candle);

        let takes = config.takes.unwrap();
        assert_eq!(takes.trailing, TrailingMode::Classic { pin_take: true });
        let retry = takes.retry.unwrap();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.on_exhausted, ExhaustedAction::AwaitBreakEven);

        let grid = config.grid.unwrap();
        assert_eq!(grid.spacing, GridSpacing::Fibonacci);
        assert_eq!(grid.bias, GridBias::CounterTrend);
        assert_eq!(grid.sides, GridSides::Both);
    }

    #[test]
    fn test_config_serialization() {
        let config = RiskEngineConfig::with_takes(
            TakesConfig::fixed(dec!(5), dec!(3)).with_trailing(TrailingMode::StartAfterTake),
        );
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RiskEngineConfig = serde_json::from_str(&json).unwrap();

        let takes = deserialized.takes.unwrap();
        assert_eq!(takes.take_profit_pct, Some(dec!(5)));
        assert_eq!(takes.trailing, TrailingMode::StartAfterTake);
    }
}
