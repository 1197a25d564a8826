//! 애플리케이션 설정 관리.
//!
//! TOML 파일에서 로드하고 `TRADER__` 접두사 환경 변수로 오버라이드합니다.
//! (예: `TRADER__RISK__TAKES__STOP_LOSS_PCT=2`)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use trader_core::{LogConfig, Side};
use trader_risk::RiskEngineConfig;

/// 메인 애플리케이션 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 로깅 설정
    #[serde(default)]
    pub logging: LogConfig,

    /// 리플레이 설정
    #[serde(default)]
    pub replay: ReplayConfig,

    /// 리스크 엔진 설정
    pub risk: RiskEngineConfig,
}

/// 리플레이 진입 규칙.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// 거래 ticker
    #[serde(default = "default_ticker")]
    pub ticker: String,

    /// 진입 방향
    #[serde(default = "default_side")]
    pub entry_side: Side,

    /// 진입 수량
    #[serde(default = "default_entry_size")]
    pub entry_size: Decimal,

    /// 열린 포지션이 없을 때마다 다시 진입할지 여부 (false면 첫 관측에서 한 번만)
    #[serde(default = "default_true")]
    pub reenter: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            ticker: default_ticker(),
            entry_side: default_side(),
            entry_size: default_entry_size(),
            reenter: default_true(),
        }
    }
}

// 기본값 함수들
fn default_ticker() -> String {
    "BTCUSDT".to_string()
}

fn default_side() -> Side {
    Side::Buy
}

fn default_entry_size() -> Decimal {
    Decimal::ONE
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            // 파일에서 로드
            .add_source(config::File::from(path.as_ref()))
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/default.toml")
    }
}
