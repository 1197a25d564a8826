//! 설정 검사 명령어.
//!
//! 설정 파일을 로드해 리스크 엔진 설정을 검증하고 활성 컨트롤러를 출력합니다.
//!
//! ```bash
//! trader check-config -c config/default.toml
//! ```

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::info;
use trader_core::DecimalExt;
use trader_risk::{RiskEngineConfig, TrailingMode};

use crate::config::AppConfig;

/// 설정 파일을 검사합니다.
pub fn check_config(path: &str) -> Result<AppConfig> {
    let app = AppConfig::load(path).with_context(|| format!("Failed to load config: {}", path))?;
    app.risk
        .validate()
        .with_context(|| format!("Invalid risk configuration in {}", path))?;

    info!(path, "Configuration is valid");
    println!("\n{}", describe(&app.risk));
    Ok(app)
}

/// 활성 컨트롤러 설명.
pub fn describe(config: &RiskEngineConfig) -> String {
    let mut lines = vec![format!("평가 주기: {:?}", config.cadence)];

    match &config.takes {
        Some(takes) => {
            lines.push(format!(
                "익절/손절: {}/{} ({:?})",
                pct(takes.take_profit_pct),
                pct(takes.stop_loss_pct),
                takes.registration
            ));
            if takes.trailing != TrailingMode::None {
                lines.push(format!("트레일링: {:?}", takes.trailing));
            }
            if let Some(retry) = &takes.retry {
                lines.push(format!(
                    "재진입: 최대 {}회, 소진 시 {:?}",
                    retry.max_retries, retry.on_exhausted
                ));
            }
        }
        None => lines.push("익절/손절: 비활성".to_string()),
    }

    if let Some(grid) = &config.grid {
        lines.push(format!(
            "그리드: {} x {} 레벨, 마틴게일 {}, {:?}",
            grid.step_pct.to_percentage_string(),
            grid.levels_count,
            grid.martingale,
            grid.spacing
        ));
    }
    if let Some(expiry) = &config.expiry {
        lines.push(format!("만료: {} 캔들", expiry.candles_limit));
    }

    lines.join("\n")
}

fn pct(value: Option<Decimal>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_percentage_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_risk::{GridConfig, TakesConfig};

    #[test]
    fn test_describe() {
        let mut config = RiskEngineConfig::with_takes(
            TakesConfig::fixed(dec!(5), dec!(3)).with_trailing(TrailingMode::StartAfterTake),
        );
        config.grid = Some(GridConfig::new(dec!(2), 3, dec!(2), dec!(5), dec!(10), dec!(1000)));

        let text = describe(&config);
        assert!(text.contains("StartAfterTake"));
        assert!(text.contains("익절/손절: 5.00%/3.00% (Auto)"));
        assert!(text.contains("그리드: 2.00% x 3 레벨"));
        assert!(!text.contains("재진입"));
    }

    #[test]
    fn test_invalid_config_file() {
        let path = std::env::temp_dir().join(format!("trader-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[risk]\ncadence = \"tick\"\n").unwrap();

        let result = check_config(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }
}
