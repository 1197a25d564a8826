//! tracing 기반 로깅.
//!
//! 엔진의 결정(익절/손절, 래칫, 재진입, 그리드 레벨)은 구조화된 필드를 가진
//! tracing 이벤트로 남습니다. 출력 형식은 `pretty`(개발), `json`(로그 집계),
//! `compact` 중 하나입니다.

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("알 수 없는 로그 형식: {}", s)),
        }
    }
}

/// 설정 파일의 `[logging]` 섹션.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 필터 지시어 (예: "info", "trader_risk=debug"). `RUST_LOG`가 우선합니다.
    pub level: String,
    pub format: LogFormat,
    /// span 진입/종료 이벤트 출력
    pub with_span_events: bool,
    /// 파일명과 줄 번호
    pub with_file: bool,
    pub with_thread_ids: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: true,
            with_thread_ids: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// `RUST_LOG`, `LOG_FORMAT` 환경 변수로 설정을 만듭니다.
    pub fn from_env() -> Self {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Self {
            level,
            format,
            ..Default::default()
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// 설정된 형식의 fmt 레이어.
    fn fmt_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_file)
            .with_thread_ids(self.with_thread_ids)
            .with_target(self.with_target)
            .with_span_events(self.span_events());

        match self.format {
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
        }
    }
}

/// 전역 tracing 구독자를 설치합니다.
///
/// 이미 설치된 구독자가 있으면 에러를 반환합니다.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(config.fmt_layer())
        .try_init()?;

    tracing::info!(format = ?config.format, level = %config.level, "로깅 초기화");
    Ok(())
}

/// 포지션 컨텍스트 필드가 포함된 span을 생성하는 매크로.
#[macro_export]
macro_rules! position_span {
    ($name:expr, $position:expr) => {
        tracing::debug_span!(
            $name,
            position_id = %$position.id,
            side = %$position.side,
            entry = %$position.entry_price
        )
    };
    ($name:expr, $position:expr, $price:expr) => {
        tracing::debug_span!(
            $name,
            position_id = %$position.id,
            side = %$position.side,
            entry = %$position.entry_price,
            price = %$price
        )
    };
}
