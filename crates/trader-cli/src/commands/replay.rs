//! 리플레이 명령어.
//!
//! 가격 파일을 리스크 엔진에 순서대로 흘려 보내고 모의 호스트에서 체결합니다.
//!
//! # 사용 예시
//!
//! ```bash
//! # 기본 설정으로 리플레이
//! trader replay -c config/default.toml -p data/btc_prices.csv
//!
//! # 결과를 JSON으로 저장
//! trader replay -c config/grid.toml -p data/btc_prices.csv -o reports/grid.json
//! ```
//!
//! 가격 파일은 `time,price[,kind]` 헤더가 있는 CSV입니다. `time`은 RFC 3339,
//! `kind`는 `tick` 또는 `candle`(기본값)이며 `#`으로 시작하는 줄은 주석입니다.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use trader_core::{DecimalExt, ObservationKind, PositionHost, PriceObservation};
use trader_execution::{PaperHost, PositionEvent};
use trader_risk::{RiskEngine, StepSummary};

use crate::config::AppConfig;

/// 리플레이 CLI 설정
#[derive(Debug, Clone)]
pub struct ReplayCliConfig {
    /// 설정 파일 경로
    pub config_path: String,
    /// 가격 파일 경로
    pub prices_path: String,
    /// 결과 저장 경로 (옵션)
    pub output_path: Option<String>,
}

/// 리플레이 결과.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    /// 처리한 관측 수
    pub observations: usize,
    /// 리플레이 진입 수
    pub entries: usize,
    /// 오픈 확정 수 (진입 + 재진입 + 그리드)
    pub opened: usize,
    /// 종료 확정 수
    pub closed: usize,
    /// 종료된 거래 수
    pub trades: usize,
    /// 수익 거래 비율 (%)
    pub win_rate: Decimal,
    /// 누적 실현 손익
    pub realized_pnl: Decimal,
    /// 마지막 가격 기준 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 리플레이 종료 시 열린 포지션 수
    pub open_positions: usize,
    /// 엔진 동작 누적
    pub engine: StepSummary,
}

impl ReplayReport {
    /// 사람이 읽을 요약.
    pub fn summary(&self) -> String {
        format!(
            "관측: {}\n진입: {}\n오픈/종료: {}/{}\n익절/손절: {}/{}\n재진입: {}\n계보 종료: {}\n그리드 진입/청산: {}/{}\n만료: {}\n거래: {} (승률 {})\n실현 손익: {}\n미실현 손익: {} (열린 포지션 {})",
            self.observations,
            self.entries,
            self.opened,
            self.closed,
            self.engine.take_hits,
            self.engine.stop_hits,
            self.engine.escalations,
            self.engine.lineage_closes,
            self.engine.grid_opens,
            self.engine.grid_exits,
            self.engine.expired,
            self.trades,
            self.win_rate.to_percentage_string(),
            self.realized_pnl,
            self.unrealized_pnl,
            self.open_positions,
        )
    }
}

/// 리플레이 실행
pub async fn run_replay(config: ReplayCliConfig) -> Result<ReplayReport> {
    let app = AppConfig::load(&config.config_path)
        .with_context(|| format!("Failed to load config: {}", config.config_path))?;
    let observations = load_observations(&config.prices_path)?;

    if observations.is_empty() {
        return Err(anyhow!("No price observations in {}", config.prices_path));
    }
    info!(
        count = observations.len(),
        ticker = %app.replay.ticker,
        "Loaded price observations"
    );

    let report = replay(&app, &observations).await?;

    println!("\n{}", report.summary());

    if let Some(output_path) = &config.output_path {
        save_report(&report, output_path)?;
        info!("Report saved to: {}", output_path);
    }

    Ok(report)
}

/// 관측 목록을 엔진과 모의 호스트로 재생합니다.
pub async fn replay(app: &AppConfig, observations: &[PriceObservation]) -> Result<ReplayReport> {
    let host = Arc::new(PaperHost::new(app.replay.ticker.clone()));
    let mut engine = RiskEngine::new(app.risk.clone(), host.clone())?;
    let mut report = ReplayReport::default();

    for observation in observations {
        host.mark(observation).await;

        let should_enter = host.position_count().await == 0
            && (app.replay.reenter || report.entries == 0);
        if should_enter {
            let opened = host
                .open_position(&app.replay.ticker, app.replay.entry_side, app.replay.entry_size)
                .await?;
            if opened.is_some() {
                report.entries += 1;
            }
        }
        forward_events(&host, &mut engine, &mut report).await;

        let summary = engine.on_observation(observation).await?;
        report.engine.merge(&summary);
        forward_events(&host, &mut engine, &mut report).await;

        report.observations += 1;
    }

    let closed = host.closed_positions().await;
    let winners = closed.iter().filter(|c| c.realized_pnl > Decimal::ZERO).count();
    report.trades = closed.len();
    report.win_rate = Decimal::from(winners)
        .pct_of(Decimal::from(closed.len()))
        .round_dp_half_up(2);
    report.realized_pnl = host.realized_pnl().await;
    report.unrealized_pnl = host.unrealized_pnl().await;
    report.open_positions = host.position_count().await;
    Ok(report)
}

/// 호스트 체결 이벤트를 엔진 확정 훅으로 전달합니다.
async fn forward_events(host: &PaperHost, engine: &mut RiskEngine, report: &mut ReplayReport) {
    for event in host.drain_events().await {
        match event {
            PositionEvent::Opened { position } => {
                report.opened += 1;
                engine.on_position_opened(&position);
            }
            PositionEvent::Closed { position_id, .. } => {
                report.closed += 1;
                engine.on_position_closed(position_id);
            }
            PositionEvent::Reduced { position_id, .. } => {
                debug!(position_id = %position_id, "Position reduced");
            }
        }
    }
}

/// 가격 파일 한 행.
#[derive(Debug, Deserialize)]
struct PriceRow {
    time: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(default)]
    kind: Option<ObservationKind>,
}

impl PriceRow {
    fn into_observation(self) -> Result<PriceObservation> {
        if self.price <= Decimal::ZERO {
            return Err(anyhow!("Price must be positive: {}", self.price));
        }
        Ok(PriceObservation {
            kind: self.kind.unwrap_or(ObservationKind::Candle),
            price: self.price,
            time: self.time,
        })
    }
}

/// 가격 파일을 읽습니다.
pub fn load_observations(path: &str) -> Result<Vec<PriceObservation>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Price file not found: {}", path))?;
    read_observations(file).with_context(|| format!("Invalid price file: {}", path))
}

/// CSV 가격 행을 관측 목록으로 읽습니다.
pub fn read_observations<R: Read>(reader: R) -> Result<Vec<PriceObservation>> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut observations = Vec::new();
    for (index, row) in reader.deserialize::<PriceRow>().enumerate() {
        let observation = row
            .map_err(anyhow::Error::from)
            .and_then(PriceRow::into_observation)
            .with_context(|| format!("record {}", index + 1))?;
        observations.push(observation);
    }

    Ok(observations)
}

fn save_report(report: &ReplayReport, path: &str) -> Result<()> {
    let path = Path::new(path);

    // 디렉토리 생성
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::to_string_pretty(report)?
    } else {
        // 기본: 텍스트 요약
        report.summary()
    };

    std::fs::write(path, content)?;
    Ok(())
}
