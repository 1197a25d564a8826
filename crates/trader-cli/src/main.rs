//! 포지션 리스크 엔진 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 가격 파일 리플레이
//! trader replay -c config/default.toml -p data/prices.csv
//!
//! # 결과를 JSON으로 저장
//! trader replay -c config/default.toml -p data/prices.csv -o reports/replay.json
//!
//! # 설정 검사
//! trader check-config -c config/default.toml
//! ```

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use trader_cli::commands::check_config::check_config;
use trader_cli::commands::replay::{run_replay, ReplayCliConfig};
use trader_cli::AppConfig;
use trader_core::{init_logging, LogConfig};

#[derive(Parser)]
#[command(name = "trader")]
#[command(about = "Position risk engine CLI - 익절/손절, 트레일링, 재진입, 그리드 리플레이", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 가격 파일을 리스크 엔진과 모의 호스트로 재생
    Replay {
        /// 설정 파일 (TOML)
        #[arg(short, long, default_value = "config/default.toml")]
        config: String,

        /// 가격 파일 (time,price[,kind])
        #[arg(short, long)]
        prices: String,

        /// 결과 저장 경로 (.json이면 JSON, 그 외 텍스트)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// 설정 파일 검사
    CheckConfig {
        /// 설정 파일 (TOML)
        #[arg(short, long, default_value = "config/default.toml")]
        config: String,
    },
}

impl Commands {
    fn config_path(&self) -> &str {
        match self {
            Commands::Replay { config, .. } => config,
            Commands::CheckConfig { config } => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // 설정 파일의 [logging] 섹션으로 트레이싱 초기화 (로드 실패 시 기본값)
    let log_config = AppConfig::load(cli.command.config_path())
        .map(|app| app.logging)
        .unwrap_or_else(|_| LogConfig::from_env());
    init_logging(log_config).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    match cli.command {
        Commands::Replay {
            config,
            prices,
            output,
        } => {
            let replay_config = ReplayCliConfig {
                config_path: config.clone(),
                prices_path: prices.clone(),
                output_path: output.clone(),
            };

            println!("\n📊 리플레이 실행 중...");
            println!("설정: {}", config);
            println!("가격 파일: {}", prices);

            match run_replay(replay_config).await {
                Ok(report) => {
                    info!(
                        observations = report.observations,
                        realized_pnl = %report.realized_pnl,
                        "✅ Replay completed successfully"
                    );
                    if let Some(out) = output {
                        println!("\n📁 결과 저장됨: {}", out);
                    }
                }
                Err(e) => {
                    error!("Replay failed: {:#}", e);
                    return Err(e);
                }
            }
        }

        Commands::CheckConfig { config } => match check_config(&config) {
            Ok(_) => println!("\n✅ 설정 정상: {}", config),
            Err(e) => {
                error!("Config check failed: {:#}", e);
                return Err(e);
            }
        },
    }

    Ok(())
}
