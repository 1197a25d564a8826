//! CLI 도구 모음.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 가격 파일 리플레이
//! - 설정 관리 및 검사

pub mod commands;
pub mod config;

pub use commands::*;
pub use config::{AppConfig, ReplayConfig};
