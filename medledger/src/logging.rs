//! ログ初期化
//!
//! `MEDLEDGER_LOG_LEVEL`（未設定時 `RUST_LOG`）をEnvFilterとして解釈する。
//! 標準出力はCLIの結果出力に使うため、ログは標準エラーに書く。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::common::error::{MedError, MedResult};
use crate::config::get_env_with_fallback_or;

/// 既定のフィルタ
pub const DEFAULT_LOG_FILTER: &str = "info";

/// 環境変数からフィルタ文字列を取得
pub fn filter_from_env() -> String {
    get_env_with_fallback_or("MEDLEDGER_LOG_LEVEL", "RUST_LOG", DEFAULT_LOG_FILTER)
}

/// フィルタ文字列を解釈（不正な値は`MedError::Config`）
pub fn build_filter(directives: &str) -> MedResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| MedError::Config(format!("Invalid log filter '{}': {}", directives, e)))
}

/// グローバルsubscriberを初期化する
///
/// 2回目以降の呼び出しはエラーを返す。
pub fn init() -> MedResult<()> {
    let filter = build_filter(&filter_from_env())?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| MedError::Config(format!("Failed to initialize logging: {}", e)))
}
