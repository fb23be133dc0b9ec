//! Configuration management via environment variables
//!
//! Provides helper functions for reading environment variables with fallback
//! to a secondary variable name.

use crate::access::{AccessPolicy, DoctorReadPolicy};
use crate::common::error::{MedError, MedResult};

/// デフォルトのデータベースURL
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/medledger.db";

/// Get an environment variable with fallback to a secondary name
///
/// If the preferred variable is set, returns its value.
/// If only the fallback variable is set, returns its value and logs at debug level.
///
/// # Arguments
/// * `new_name` - The preferred environment variable name
/// * `old_name` - The fallback environment variable name
///
/// # Returns
/// * `Some(value)` - The environment variable value
/// * `None` - Neither variable is set
///
/// # Example
/// ```
/// use medledger::config::get_env_with_fallback;
///
/// let url = get_env_with_fallback("MEDLEDGER_DATABASE_URL", "DATABASE_URL");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::debug!(
            "Environment variable '{}' not set, using '{}'",
            new_name,
            old_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Returns `default` if neither is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// 真偽値として解釈する（`true/1/yes/on` / `false/0/no/off`）
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 台帳サービスの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// SQLiteデータベースURL
    pub database_url: String,
    /// アクセスポリシー
    pub policy: AccessPolicy,
    /// 起動時にチェーン全体を検証するか
    pub verify_on_start: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            policy: AccessPolicy::default(),
            verify_on_start: true,
        }
    }
}

impl LedgerConfig {
    /// 環境変数から設定を読み込む
    ///
    /// - `MEDLEDGER_DATABASE_URL`（未設定時 `DATABASE_URL`）
    /// - `MEDLEDGER_DOCTOR_READ_POLICY`（`open` / `require_grant`）
    /// - `MEDLEDGER_VERIFY_ON_START`（既定 true）
    ///
    /// ポリシーの値が不正な場合は`MedError::Config`を返す。
    pub fn from_env() -> MedResult<Self> {
        let database_url =
            get_env_with_fallback_or("MEDLEDGER_DATABASE_URL", "DATABASE_URL", DEFAULT_DATABASE_URL);

        let doctor_read =
            match get_env_with_fallback("MEDLEDGER_DOCTOR_READ_POLICY", "DOCTOR_READ_POLICY") {
                Some(raw) => DoctorReadPolicy::parse(&raw).ok_or_else(|| {
                    MedError::Config(format!(
                        "Invalid doctor read policy '{}' (expected 'open' or 'require_grant')",
                        raw
                    ))
                })?,
                None => DoctorReadPolicy::default(),
            };

        let verify_on_start =
            match get_env_with_fallback("MEDLEDGER_VERIFY_ON_START", "VERIFY_ON_START") {
                Some(raw) => parse_flag(&raw).ok_or_else(|| {
                    MedError::Config(format!("Invalid boolean for verify on start: '{}'", raw))
                })?,
                None => true,
            };

        Ok(Self {
            database_url,
            policy: AccessPolicy { doctor_read },
            verify_on_start,
        })
    }
}
