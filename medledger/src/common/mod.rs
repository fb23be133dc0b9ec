//! 共通型定義とエラー型

/// エラー型
pub mod error;

/// ドメイン型（ロール・プロファイル・診療記録・予約）
pub mod types;
