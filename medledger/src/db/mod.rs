//! データベースアクセス層
//!
//! SQLiteベースのデータ永続化

use crate::common::error::{MedError, MedResult};
use chrono::{DateTime, SecondsFormat, Utc};

/// データベースマイグレーション
pub mod migrations;

/// Repository traitパターン（テスタビリティ向上）
pub mod traits;

/// 台帳ブロックとアウトボックス
pub mod blocks;

/// 医師・患者プロファイル
pub mod profiles;

/// 診療記録
pub mod records;

/// 予約
pub mod appointments;

/// アクセス申請（期限付き閲覧許可）
pub mod access_requests;

/// SQLite実装（traits の実体）
pub mod store;

pub use store::SqliteStore;

/// 日時をTEXT列用に整形（ナノ秒精度、UTC `Z` 表記）
///
/// ハッシュ計算対象の日時は読み戻したときに同一値でなければならないため、
/// 精度を落とさずに保存する。
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// TEXT列の日時を解析
pub(crate) fn parse_ts(raw: &str) -> MedResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MedError::StorageFailure(format!("Invalid timestamp '{}': {}", raw, e)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_keeps_nanoseconds() {
        let ts = Utc.timestamp_opt(1_767_225_600, 123_456_789).unwrap();
        let parsed = parse_ts(&format_ts(&ts)).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_parse_ts_rejects_garbage() {
        assert!(matches!(
            parse_ts("yesterday"),
            Err(MedError::StorageFailure(_))
        ));
    }
}
