//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! `MedError`は`error_type()`と`external_message()`を提供する。
//! HTTPステータスへの変換はハンドラー層の責務とし、ここでは扱わない。

use crate::access::{DenyReason, Entity};
use crate::lock::LockError;
use thiserror::Error;

/// 医療記録コアのエラー型
#[derive(Debug, Error)]
pub enum MedError {
    /// ポリシーによる拒否（副作用なし）
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(DenyReason),

    /// 参照先エンティティが存在しない
    #[error("Not found: {0}")]
    ResourceNotFound(Entity),

    /// ストレージ障害（リソース変更前、または台帳永続化前）
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// リソースは変更済みだが台帳への追記に失敗した
    ///
    /// 監査エントリはアウトボックスに残っており、`Ledger::drain_outbox` で追記される。
    #[error("Resource changed but audit entry is missing (outbox #{outbox_id}): {message}")]
    UnauditedMutation {
        /// 未処理のアウトボックス行ID
        outbox_id: i64,
        /// 失敗の詳細
        message: String,
    },

    /// ハッシュチェーン検証の不一致（自動修復しない）
    #[error("Integrity violation at block {index}: {message}")]
    IntegrityViolation {
        /// 最初に不一致が見つかったブロック番号
        index: u64,
        /// 不一致の詳細
        message: String,
    },

    /// シリアライズエラー
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 設定エラー
    #[error("Configuration error: {0}")]
    Config(String),

    /// 書き込みプロセスロックのエラー
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl MedError {
    /// Returns a safe error message for external clients.
    ///
    /// Use the `Display` implementation for server logs; it carries the
    /// internal details (SQL errors, outbox ids, hashes).
    pub fn external_message(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied(_) => "Access denied",
            Self::ResourceNotFound(_) => "Not found",
            Self::StorageFailure(_) => "Database error",
            Self::UnauditedMutation { .. } => "Change saved but audit entry is pending",
            Self::IntegrityViolation { .. } => "Audit ledger integrity violation",
            Self::Serialization(_) => "Internal server error",
            Self::Config(_) => "Internal server error",
            Self::Lock(_) => "Service temporarily unavailable",
        }
    }

    /// Returns the error category string used by the handler layer.
    ///
    /// - `permission_error`: policy rejected the request
    /// - `not_found_error`: referenced entity is missing
    /// - `server_error`: storage, serialization or configuration failures
    /// - `audit_error`: ledger problems (unaudited mutation, integrity violation)
    /// - `service_unavailable`: another writer process holds the database
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied(_) => "permission_error",
            Self::ResourceNotFound(_) => "not_found_error",
            Self::StorageFailure(_) => "server_error",
            Self::UnauditedMutation { .. } => "audit_error",
            Self::IntegrityViolation { .. } => "audit_error",
            Self::Serialization(_) => "server_error",
            Self::Config(_) => "server_error",
            Self::Lock(_) => "service_unavailable",
        }
    }

    /// 呼び出し側の再試行が無意味な「想定内の結果」か
    pub fn is_expected_outcome(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationDenied(_) | Self::ResourceNotFound(_)
        )
    }
}

/// Result type alias
pub type MedResult<T> = Result<T, MedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_display() {
        let error = MedError::AuthorizationDenied(DenyReason::NotOwner);
        assert!(error.to_string().starts_with("Authorization denied"));
        assert_eq!(error.error_type(), "permission_error");
        assert_eq!(error.external_message(), "Access denied");
    }

    #[test]
    fn test_not_found_names_entity() {
        let error = MedError::ResourceNotFound(Entity::Record);
        assert_eq!(error.to_string(), "Not found: record");
        assert_eq!(error.error_type(), "not_found_error");
    }

    #[test]
    fn test_unaudited_mutation_is_distinct_from_storage_failure() {
        let unaudited = MedError::UnauditedMutation {
            outbox_id: 7,
            message: "disk I/O error".to_string(),
        };
        let storage = MedError::StorageFailure("disk I/O error".to_string());
        assert_eq!(unaudited.error_type(), "audit_error");
        assert_eq!(storage.error_type(), "server_error");
        assert!(unaudited.to_string().contains("outbox #7"));
    }

    #[test]
    fn test_expected_outcomes() {
        assert!(MedError::AuthorizationDenied(DenyReason::NotADoctor).is_expected_outcome());
        assert!(MedError::ResourceNotFound(Entity::Patient).is_expected_outcome());
        assert!(!MedError::StorageFailure("x".to_string()).is_expected_outcome());
        assert!(!MedError::IntegrityViolation {
            index: 3,
            message: "hash mismatch".to_string()
        }
        .is_expected_outcome());
    }

    #[test]
    fn test_error_from_serde() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let error: MedError = json_error.into();
        assert!(matches!(error, MedError::Serialization(_)));
    }
}
