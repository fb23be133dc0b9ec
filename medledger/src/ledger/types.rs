//! 監査台帳の型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 台帳に記録する操作種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    /// 作成
    Create,
    /// 更新
    Update,
    /// 削除（予約取消を含む）
    Delete,
}

impl AuditAction {
    /// 文字列からAuditActionに変換
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Create" => Some(Self::Create),
            "Update" => Some(Self::Update),
            "Delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// AuditActionを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 監査対象リソースの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// 診療記録
    #[default]
    Record,
    /// 予約
    Appointment,
}

impl ResourceKind {
    /// 文字列からResourceKindに変換
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "record" => Some(Self::Record),
            "appointment" => Some(Self::Appointment),
            _ => None,
        }
    }

    /// ResourceKindを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Appointment => "appointment",
        }
    }
}

/// ブロックのペイロード（1ブロック = 1操作）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// 操作種別
    pub action: AuditAction,
    /// リソース種別
    #[serde(default)]
    pub resource: ResourceKind,
    /// 対象リソースID（予約の場合は予約ID）
    pub record_id: i64,
    /// 操作した医師
    pub doctor_id: i64,
    /// 対象患者
    pub patient_id: i64,
    /// 操作日時
    pub timestamp: DateTime<Utc>,
    /// 操作時点のリソース全体のJSONスナップショット
    pub details: String,
}

/// 台帳ブロック
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBlock {
    /// 0始まりの連番
    pub index: u64,
    /// 作成日時
    pub timestamp: DateTime<Utc>,
    /// ペイロード（ジェネシスは`None`）
    pub transaction: Option<Transaction>,
    /// 直前ブロックのハッシュ（ジェネシスは`"0"`）
    pub previous_hash: String,
    /// このブロックのハッシュ
    pub hash: String,
}

impl LedgerBlock {
    /// ジェネシスブロックか
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// 未だ台帳に追記されていない変更（アウトボックス行）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAudit {
    /// アウトボックス行ID
    pub id: i64,
    /// 操作種別
    pub action: AuditAction,
    /// リソース種別
    pub resource: ResourceKind,
    /// 対象リソースID
    pub record_id: i64,
    /// 操作した医師
    pub doctor_id: i64,
    /// 対象患者
    pub patient_id: i64,
    /// スナップショット
    pub details: String,
    /// 変更がコミットされた日時
    pub created_at: DateTime<Utc>,
}

/// チェーン検証結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    /// 検証が成功したか
    pub valid: bool,
    /// 検証したブロック数
    pub blocks_checked: u64,
    /// 最初に不一致が見つかったブロック番号
    pub first_bad_index: Option<u64>,
    /// エラーメッセージ（該当する場合）
    pub message: Option<String>,
}

impl ChainVerification {
    pub(crate) fn clean(blocks_checked: u64) -> Self {
        Self {
            valid: true,
            blocks_checked,
            first_bad_index: None,
            message: None,
        }
    }

    pub(crate) fn broken(index: u64, blocks_checked: u64, message: String) -> Self {
        Self {
            valid: false,
            blocks_checked,
            first_bad_index: Some(index),
            message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serialization() {
        assert_eq!(
            serde_json::to_string(&AuditAction::Create).unwrap(),
            "\"Create\""
        );
        assert_eq!(AuditAction::parse("Update"), Some(AuditAction::Update));
        assert_eq!(AuditAction::parse("update"), None);
    }

    #[test]
    fn test_transaction_resource_defaults_to_record() {
        let json = r#"{
            "action": "Create",
            "record_id": 7,
            "doctor_id": 3,
            "patient_id": 9,
            "timestamp": "2026-01-01T00:00:00Z",
            "details": "{}"
        }"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.resource, ResourceKind::Record);
        assert_eq!(tx.record_id, 7);
    }

    #[test]
    fn test_resource_kind_strings() {
        assert_eq!(ResourceKind::Appointment.as_str(), "appointment");
        assert_eq!(ResourceKind::parse("record"), Some(ResourceKind::Record));
        assert_eq!(ResourceKind::parse("patient"), None);
    }
}
