//! 変更サービスの型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::Operation;
use crate::common::types::{Appointment, MedicalRecord, RecordFields};
use crate::ledger::types::ResourceKind;

/// 監査対象の変更要求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// 診療記録の作成
    CreateRecord {
        /// 対象患者のIIN
        patient_iin: String,
        /// 記録内容
        fields: RecordFields,
    },
    /// 診療記録の更新
    UpdateRecord {
        /// 記録ID
        record_id: i64,
        /// 新しい記録内容
        fields: RecordFields,
    },
    /// 診療記録の削除
    DeleteRecord {
        /// 記録ID
        record_id: i64,
    },
    /// 予約の作成
    CreateAppointment {
        /// 対象患者のIIN
        patient_iin: String,
        /// 予約日時
        date: DateTime<Utc>,
    },
    /// 予約日時の変更
    RescheduleAppointment {
        /// 予約ID
        appointment_id: i64,
        /// 新しい予約日時
        date: DateTime<Utc>,
    },
    /// 予約の取消
    CancelAppointment {
        /// 予約ID
        appointment_id: i64,
    },
}

impl Mutation {
    /// 対応するアクセス判定の操作
    pub fn operation(&self) -> Operation {
        match self {
            Self::CreateRecord { .. } => Operation::CreateRecord,
            Self::UpdateRecord { .. } => Operation::UpdateRecord,
            Self::DeleteRecord { .. } => Operation::DeleteRecord,
            Self::CreateAppointment { .. } => Operation::CreateAppointment,
            Self::RescheduleAppointment { .. } => Operation::RescheduleAppointment,
            Self::CancelAppointment { .. } => Operation::CancelAppointment,
        }
    }

    /// 対象リソースの種別
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::CreateRecord { .. } | Self::UpdateRecord { .. } | Self::DeleteRecord { .. } => {
                ResourceKind::Record
            }
            _ => ResourceKind::Appointment,
        }
    }
}

/// 変更後（削除の場合は削除前）のリソース
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Resource {
    /// 診療記録
    Record(MedicalRecord),
    /// 予約
    Appointment(Appointment),
}

impl Resource {
    /// リソースID
    pub fn id(&self) -> i64 {
        match self {
            Self::Record(record) => record.record_id,
            Self::Appointment(appointment) => appointment.id,
        }
    }
}

/// 変更処理の状態
///
/// `Received → Authorizing → (Denied | Mutating) → (Failed | Committing) → (Failed | Logged)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// 要求を受理
    Received,
    /// アクセス判定中
    Authorizing,
    /// 拒否（副作用なし）
    Denied,
    /// リソース変更中
    Mutating,
    /// 台帳へ追記中
    Committing,
    /// 台帳に記録済み
    Logged,
    /// 失敗
    Failed,
}

impl MutationPhase {
    /// 状態名
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authorizing => "authorizing",
            Self::Denied => "denied",
            Self::Mutating => "mutating",
            Self::Committing => "committing",
            Self::Logged => "logged",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
