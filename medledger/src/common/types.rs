//! 医療記録ドメインの共通型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 認証済み利用者のロール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 医師
    Doctor,
    /// 患者
    Patient,
}

impl Role {
    /// 文字列からRoleに変換（不明なロールは`None`）
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "doctor" => Some(Self::Doctor),
            "patient" => Some(Self::Patient),
            _ => None,
        }
    }

    /// Roleを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doctor => "doctor",
            Self::Patient => "patient",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 認証ミドルウェアで解決済みのアクター情報 `(role, user_id)`
///
/// コアはこの値をそのまま信頼する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorContext {
    /// ロール
    pub role: Role,
    /// ユーザーID
    pub user_id: i64,
}

impl ActorContext {
    /// 医師アクター
    pub fn doctor(user_id: i64) -> Self {
        Self {
            role: Role::Doctor,
            user_id,
        }
    }

    /// 患者アクター
    pub fn patient(user_id: i64) -> Self {
        Self {
            role: Role::Patient,
            user_id,
        }
    }
}

/// 医師プロファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    /// 医師ID
    pub doctor_id: i64,
    /// ユーザーID
    pub user_id: i64,
    /// 専門
    pub specialization: String,
}

/// 患者プロファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    /// 患者ID
    pub patient_id: i64,
    /// ユーザーID
    pub user_id: i64,
    /// 個人識別番号（IIN）
    pub iin: String,
    /// 生年月日
    pub date_of_birth: String,
}

/// 診療記録
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecord {
    /// 記録ID
    pub record_id: i64,
    /// 患者ID
    pub patient_id: i64,
    /// 作成した医師（所有者）
    pub doctor_id: i64,
    /// 診断
    pub diagnosis: String,
    /// 治療計画
    pub treatment_plan: String,
    /// 検査結果
    pub test_result: String,
    /// 作成日時
    pub created_at: DateTime<Utc>,
}

/// 診療記録の可変フィールド（作成・更新の入力）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    /// 診断
    pub diagnosis: String,
    /// 治療計画
    pub treatment_plan: String,
    /// 検査結果
    pub test_result: String,
}

/// 予約
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// 予約ID
    pub id: i64,
    /// 担当医師（所有者）
    pub doctor_id: i64,
    /// 患者ID
    pub patient_id: i64,
    /// 予約日時
    pub date: DateTime<Utc>,
}

/// アクセス申請の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// 患者の応答待ち
    Pending,
    /// 許可済み
    Granted,
    /// 拒否
    Rejected,
}

impl GrantStatus {
    /// 文字列からGrantStatusに変換
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "granted" => Some(Self::Granted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// GrantStatusを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Granted => "granted",
            Self::Rejected => "rejected",
        }
    }
}

/// 期限付きアクセス許可（医師が特定患者の記録を閲覧するための申請）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// 申請ID
    pub id: i64,
    /// 申請した医師
    pub doctor_id: i64,
    /// 対象患者
    pub patient_id: i64,
    /// 状態
    pub status: GrantStatus,
    /// 申請日時
    pub created_at: DateTime<Utc>,
    /// 申請自体の有効期限
    pub expires_at: DateTime<Utc>,
    /// 許可日時
    pub access_granted_at: Option<DateTime<Utc>>,
    /// 閲覧可能期限
    pub access_expires_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// `now`時点で閲覧許可が有効か
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Granted
            && self.access_expires_at.is_some_and(|expires| expires > now)
    }

    /// `now`時点で申請がまだ応答可能か
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Pending && self.expires_at > now
    }
}

/// 医師による記録アクセスの記録（ハッシュチェーン対象外）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAccessLog {
    /// ログID
    pub log_id: i64,
    /// 医師ID
    pub doctor_id: i64,
    /// 記録ID
    pub record_id: i64,
    /// アクセス種別（例: `CreateRecord`, `ReadRecord`）
    pub access_type: String,
    /// アクセス日時
    pub access_date: DateTime<Utc>,
}
