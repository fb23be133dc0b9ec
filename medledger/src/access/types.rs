//! アクセス判定の型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::types::{AccessGrant, Appointment, Doctor, MedicalRecord, Patient};

/// 判定対象の操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// 診療記録の作成
    CreateRecord,
    /// 診療記録の更新
    UpdateRecord,
    /// 診療記録の削除
    DeleteRecord,
    /// 患者本人による記録閲覧
    ReadOwnRecords,
    /// 医師による患者記録の閲覧
    ReadRecordsByPatient,
    /// 予約の作成
    CreateAppointment,
    /// 予約日時の変更
    RescheduleAppointment,
    /// 予約の取消
    CancelAppointment,
    /// 自分の予約一覧（医師は担当分、患者は本人分）
    ReadOwnAppointments,
    /// 医師から患者への閲覧許可申請
    RequestAccess,
    /// 患者による閲覧許可申請への応答
    RespondAccessRequest,
}

impl Operation {
    /// 操作名
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRecord => "create_record",
            Self::UpdateRecord => "update_record",
            Self::DeleteRecord => "delete_record",
            Self::ReadOwnRecords => "read_own_records",
            Self::ReadRecordsByPatient => "read_records_by_patient",
            Self::CreateAppointment => "create_appointment",
            Self::RescheduleAppointment => "reschedule_appointment",
            Self::CancelAppointment => "cancel_appointment",
            Self::ReadOwnAppointments => "read_own_appointments",
            Self::RequestAccess => "request_access",
            Self::RespondAccessRequest => "respond_access_request",
        }
    }
}

/// プロファイル解決済みのアクター
///
/// ロールは認証済みだが、プロファイルが存在しない場合は`None`を保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessSubject {
    /// 医師ロール
    Doctor(Option<Doctor>),
    /// 患者ロール
    Patient(Option<Patient>),
}

/// 操作対象（ストアから読み出した値）
#[derive(Debug, Clone, Copy, Default)]
pub struct Target<'a> {
    /// 対象患者
    pub patient: Option<&'a Patient>,
    /// 対象の診療記録
    pub record: Option<&'a MedicalRecord>,
    /// 対象の予約
    pub appointment: Option<&'a Appointment>,
    /// 医師・患者間の閲覧許可（応答時は対象の申請）
    pub grant: Option<&'a AccessGrant>,
    /// 新しい予約日時
    pub date: Option<DateTime<Utc>>,
}

impl<'a> Target<'a> {
    /// 患者を対象とする
    pub fn patient(patient: Option<&'a Patient>) -> Self {
        Self {
            patient,
            ..Self::default()
        }
    }

    /// 診療記録を対象とする
    pub fn record(record: Option<&'a MedicalRecord>) -> Self {
        Self {
            record,
            ..Self::default()
        }
    }

    /// 予約を対象とする
    pub fn appointment(appointment: Option<&'a Appointment>) -> Self {
        Self {
            appointment,
            ..Self::default()
        }
    }

    /// アクセス申請を対象とする
    pub fn request(request: Option<&'a AccessGrant>) -> Self {
        Self {
            grant: request,
            ..Self::default()
        }
    }

    /// 閲覧許可を付与
    pub fn with_grant(mut self, grant: Option<&'a AccessGrant>) -> Self {
        self.grant = grant;
        self
    }

    /// 予約日時を付与
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }
}

/// 拒否理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// 医師ロールではない
    NotADoctor,
    /// 患者ロールではない
    NotAPatient,
    /// リソースの所有者（作成した医師）ではない
    NotOwner,
    /// 有効な閲覧許可がない
    NoActiveGrant,
    /// 指定日時が未来ではない
    DateNotInFuture,
    /// 予約日時を過ぎている
    AppointmentInPast,
    /// 別の患者宛てのアクセス申請
    NotAddressee,
    /// 応答待ちでない、または期限切れのアクセス申請
    RequestClosed,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::NotADoctor => "only doctors can perform this operation",
            Self::NotAPatient => "only patients can perform this operation",
            Self::NotOwner => "resource belongs to another doctor",
            Self::NoActiveGrant => "no active access grant for this patient",
            Self::DateNotInFuture => "date must be in the future",
            Self::AppointmentInPast => "appointment date has already passed",
            Self::NotAddressee => "access request is addressed to another patient",
            Self::RequestClosed => "access request is no longer pending",
        };
        f.write_str(message)
    }
}

/// 見つからなかったエンティティ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    /// 医師プロファイル
    Doctor,
    /// 患者プロファイル
    Patient,
    /// 診療記録
    Record,
    /// 予約
    Appointment,
    /// アクセス申請
    AccessRequest,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Doctor => "doctor",
            Self::Patient => "patient",
            Self::Record => "record",
            Self::Appointment => "appointment",
            Self::AccessRequest => "access request",
        })
    }
}

/// 判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 許可
    Allowed,
    /// 拒否
    Denied(DenyReason),
    /// 参照先が存在しない
    NotFound(Entity),
}

impl Decision {
    /// 許可されたか
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// 医師による患者記録閲覧のポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorReadPolicy {
    /// 医師であれば閲覧可
    #[default]
    Open,
    /// 患者が許可した有効期限内の申請が必要
    RequireGrant,
}

impl DoctorReadPolicy {
    /// 文字列から変換（`open` / `require_grant`）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "require_grant" | "require-grant" => Some(Self::RequireGrant),
            _ => None,
        }
    }

    /// 文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::RequireGrant => "require_grant",
        }
    }
}

/// アクセスポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// 医師による患者記録閲覧のポリシー
    pub doctor_read: DoctorReadPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_display_is_lowercase() {
        assert_eq!(Entity::Record.to_string(), "record");
        assert_eq!(Entity::AccessRequest.to_string(), "access request");
    }

    #[test]
    fn test_doctor_read_policy_parse() {
        assert_eq!(DoctorReadPolicy::parse("open"), Some(DoctorReadPolicy::Open));
        assert_eq!(
            DoctorReadPolicy::parse(" REQUIRE_GRANT "),
            Some(DoctorReadPolicy::RequireGrant)
        );
        assert_eq!(DoctorReadPolicy::parse("strict"), None);
        assert_eq!(DoctorReadPolicy::default(), DoctorReadPolicy::Open);
    }
}
