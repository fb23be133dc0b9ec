//! Repository traitパターン定義
//!
//! 台帳と診療データのストレージ操作を抽象化する。
//! 本番実装は[`crate::db::SqliteStore`]、テストでは呼び出し回数の計測や
//! 障害注入のためのラッパーを差し込む。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::common::error::MedResult;
use crate::common::types::{
    AccessGrant, Appointment, Doctor, MedicalRecord, Patient, RecordAccessLog, RecordFields,
};
use crate::ledger::types::{LedgerBlock, PendingAudit};

use super::blocks::RawBlock;

/// リソース変更の結果
///
/// `pending` は変更と同一トランザクションでアウトボックスに書き込まれた監査エントリ。
#[derive(Debug, Clone)]
pub struct Mutated<T> {
    /// 変更後（削除の場合は削除前）のリソース
    pub resource: T,
    /// 台帳への追記待ちエントリ
    pub pending: PendingAudit,
}

// ---------------------------------------------------------------------------
// BlockStore
// ---------------------------------------------------------------------------

/// 台帳ブロックの永続化Repository trait
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// 全ブロックを連番順に読み込む（デコード前の生データ）
    async fn load_blocks_ordered(&self) -> MedResult<Vec<RawBlock>>;
    /// ブロックを1件保存
    async fn persist_block(&self, block: &LedgerBlock) -> MedResult<()>;
    /// ブロックを保存し、対応するアウトボックス行を同一トランザクションで削除
    ///
    /// アウトボックス行が既に解決済み（別の経路で台帳に載った）の場合は何も書かずに
    /// `Ok(false)`を返す。
    async fn persist_block_resolving(
        &self,
        block: &LedgerBlock,
        outbox_id: i64,
    ) -> MedResult<bool>;
    /// 台帳未記録のアウトボックス行をID順に取得
    async fn pending_audits(&self) -> MedResult<Vec<PendingAudit>>;
}

// ---------------------------------------------------------------------------
// ClinicStore
// ---------------------------------------------------------------------------

/// 診療データ（プロファイル・記録・予約・アクセス申請）のRepository trait
#[async_trait]
pub trait ClinicStore: Send + Sync {
    /// ユーザーIDから医師プロファイルを取得
    async fn find_doctor_by_user_id(&self, user_id: i64) -> MedResult<Option<Doctor>>;
    /// ユーザーIDから患者プロファイルを取得
    async fn find_patient_by_user_id(&self, user_id: i64) -> MedResult<Option<Patient>>;
    /// IINから患者プロファイルを取得
    async fn find_patient_by_iin(&self, iin: &str) -> MedResult<Option<Patient>>;

    /// IDで診療記録を取得
    async fn get_record(&self, record_id: i64) -> MedResult<Option<MedicalRecord>>;
    /// 患者の診療記録一覧を取得（新しい順）
    async fn list_records_by_patient(&self, patient_id: i64) -> MedResult<Vec<MedicalRecord>>;
    /// IDで予約を取得
    async fn get_appointment(&self, appointment_id: i64) -> MedResult<Option<Appointment>>;

    /// 医師の予約一覧を取得
    async fn list_appointments_by_doctor(&self, doctor_id: i64) -> MedResult<Vec<Appointment>>;
    /// 患者の予約一覧を取得
    async fn list_appointments_by_patient(&self, patient_id: i64) -> MedResult<Vec<Appointment>>;

    /// IDでアクセス申請を取得
    async fn get_access_request(&self, request_id: i64) -> MedResult<Option<AccessGrant>>;
    /// 閲覧許可を申請
    async fn request_access(&self, doctor_id: i64, patient_id: i64) -> MedResult<AccessGrant>;
    /// 申請先の患者として応答待ちの申請に応答
    async fn respond_access_request(
        &self,
        request_id: i64,
        patient_id: i64,
        granted: bool,
        access_duration: Duration,
    ) -> MedResult<AccessGrant>;
    /// `now`時点で有効な閲覧許可を取得
    async fn find_active_grant(
        &self,
        doctor_id: i64,
        patient_id: i64,
        now: DateTime<Utc>,
    ) -> MedResult<Option<AccessGrant>>;

    /// 診療記録を作成
    async fn create_record(
        &self,
        doctor_id: i64,
        patient_id: i64,
        fields: &RecordFields,
    ) -> MedResult<Mutated<MedicalRecord>>;
    /// 診療記録を更新
    async fn update_record(
        &self,
        record_id: i64,
        fields: &RecordFields,
    ) -> MedResult<Mutated<MedicalRecord>>;
    /// 診療記録を削除
    async fn delete_record(&self, record: &MedicalRecord) -> MedResult<Mutated<MedicalRecord>>;

    /// 予約を作成
    async fn create_appointment(
        &self,
        doctor_id: i64,
        patient_id: i64,
        date: DateTime<Utc>,
    ) -> MedResult<Mutated<Appointment>>;
    /// 予約日時を変更
    async fn reschedule_appointment(
        &self,
        appointment_id: i64,
        date: DateTime<Utc>,
    ) -> MedResult<Mutated<Appointment>>;
    /// 予約を削除（取消）
    async fn delete_appointment(
        &self,
        appointment: &Appointment,
    ) -> MedResult<Mutated<Appointment>>;

    /// 医師による記録アクセスを記録
    async fn insert_access_log(
        &self,
        doctor_id: i64,
        record_id: i64,
        access_type: &str,
    ) -> MedResult<RecordAccessLog>;
}
