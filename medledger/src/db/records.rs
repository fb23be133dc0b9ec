//! 診療記録のストレージ
//!
//! 変更系の関数はリソースの書き込みとアウトボックスへの監査エントリ追加を
//! 1つのトランザクションで行う。

use crate::common::error::{MedError, MedResult};
use crate::common::types::{MedicalRecord, RecordAccessLog, RecordFields};
use crate::db::blocks::insert_pending;
use crate::db::traits::Mutated;
use crate::ledger::types::{AuditAction, ResourceKind};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::{format_ts, parse_ts};

#[derive(sqlx::FromRow)]
struct RecordRow {
    record_id: i64,
    patient_id: i64,
    doctor_id: i64,
    diagnosis: String,
    treatment_plan: String,
    test_result: String,
    created_at: String,
}

impl TryFrom<RecordRow> for MedicalRecord {
    type Error = MedError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(MedicalRecord {
            record_id: row.record_id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            diagnosis: row.diagnosis,
            treatment_plan: row.treatment_plan,
            test_result: row.test_result,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

const SELECT_RECORD: &str = "SELECT record_id, patient_id, doctor_id, diagnosis, treatment_plan, test_result, created_at FROM medical_records";

/// IDで診療記録を取得
pub async fn get_record(pool: &SqlitePool, record_id: i64) -> MedResult<Option<MedicalRecord>> {
    let row = sqlx::query_as::<_, RecordRow>(&format!("{} WHERE record_id = ?", SELECT_RECORD))
        .bind(record_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to get record: {}", e)))?;

    row.map(MedicalRecord::try_from).transpose()
}

async fn get_record_in(
    conn: &mut SqliteConnection,
    record_id: i64,
) -> MedResult<Option<MedicalRecord>> {
    let row = sqlx::query_as::<_, RecordRow>(&format!("{} WHERE record_id = ?", SELECT_RECORD))
        .bind(record_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to get record: {}", e)))?;

    row.map(MedicalRecord::try_from).transpose()
}

/// 患者の診療記録一覧を取得（新しい順）
pub async fn list_by_patient(pool: &SqlitePool, patient_id: i64) -> MedResult<Vec<MedicalRecord>> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "{} WHERE patient_id = ? ORDER BY created_at DESC, record_id DESC",
        SELECT_RECORD
    ))
    .bind(patient_id)
    .fetch_all(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to list records: {}", e)))?;

    rows.into_iter().map(MedicalRecord::try_from).collect()
}

fn begin_failed(e: sqlx::Error) -> MedError {
    MedError::StorageFailure(format!("Failed to begin transaction: {}", e))
}

fn commit_failed(e: sqlx::Error) -> MedError {
    MedError::StorageFailure(format!("Failed to commit record change: {}", e))
}

async fn enqueue(
    conn: &mut SqliteConnection,
    action: AuditAction,
    record: &MedicalRecord,
) -> MedResult<crate::ledger::types::PendingAudit> {
    let details = serde_json::to_string(record)?;
    insert_pending(
        conn,
        action,
        ResourceKind::Record,
        record.record_id,
        record.doctor_id,
        record.patient_id,
        details,
    )
    .await
}

/// 診療記録を作成
pub async fn create(
    pool: &SqlitePool,
    doctor_id: i64,
    patient_id: i64,
    fields: &RecordFields,
) -> MedResult<Mutated<MedicalRecord>> {
    let created_at = Utc::now();
    let mut tx = pool.begin().await.map_err(begin_failed)?;

    let record_id = sqlx::query(
        "INSERT INTO medical_records (patient_id, doctor_id, diagnosis, treatment_plan, test_result, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(patient_id)
    .bind(doctor_id)
    .bind(&fields.diagnosis)
    .bind(&fields.treatment_plan)
    .bind(&fields.test_result)
    .bind(format_ts(&created_at))
    .execute(&mut *tx)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to create record: {}", e)))?
    .last_insert_rowid();

    let record = MedicalRecord {
        record_id,
        patient_id,
        doctor_id,
        diagnosis: fields.diagnosis.clone(),
        treatment_plan: fields.treatment_plan.clone(),
        test_result: fields.test_result.clone(),
        created_at,
    };
    let pending = enqueue(&mut tx, AuditAction::Create, &record).await?;

    tx.commit().await.map_err(commit_failed)?;
    Ok(Mutated {
        resource: record,
        pending,
    })
}

/// 診療記録の可変フィールドを更新
pub async fn update(
    pool: &SqlitePool,
    record_id: i64,
    fields: &RecordFields,
) -> MedResult<Mutated<MedicalRecord>> {
    let mut tx = pool.begin().await.map_err(begin_failed)?;

    let result = sqlx::query(
        "UPDATE medical_records SET diagnosis = ?, treatment_plan = ?, test_result = ? WHERE record_id = ?",
    )
    .bind(&fields.diagnosis)
    .bind(&fields.treatment_plan)
    .bind(&fields.test_result)
    .bind(record_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to update record: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(MedError::ResourceNotFound(crate::access::Entity::Record));
    }

    // 監査スナップショットは保存後の状態を読み直して作る
    let record = get_record_in(&mut tx, record_id)
        .await?
        .ok_or(MedError::ResourceNotFound(crate::access::Entity::Record))?;
    let pending = enqueue(&mut tx, AuditAction::Update, &record).await?;

    tx.commit().await.map_err(commit_failed)?;
    Ok(Mutated {
        resource: record,
        pending,
    })
}

/// 診療記録を削除（スナップショットは削除前の状態）
pub async fn delete(pool: &SqlitePool, record: &MedicalRecord) -> MedResult<Mutated<MedicalRecord>> {
    let mut tx = pool.begin().await.map_err(begin_failed)?;

    let result = sqlx::query("DELETE FROM medical_records WHERE record_id = ?")
        .bind(record.record_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to delete record: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(MedError::ResourceNotFound(crate::access::Entity::Record));
    }

    let pending = enqueue(&mut tx, AuditAction::Delete, record).await?;

    tx.commit().await.map_err(commit_failed)?;
    Ok(Mutated {
        resource: record.clone(),
        pending,
    })
}

/// 医師による記録アクセスを記録
pub async fn insert_access_log(
    pool: &SqlitePool,
    doctor_id: i64,
    record_id: i64,
    access_type: &str,
) -> MedResult<RecordAccessLog> {
    let access_date = Utc::now();
    let log_id = sqlx::query(
        "INSERT INTO access_log (doctor_id, record_id, access_type, access_date) VALUES (?, ?, ?, ?)",
    )
    .bind(doctor_id)
    .bind(record_id)
    .bind(access_type)
    .bind(format_ts(&access_date))
    .execute(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to write access log: {}", e)))?
    .last_insert_rowid();

    Ok(RecordAccessLog {
        log_id,
        doctor_id,
        record_id,
        access_type: access_type.to_string(),
        access_date,
    })
}

/// 記録のアクセスログを取得（古い順）
pub async fn list_access_logs(pool: &SqlitePool, record_id: i64) -> MedResult<Vec<RecordAccessLog>> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, String, String)>(
        "SELECT log_id, doctor_id, record_id, access_type, access_date
         FROM access_log WHERE record_id = ? ORDER BY log_id ASC",
    )
    .bind(record_id)
    .fetch_all(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to list access logs: {}", e)))?;

    rows.into_iter()
        .map(|(log_id, doctor_id, record_id, access_type, access_date)| {
            Ok(RecordAccessLog {
                log_id,
                doctor_id,
                record_id,
                access_type,
                access_date: parse_ts(&access_date)?,
            })
        })
        .collect()
}
