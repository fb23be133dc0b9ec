// 予約のストレージ

use crate::common::error::{MedError, MedResult};
use crate::common::types::Appointment;
use crate::db::blocks::insert_pending;
use crate::db::traits::Mutated;
use crate::ledger::types::{AuditAction, PendingAudit, ResourceKind};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::{format_ts, parse_ts};

fn row_to_appointment(row: (i64, i64, i64, String)) -> MedResult<Appointment> {
    let (id, doctor_id, patient_id, date) = row;
    Ok(Appointment {
        id,
        doctor_id,
        patient_id,
        date: parse_ts(&date)?,
    })
}

/// IDで予約を取得
pub async fn get_appointment(pool: &SqlitePool, id: i64) -> MedResult<Option<Appointment>> {
    let row = sqlx::query_as::<_, (i64, i64, i64, String)>(
        "SELECT id, doctor_id, patient_id, date FROM appointments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to get appointment: {}", e)))?;

    row.map(row_to_appointment).transpose()
}

/// 医師の予約一覧を取得（日時順）
pub async fn list_by_doctor(pool: &SqlitePool, doctor_id: i64) -> MedResult<Vec<Appointment>> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, String)>(
        "SELECT id, doctor_id, patient_id, date FROM appointments WHERE doctor_id = ? ORDER BY date ASC, id ASC",
    )
    .bind(doctor_id)
    .fetch_all(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to list appointments: {}", e)))?;

    rows.into_iter().map(row_to_appointment).collect()
}

/// 患者の予約一覧を取得（日時順）
pub async fn list_by_patient(pool: &SqlitePool, patient_id: i64) -> MedResult<Vec<Appointment>> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, String)>(
        "SELECT id, doctor_id, patient_id, date FROM appointments WHERE patient_id = ? ORDER BY date ASC, id ASC",
    )
    .bind(patient_id)
    .fetch_all(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to list appointments: {}", e)))?;

    rows.into_iter().map(row_to_appointment).collect()
}

async fn enqueue(
    conn: &mut SqliteConnection,
    action: AuditAction,
    appointment: &Appointment,
) -> MedResult<PendingAudit> {
    let details = serde_json::to_string(appointment)?;
    insert_pending(
        conn,
        action,
        ResourceKind::Appointment,
        appointment.id,
        appointment.doctor_id,
        appointment.patient_id,
        details,
    )
    .await
}

async fn begin(pool: &SqlitePool) -> MedResult<sqlx::Transaction<'static, sqlx::Sqlite>> {
    pool.begin()
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to begin transaction: {}", e)))
}

fn commit_failed(e: sqlx::Error) -> MedError {
    MedError::StorageFailure(format!("Failed to commit appointment change: {}", e))
}

/// 予約を作成
pub async fn create(
    pool: &SqlitePool,
    doctor_id: i64,
    patient_id: i64,
    date: DateTime<Utc>,
) -> MedResult<Mutated<Appointment>> {
    let mut tx = begin(pool).await?;

    let id = sqlx::query("INSERT INTO appointments (doctor_id, patient_id, date) VALUES (?, ?, ?)")
        .bind(doctor_id)
        .bind(patient_id)
        .bind(format_ts(&date))
        .execute(&mut *tx)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to create appointment: {}", e)))?
        .last_insert_rowid();

    let appointment = Appointment {
        id,
        doctor_id,
        patient_id,
        date,
    };
    let pending = enqueue(&mut tx, AuditAction::Create, &appointment).await?;

    tx.commit().await.map_err(commit_failed)?;
    Ok(Mutated {
        resource: appointment,
        pending,
    })
}

/// 予約日時を変更
pub async fn reschedule(
    pool: &SqlitePool,
    id: i64,
    date: DateTime<Utc>,
) -> MedResult<Mutated<Appointment>> {
    let mut tx = begin(pool).await?;

    let row = sqlx::query_as::<_, (i64, i64, i64, String)>(
        "UPDATE appointments SET date = ? WHERE id = ? RETURNING id, doctor_id, patient_id, date",
    )
    .bind(format_ts(&date))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to reschedule appointment: {}", e)))?
    .ok_or(MedError::ResourceNotFound(crate::access::Entity::Appointment))?;

    let appointment = row_to_appointment(row)?;
    let pending = enqueue(&mut tx, AuditAction::Update, &appointment).await?;

    tx.commit().await.map_err(commit_failed)?;
    Ok(Mutated {
        resource: appointment,
        pending,
    })
}

/// 予約を削除（取消）
pub async fn delete(pool: &SqlitePool, appointment: &Appointment) -> MedResult<Mutated<Appointment>> {
    let mut tx = begin(pool).await?;

    let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(appointment.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to cancel appointment: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(MedError::ResourceNotFound(
            crate::access::Entity::Appointment,
        ));
    }

    let pending = enqueue(&mut tx, AuditAction::Delete, appointment).await?;

    tx.commit().await.map_err(commit_failed)?;
    Ok(Mutated {
        resource: appointment.clone(),
        pending,
    })
}
