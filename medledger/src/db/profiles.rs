// 医師・患者プロファイルの参照
//
// 利用者登録そのもの（パスワード・OTP等）はこのクレートの範囲外。
// ここではアクセス判定に必要なプロファイル解決と、登録済みプロファイルの作成のみ扱う。

use crate::common::error::{MedError, MedResult};
use crate::common::types::{Doctor, Patient};
use sqlx::SqlitePool;

/// ユーザーIDから医師プロファイルを取得
pub async fn find_doctor_by_user_id(pool: &SqlitePool, user_id: i64) -> MedResult<Option<Doctor>> {
    let row = sqlx::query_as::<_, (i64, i64, String)>(
        "SELECT doctor_id, user_id, specialization FROM doctors WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to find doctor: {}", e)))?;

    Ok(row.map(|(doctor_id, user_id, specialization)| Doctor {
        doctor_id,
        user_id,
        specialization,
    }))
}

#[derive(sqlx::FromRow)]
struct PatientRow {
    patient_id: i64,
    user_id: i64,
    iin: String,
    date_of_birth: String,
}

impl From<PatientRow> for Patient {
    fn from(row: PatientRow) -> Self {
        Patient {
            patient_id: row.patient_id,
            user_id: row.user_id,
            iin: row.iin,
            date_of_birth: row.date_of_birth,
        }
    }
}

/// ユーザーIDから患者プロファイルを取得
pub async fn find_patient_by_user_id(
    pool: &SqlitePool,
    user_id: i64,
) -> MedResult<Option<Patient>> {
    let row = sqlx::query_as::<_, PatientRow>(
        "SELECT p.patient_id, p.user_id, u.iin, p.date_of_birth
         FROM patients p JOIN users u ON u.user_id = p.user_id
         WHERE p.user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to find patient: {}", e)))?;

    Ok(row.map(Patient::from))
}

/// IINから患者プロファイルを取得
pub async fn find_patient_by_iin(pool: &SqlitePool, iin: &str) -> MedResult<Option<Patient>> {
    let row = sqlx::query_as::<_, PatientRow>(
        "SELECT p.patient_id, p.user_id, u.iin, p.date_of_birth
         FROM patients p JOIN users u ON u.user_id = p.user_id
         WHERE u.iin = ?",
    )
    .bind(iin)
    .fetch_optional(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to find patient by IIN: {}", e)))?;

    Ok(row.map(Patient::from))
}

async fn insert_user(
    conn: &mut sqlx::SqliteConnection,
    iin: &str,
    first_name: &str,
    last_name: &str,
    role: &str,
) -> MedResult<i64> {
    let result = sqlx::query("INSERT INTO users (first_name, last_name, iin, role) VALUES (?, ?, ?, ?)")
        .bind(first_name)
        .bind(last_name)
        .bind(iin)
        .bind(role)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                MedError::StorageFailure(format!("IIN '{}' already registered", iin))
            } else {
                MedError::StorageFailure(format!("Failed to create user: {}", e))
            }
        })?;
    Ok(result.last_insert_rowid())
}

/// 医師ユーザーとプロファイルを登録
pub async fn register_doctor(
    pool: &SqlitePool,
    iin: &str,
    first_name: &str,
    last_name: &str,
    specialization: &str,
) -> MedResult<Doctor> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to begin transaction: {}", e)))?;

    let user_id = insert_user(&mut tx, iin, first_name, last_name, "doctor").await?;
    let doctor_id = sqlx::query("INSERT INTO doctors (user_id, specialization) VALUES (?, ?)")
        .bind(user_id)
        .bind(specialization)
        .execute(&mut *tx)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to create doctor: {}", e)))?
        .last_insert_rowid();

    tx.commit()
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to commit doctor: {}", e)))?;

    Ok(Doctor {
        doctor_id,
        user_id,
        specialization: specialization.to_string(),
    })
}

/// 患者ユーザーとプロファイルを登録
pub async fn register_patient(
    pool: &SqlitePool,
    iin: &str,
    first_name: &str,
    last_name: &str,
    date_of_birth: &str,
) -> MedResult<Patient> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to begin transaction: {}", e)))?;

    let user_id = insert_user(&mut tx, iin, first_name, last_name, "patient").await?;
    let patient_id = sqlx::query("INSERT INTO patients (user_id, date_of_birth) VALUES (?, ?)")
        .bind(user_id)
        .bind(date_of_birth)
        .execute(&mut *tx)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to create patient: {}", e)))?
        .last_insert_rowid();

    tx.commit()
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to commit patient: {}", e)))?;

    Ok(Patient {
        patient_id,
        user_id,
        iin: iin.to_string(),
        date_of_birth: date_of_birth.to_string(),
    })
}
