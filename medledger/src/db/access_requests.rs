//! アクセス申請（期限付き閲覧許可）のストレージ
//!
//! 医師が患者に閲覧許可を申請し、患者が応答する。許可は`access_expires_at`まで有効。

use crate::access::Entity;
use crate::common::error::{MedError, MedResult};
use crate::common::types::{AccessGrant, GrantStatus};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use super::{format_ts, parse_ts};

/// 申請が応答待ちのまま有効な期間（時間）
pub const REQUEST_TTL_HOURS: i64 = 1;

/// 許可後に閲覧できる既定の期間（分）
pub const DEFAULT_ACCESS_MINUTES: i64 = 30;

#[derive(sqlx::FromRow)]
struct GrantRow {
    id: i64,
    doctor_id: i64,
    patient_id: i64,
    status: String,
    created_at: String,
    expires_at: String,
    access_granted_at: Option<String>,
    access_expires_at: Option<String>,
}

impl TryFrom<GrantRow> for AccessGrant {
    type Error = MedError;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        let status = GrantStatus::parse(&row.status).ok_or_else(|| {
            MedError::StorageFailure(format!("Unknown access request status '{}'", row.status))
        })?;
        Ok(AccessGrant {
            id: row.id,
            doctor_id: row.doctor_id,
            patient_id: row.patient_id,
            status,
            created_at: parse_ts(&row.created_at)?,
            expires_at: parse_ts(&row.expires_at)?,
            access_granted_at: row.access_granted_at.as_deref().map(parse_ts).transpose()?,
            access_expires_at: row.access_expires_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

const SELECT_GRANT: &str = "SELECT id, doctor_id, patient_id, status, created_at, expires_at, access_granted_at, access_expires_at FROM access_requests";

/// IDでアクセス申請を取得
pub async fn get_request(pool: &SqlitePool, id: i64) -> MedResult<Option<AccessGrant>> {
    let row = sqlx::query_as::<_, GrantRow>(&format!("{} WHERE id = ?", SELECT_GRANT))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to get access request: {}", e)))?;

    row.map(AccessGrant::try_from).transpose()
}

/// 医師から患者への閲覧許可を申請
pub async fn request_access(
    pool: &SqlitePool,
    doctor_id: i64,
    patient_id: i64,
) -> MedResult<AccessGrant> {
    let created_at = Utc::now();
    let expires_at = created_at + Duration::hours(REQUEST_TTL_HOURS);

    let id = sqlx::query(
        "INSERT INTO access_requests (doctor_id, patient_id, status, created_at, expires_at)
         VALUES (?, ?, 'pending', ?, ?)",
    )
    .bind(doctor_id)
    .bind(patient_id)
    .bind(format_ts(&created_at))
    .bind(format_ts(&expires_at))
    .execute(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to create access request: {}", e)))?
    .last_insert_rowid();

    Ok(AccessGrant {
        id,
        doctor_id,
        patient_id,
        status: GrantStatus::Pending,
        created_at,
        expires_at,
        access_granted_at: None,
        access_expires_at: None,
    })
}

/// 応答待ちの申請に応答する
///
/// 申請先の患者本人が、申請の有効期限内に応答した場合のみ更新する。
/// 日時は固定幅のRFC 3339（ナノ秒・`Z`）で保存しているため、文字列比較で期限を判定できる。
///
/// # Arguments
/// * `id` - 申請ID
/// * `patient_id` - 応答する患者
/// * `granted` - 許可する場合true
/// * `access_duration` - 許可後に閲覧できる期間
///
/// # Returns
/// * `Ok(AccessGrant)` - 更新後の申請
/// * `Err(MedError::ResourceNotFound)` - 該当する応答待ちの申請が存在しない
pub async fn respond(
    pool: &SqlitePool,
    id: i64,
    patient_id: i64,
    granted: bool,
    access_duration: Duration,
) -> MedResult<AccessGrant> {
    let now = Utc::now();
    let (status, granted_at, access_expires_at) = if granted {
        (
            GrantStatus::Granted,
            Some(format_ts(&now)),
            Some(format_ts(&(now + access_duration))),
        )
    } else {
        (GrantStatus::Rejected, None, None)
    };

    let result = sqlx::query(
        "UPDATE access_requests SET status = ?, access_granted_at = ?, access_expires_at = ?
         WHERE id = ? AND patient_id = ? AND status = 'pending' AND expires_at > ?",
    )
    .bind(status.as_str())
    .bind(granted_at)
    .bind(access_expires_at)
    .bind(id)
    .bind(patient_id)
    .bind(format_ts(&now))
    .execute(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to respond to access request: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(MedError::ResourceNotFound(Entity::AccessRequest));
    }

    get_request(pool, id)
        .await?
        .ok_or(MedError::ResourceNotFound(Entity::AccessRequest))
}

/// `now`時点で有効な閲覧許可を取得
///
/// 日時はTEXTで保存しているため、SQL側では状態のみで絞り込み、期限の比較は解析後に行う。
pub async fn find_active_grant(
    pool: &SqlitePool,
    doctor_id: i64,
    patient_id: i64,
    now: DateTime<Utc>,
) -> MedResult<Option<AccessGrant>> {
    let rows = sqlx::query_as::<_, GrantRow>(&format!(
        "{} WHERE doctor_id = ? AND patient_id = ? AND status = 'granted' ORDER BY id DESC",
        SELECT_GRANT
    ))
    .bind(doctor_id)
    .bind(patient_id)
    .fetch_all(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to look up access grant: {}", e)))?;

    for row in rows {
        let grant = AccessGrant::try_from(row)?;
        if grant.is_active_at(now) {
            return Ok(Some(grant));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{seed_doctor, seed_patient, test_db_pool};

    #[tokio::test]
    async fn test_pending_request_is_not_active() {
        let pool = test_db_pool().await;
        let doctor = seed_doctor(&pool, "900101300001").await;
        let patient = seed_patient(&pool, "010101500001").await;

        let request = request_access(&pool, doctor.doctor_id, patient.patient_id)
            .await
            .unwrap();
        assert_eq!(request.status, GrantStatus::Pending);
        assert!(
            find_active_grant(&pool, doctor.doctor_id, patient.patient_id, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_granted_request_active_until_expiry() {
        let pool = test_db_pool().await;
        let doctor = seed_doctor(&pool, "900101300001").await;
        let patient = seed_patient(&pool, "010101500001").await;
        let request = request_access(&pool, doctor.doctor_id, patient.patient_id)
            .await
            .unwrap();

        let granted = respond(
            &pool,
            request.id,
            patient.patient_id,
            true,
            Duration::hours(2),
        )
        .await
        .unwrap();
        assert_eq!(granted.status, GrantStatus::Granted);

        let now = Utc::now();
        let active = find_active_grant(&pool, doctor.doctor_id, patient.patient_id, now)
            .await
            .unwrap();
        assert_eq!(active.map(|g| g.id), Some(request.id));

        let later = now + Duration::hours(3);
        assert!(
            find_active_grant(&pool, doctor.doctor_id, patient.patient_id, later)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rejected_and_double_response() {
        let pool = test_db_pool().await;
        let doctor = seed_doctor(&pool, "900101300001").await;
        let patient = seed_patient(&pool, "010101500001").await;
        let request = request_access(&pool, doctor.doctor_id, patient.patient_id)
            .await
            .unwrap();

        let rejected = respond(
            &pool,
            request.id,
            patient.patient_id,
            false,
            Duration::hours(1),
        )
        .await
        .unwrap();
        assert_eq!(rejected.status, GrantStatus::Rejected);
        assert!(rejected.access_expires_at.is_none());

        let again = respond(
            &pool,
            request.id,
            patient.patient_id,
            true,
            Duration::hours(1),
        )
        .await;
        assert!(matches!(again, Err(MedError::ResourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_grant_is_scoped_to_pair() {
        let pool = test_db_pool().await;
        let doctor = seed_doctor(&pool, "900101300001").await;
        let other = seed_doctor(&pool, "900101300002").await;
        let patient = seed_patient(&pool, "010101500001").await;
        let request = request_access(&pool, doctor.doctor_id, patient.patient_id)
            .await
            .unwrap();
        respond(&pool, request.id, patient.patient_id, true, Duration::hours(1))
            .await
            .unwrap();

        assert!(
            find_active_grant(&pool, other.doctor_id, patient.patient_id, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_expired_request_cannot_be_granted() {
        let pool = test_db_pool().await;
        let doctor = seed_doctor(&pool, "900101300001").await;
        let patient = seed_patient(&pool, "010101500001").await;
        let request = request_access(&pool, doctor.doctor_id, patient.patient_id)
            .await
            .unwrap();

        // 申請を2時間前に作成されたことにする
        let created_at = Utc::now() - Duration::hours(2);
        sqlx::query("UPDATE access_requests SET created_at = ?, expires_at = ? WHERE id = ?")
            .bind(format_ts(&created_at))
            .bind(format_ts(&(created_at + Duration::hours(REQUEST_TTL_HOURS))))
            .bind(request.id)
            .execute(&pool)
            .await
            .unwrap();

        let result = respond(
            &pool,
            request.id,
            patient.patient_id,
            true,
            Duration::hours(1),
        )
        .await;
        assert!(matches!(
            result,
            Err(MedError::ResourceNotFound(Entity::AccessRequest))
        ));
        assert!(
            find_active_grant(&pool, doctor.doctor_id, patient.patient_id, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
        let stored = get_request(&pool, request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GrantStatus::Pending);
    }

    #[tokio::test]
    async fn test_other_patient_cannot_respond() {
        let pool = test_db_pool().await;
        let doctor = seed_doctor(&pool, "900101300001").await;
        let patient = seed_patient(&pool, "010101500001").await;
        let stranger = seed_patient(&pool, "020202500002").await;
        let request = request_access(&pool, doctor.doctor_id, patient.patient_id)
            .await
            .unwrap();

        let result = respond(
            &pool,
            request.id,
            stranger.patient_id,
            true,
            Duration::hours(1),
        )
        .await;
        assert!(matches!(
            result,
            Err(MedError::ResourceNotFound(Entity::AccessRequest))
        ));
        assert!(
            find_active_grant(&pool, doctor.doctor_id, patient.patient_id, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }
}
