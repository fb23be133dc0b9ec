//! `BlockStore` / `ClinicStore` のSQLite実装

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::common::error::{MedError, MedResult};
use crate::common::types::{
    AccessGrant, Appointment, Doctor, MedicalRecord, Patient, RecordAccessLog, RecordFields,
};
use crate::ledger::types::{LedgerBlock, PendingAudit};

use super::blocks::{self, RawBlock};
use super::traits::{BlockStore, ClinicStore, Mutated};
use super::{access_requests, appointments, profiles, records};

/// SQLiteプールを保持するストア
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 初期化済みプールからストアを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 内部のプール
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl BlockStore for SqliteStore {
    async fn load_blocks_ordered(&self) -> MedResult<Vec<RawBlock>> {
        blocks::load_blocks_ordered(&self.pool).await
    }

    async fn persist_block(&self, block: &LedgerBlock) -> MedResult<()> {
        let mut conn =
            self.pool.acquire().await.map_err(|e| {
                MedError::StorageFailure(format!("Failed to acquire connection: {}", e))
            })?;
        blocks::insert_block(&mut conn, block).await
    }

    async fn persist_block_resolving(
        &self,
        block: &LedgerBlock,
        outbox_id: i64,
    ) -> MedResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MedError::StorageFailure(format!("Failed to begin transaction: {}", e)))?;

        if !blocks::delete_pending(&mut tx, outbox_id).await? {
            // 未コミットのトランザクションはDropでロールバックされる
            return Ok(false);
        }
        blocks::insert_block(&mut tx, block).await?;

        tx.commit().await.map_err(|e| {
            MedError::StorageFailure(format!("Failed to commit block {}: {}", block.index, e))
        })?;
        Ok(true)
    }

    async fn pending_audits(&self) -> MedResult<Vec<PendingAudit>> {
        blocks::list_pending(&self.pool).await
    }
}

#[async_trait]
impl ClinicStore for SqliteStore {
    async fn find_doctor_by_user_id(&self, user_id: i64) -> MedResult<Option<Doctor>> {
        profiles::find_doctor_by_user_id(&self.pool, user_id).await
    }

    async fn find_patient_by_user_id(&self, user_id: i64) -> MedResult<Option<Patient>> {
        profiles::find_patient_by_user_id(&self.pool, user_id).await
    }

    async fn find_patient_by_iin(&self, iin: &str) -> MedResult<Option<Patient>> {
        profiles::find_patient_by_iin(&self.pool, iin).await
    }

    async fn get_record(&self, record_id: i64) -> MedResult<Option<MedicalRecord>> {
        records::get_record(&self.pool, record_id).await
    }

    async fn list_records_by_patient(&self, patient_id: i64) -> MedResult<Vec<MedicalRecord>> {
        records::list_by_patient(&self.pool, patient_id).await
    }

    async fn get_appointment(&self, appointment_id: i64) -> MedResult<Option<Appointment>> {
        appointments::get_appointment(&self.pool, appointment_id).await
    }

    async fn list_appointments_by_doctor(&self, doctor_id: i64) -> MedResult<Vec<Appointment>> {
        appointments::list_by_doctor(&self.pool, doctor_id).await
    }

    async fn list_appointments_by_patient(&self, patient_id: i64) -> MedResult<Vec<Appointment>> {
        appointments::list_by_patient(&self.pool, patient_id).await
    }

    async fn get_access_request(&self, request_id: i64) -> MedResult<Option<AccessGrant>> {
        access_requests::get_request(&self.pool, request_id).await
    }

    async fn request_access(&self, doctor_id: i64, patient_id: i64) -> MedResult<AccessGrant> {
        access_requests::request_access(&self.pool, doctor_id, patient_id).await
    }

    async fn respond_access_request(
        &self,
        request_id: i64,
        patient_id: i64,
        granted: bool,
        access_duration: Duration,
    ) -> MedResult<AccessGrant> {
        access_requests::respond(&self.pool, request_id, patient_id, granted, access_duration).await
    }

    async fn find_active_grant(
        &self,
        doctor_id: i64,
        patient_id: i64,
        now: DateTime<Utc>,
    ) -> MedResult<Option<AccessGrant>> {
        access_requests::find_active_grant(&self.pool, doctor_id, patient_id, now).await
    }

    async fn create_record(
        &self,
        doctor_id: i64,
        patient_id: i64,
        fields: &RecordFields,
    ) -> MedResult<Mutated<MedicalRecord>> {
        records::create(&self.pool, doctor_id, patient_id, fields).await
    }

    async fn update_record(
        &self,
        record_id: i64,
        fields: &RecordFields,
    ) -> MedResult<Mutated<MedicalRecord>> {
        records::update(&self.pool, record_id, fields).await
    }

    async fn delete_record(&self, record: &MedicalRecord) -> MedResult<Mutated<MedicalRecord>> {
        records::delete(&self.pool, record).await
    }

    async fn create_appointment(
        &self,
        doctor_id: i64,
        patient_id: i64,
        date: DateTime<Utc>,
    ) -> MedResult<Mutated<Appointment>> {
        appointments::create(&self.pool, doctor_id, patient_id, date).await
    }

    async fn reschedule_appointment(
        &self,
        appointment_id: i64,
        date: DateTime<Utc>,
    ) -> MedResult<Mutated<Appointment>> {
        appointments::reschedule(&self.pool, appointment_id, date).await
    }

    async fn delete_appointment(
        &self,
        appointment: &Appointment,
    ) -> MedResult<Mutated<Appointment>> {
        appointments::delete(&self.pool, appointment).await
    }

    async fn insert_access_log(
        &self,
        doctor_id: i64,
        record_id: i64,
        access_type: &str,
    ) -> MedResult<RecordAccessLog> {
        records::insert_access_log(&self.pool, doctor_id, record_id, access_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db_pool;
    use crate::ledger::hash_chain::{compute_hash, genesis_block};
    use crate::ledger::types::{AuditAction, ResourceKind, Transaction};

    #[tokio::test]
    async fn test_persist_block_resolving_is_atomic() {
        let store = SqliteStore::new(test_db_pool().await);
        let genesis = genesis_block(Utc::now()).unwrap();
        store.persist_block(&genesis).await.unwrap();

        let mut conn = store.pool().acquire().await.unwrap();
        let pending = blocks::insert_pending(
            &mut conn,
            AuditAction::Create,
            ResourceKind::Record,
            1,
            2,
            3,
            "{}".to_string(),
        )
        .await
        .unwrap();
        drop(conn);

        let ts = Utc::now();
        let tx = Some(Transaction {
            action: AuditAction::Create,
            resource: ResourceKind::Record,
            record_id: 1,
            doctor_id: 2,
            patient_id: 3,
            timestamp: ts,
            details: "{}".to_string(),
        });
        let hash = compute_hash(1, &ts, &tx, &genesis.hash).unwrap();
        let block = LedgerBlock {
            index: 1,
            timestamp: ts,
            transaction: tx,
            previous_hash: genesis.hash.clone(),
            hash,
        };

        // 解決済み（存在しない）アウトボックス行を指定するとブロックも残らない
        assert!(!store
            .persist_block_resolving(&block, pending.id + 100)
            .await
            .unwrap());
        assert_eq!(store.load_blocks_ordered().await.unwrap().len(), 1);

        assert!(store
            .persist_block_resolving(&block, pending.id)
            .await
            .unwrap());
        assert_eq!(store.load_blocks_ordered().await.unwrap().len(), 2);
        assert!(store.pending_audits().await.unwrap().is_empty());

        // 同じ行をもう一度解決しても重複ブロックは書かない
        assert!(!store
            .persist_block_resolving(&block, pending.id)
            .await
            .unwrap());
        assert_eq!(store.load_blocks_ordered().await.unwrap().len(), 2);
    }
}
