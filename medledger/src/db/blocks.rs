//! 台帳ブロックとアウトボックスのストレージ
//!
//! `ledger_blocks` は追記専用。UPDATE / DELETE を発行する関数は持たない。

use crate::common::error::{MedError, MedResult};
use crate::ledger::types::{AuditAction, LedgerBlock, PendingAudit, ResourceKind, Transaction};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::{format_ts, parse_ts};

/// `ledger_blocks` の1行（デコード前）
///
/// 連番とハッシュは行が壊れていても読めるため、台帳の先端（tip）の算出に使う。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawBlock {
    /// ブロック連番
    pub block_index: i64,
    /// 作成日時（RFC3339）
    pub timestamp: String,
    /// ペイロードJSON（ジェネシスはNULL）
    pub transaction_json: Option<String>,
    /// 直前ブロックのハッシュ
    pub previous_hash: String,
    /// このブロックのハッシュ
    pub hash: String,
}

impl RawBlock {
    /// 行を`LedgerBlock`にデコード
    pub fn decode(&self) -> MedResult<LedgerBlock> {
        let index = u64::try_from(self.block_index).map_err(|_| {
            MedError::StorageFailure(format!("Negative block index {}", self.block_index))
        })?;
        let timestamp = parse_ts(&self.timestamp)?;
        let transaction = match self.transaction_json.as_deref() {
            Some(json) => Some(serde_json::from_str::<Transaction>(json)?),
            None => None,
        };
        Ok(LedgerBlock {
            index,
            timestamp,
            transaction,
            previous_hash: self.previous_hash.clone(),
            hash: self.hash.clone(),
        })
    }
}

/// 全ブロックを連番順に取得
pub async fn load_blocks_ordered(pool: &SqlitePool) -> MedResult<Vec<RawBlock>> {
    sqlx::query_as::<_, RawBlock>(
        "SELECT block_index, timestamp, transaction_json, previous_hash, hash
         FROM ledger_blocks ORDER BY block_index ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to load ledger blocks: {}", e)))
}

/// ブロックを1件挿入
///
/// 連番は主キーのため、同じ連番での二重書き込みはここで失敗する。
pub async fn insert_block(conn: &mut SqliteConnection, block: &LedgerBlock) -> MedResult<()> {
    let transaction_json = match &block.transaction {
        Some(tx) => Some(serde_json::to_string(tx)?),
        None => None,
    };
    let index = i64::try_from(block.index)
        .map_err(|_| MedError::StorageFailure(format!("Block index {} overflows", block.index)))?;

    sqlx::query(
        "INSERT INTO ledger_blocks (block_index, timestamp, transaction_json, previous_hash, hash)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(index)
    .bind(format_ts(&block.timestamp))
    .bind(transaction_json)
    .bind(&block.previous_hash)
    .bind(&block.hash)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        MedError::StorageFailure(format!("Failed to persist block {}: {}", block.index, e))
    })?;

    Ok(())
}

/// アウトボックスに監査待ちエントリを挿入
///
/// リソース変更と同じトランザクションの接続で呼び出すこと。
pub async fn insert_pending(
    conn: &mut SqliteConnection,
    action: AuditAction,
    resource: ResourceKind,
    record_id: i64,
    doctor_id: i64,
    patient_id: i64,
    details: String,
) -> MedResult<PendingAudit> {
    let created_at = Utc::now();
    let id = sqlx::query(
        "INSERT INTO audit_outbox (action, resource, record_id, doctor_id, patient_id, details, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(action.as_str())
    .bind(resource.as_str())
    .bind(record_id)
    .bind(doctor_id)
    .bind(patient_id)
    .bind(&details)
    .bind(format_ts(&created_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to enqueue audit entry: {}", e)))?
    .last_insert_rowid();

    Ok(PendingAudit {
        id,
        action,
        resource,
        record_id,
        doctor_id,
        patient_id,
        details,
        created_at,
    })
}

/// アウトボックス行を削除（台帳への追記と同一トランザクションで呼ぶ）
///
/// # Returns
/// * `Ok(true)` - 削除した
/// * `Ok(false)` - 既に解決済みだった
pub async fn delete_pending(conn: &mut SqliteConnection, outbox_id: i64) -> MedResult<bool> {
    let result = sqlx::query("DELETE FROM audit_outbox WHERE id = ?")
        .bind(outbox_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to resolve outbox entry: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    id: i64,
    action: String,
    resource: String,
    record_id: i64,
    doctor_id: i64,
    patient_id: i64,
    details: String,
    created_at: String,
}

impl TryFrom<PendingRow> for PendingAudit {
    type Error = MedError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action).ok_or_else(|| {
            MedError::StorageFailure(format!("Unknown audit action '{}'", row.action))
        })?;
        let resource = ResourceKind::parse(&row.resource).ok_or_else(|| {
            MedError::StorageFailure(format!("Unknown resource kind '{}'", row.resource))
        })?;
        Ok(PendingAudit {
            id: row.id,
            action,
            resource,
            record_id: row.record_id,
            doctor_id: row.doctor_id,
            patient_id: row.patient_id,
            details: row.details,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

/// 台帳未記録のアウトボックス行をID順に取得
pub async fn list_pending(pool: &SqlitePool) -> MedResult<Vec<PendingAudit>> {
    let rows = sqlx::query_as::<_, PendingRow>(
        "SELECT id, action, resource, record_id, doctor_id, patient_id, details, created_at
         FROM audit_outbox ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| MedError::StorageFailure(format!("Failed to list outbox: {}", e)))?;

    rows.into_iter().map(PendingAudit::try_from).collect()
}
