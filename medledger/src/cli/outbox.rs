//! pending / drain subcommands
//!
//! Inspect and resolve audit entries whose resource change committed but whose
//! block was never appended.

use std::sync::Arc;

use clap::Args;
use tracing::info;

use crate::common::error::MedResult;
use crate::config::LedgerConfig;
use crate::db::blocks::list_pending;
use crate::db::migrations::{initialize_database, open_read_only};
use crate::db::SqliteStore;
use crate::ledger::types::PendingAudit;
use crate::ledger::Ledger;
use crate::lock::WriterLock;

/// Arguments for the pending subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct PendingArgs {}

/// Arguments for the drain subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct DrainArgs {}

/// 未記録の監査エントリ一覧（読み取り専用）
pub async fn pending(config: &LedgerConfig) -> MedResult<Vec<PendingAudit>> {
    let pool = open_read_only(&config.database_url).await?;
    let entries = list_pending(&pool).await;
    pool.close().await;
    entries
}

/// 未記録の監査エントリを台帳に追記する
pub async fn drain(config: &LedgerConfig) -> MedResult<usize> {
    let _lock = WriterLock::acquire(&config.database_url)?;
    let pool = initialize_database(&config.database_url).await?;
    let ledger = Ledger::initialize(Arc::new(SqliteStore::new(pool.clone()))).await?;

    let drained = ledger.drain_outbox().await?;
    ledger.close().await;
    pool.close().await;
    Ok(drained)
}

/// Execute the pending command
pub async fn execute_pending(
    _args: &PendingArgs,
    config: &LedgerConfig,
) -> Result<(), anyhow::Error> {
    for entry in pending(config).await? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}

/// Execute the drain command
pub async fn execute_drain(_args: &DrainArgs, config: &LedgerConfig) -> Result<(), anyhow::Error> {
    let drained = drain(config).await?;
    info!(drained, "Outbox drained");
    println!("{}", serde_json::json!({ "drained": drained }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{AuditAction, ResourceKind};

    #[tokio::test]
    async fn test_pending_then_drain() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            database_url: format!("sqlite:{}", dir.path().join("med.db").display()),
            ..LedgerConfig::default()
        };

        let pool = initialize_database(&config.database_url).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        crate::db::blocks::insert_pending(
            &mut conn,
            AuditAction::Delete,
            ResourceKind::Appointment,
            4,
            1,
            2,
            "{}".to_string(),
        )
        .await
        .unwrap();
        drop(conn);
        pool.close().await;

        assert_eq!(pending(&config).await.unwrap().len(), 1);
        assert_eq!(drain(&config).await.unwrap(), 1);
        assert!(pending(&config).await.unwrap().is_empty());
        assert_eq!(drain(&config).await.unwrap(), 0);
    }
}
