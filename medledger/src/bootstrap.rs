//! 起動処理
//!
//! 書き込みロック取得、データベース接続とマイグレーション、台帳読み込み、
//! 起動時検証、アウトボックス回収の順に初期化する。

use std::sync::Arc;

use tracing::{info, warn};

use crate::common::error::MedResult;
use crate::config::LedgerConfig;
use crate::db::migrations::initialize_database;
use crate::db::SqliteStore;
use crate::ledger::types::ChainVerification;
use crate::ledger::Ledger;
use crate::lock::WriterLock;
use crate::service::AuditedMutationService;

/// 初期化結果
///
/// `_writer_lock` は書き込みを終えるまで保持する必要がある。
pub struct InitContext {
    /// 変更サービス
    pub service: Arc<AuditedMutationService<SqliteStore>>,
    /// 台帳
    pub ledger: Arc<Ledger>,
    /// ストア
    pub store: Arc<SqliteStore>,
    /// 起動時検証の結果（無効化されている場合は`None`）
    pub verification: Option<ChainVerification>,
    /// 起動時にアウトボックスから回収したエントリ数
    pub drained: usize,
    /// 書き込みロック（Dropで解除）
    pub _writer_lock: WriterLock,
}

impl std::fmt::Debug for InitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitContext")
            .field("verification", &self.verification)
            .field("drained", &self.drained)
            .field("writer_lock", &self._writer_lock)
            .finish_non_exhaustive()
    }
}

/// 初期化を実行する
pub async fn initialize(config: &LedgerConfig) -> MedResult<InitContext> {
    info!("medledger v{}", env!("CARGO_PKG_VERSION"));

    let writer_lock = WriterLock::acquire(&config.database_url)?;
    info!(
        "Writer lock acquired for {} (PID: {})",
        config.database_url,
        writer_lock.info().pid
    );

    let pool = initialize_database(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let ledger = Arc::new(Ledger::initialize(store.clone()).await?);

    let verification = if config.verify_on_start {
        let result = ledger.verify_chain().await?;
        if !result.valid {
            warn!(
                first_bad_index = ?result.first_bad_index,
                "Ledger failed verification on start; continuing with suspect ledger"
            );
        }
        Some(result)
    } else {
        None
    };

    let service = Arc::new(AuditedMutationService::new(
        store.clone(),
        ledger.clone(),
        config.policy,
    ));
    info!(
        doctor_read_policy = service.policy().doctor_read.as_str(),
        "Mutation service ready"
    );
    let drained = service.start().await?;

    Ok(InitContext {
        service,
        ledger,
        store,
        verification,
        drained,
        _writer_lock: writer_lock,
    })
}

impl InitContext {
    /// 台帳を閉じて接続を解放する
    pub async fn shutdown(self) {
        self.ledger.close().await;
        self.store.pool().close().await;
        info!("Shutdown complete");
    }
}
