//! 改ざん検知台帳
//!
//! 変更操作1件につき1ブロックを追記するSHA-256ハッシュチェーン。
//! 追記と検証は同じ`tokio::sync::Mutex`で直列化する。

pub mod hash_chain;
pub mod types;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::common::error::{MedError, MedResult};
use crate::db::blocks::RawBlock;
use crate::db::traits::BlockStore;

use hash_chain::{compute_hash, genesis_block, verify_blocks};
use types::{AuditAction, ChainVerification, LedgerBlock, PendingAudit, ResourceKind, Transaction};

/// 台帳の先端（最後に保存された行）
#[derive(Debug, Clone)]
struct Tip {
    index: u64,
    hash: String,
}

impl Tip {
    fn from_raw(raw: &RawBlock) -> MedResult<Self> {
        let index = u64::try_from(raw.block_index).map_err(|_| {
            MedError::StorageFailure(format!("Negative block index {}", raw.block_index))
        })?;
        Ok(Self {
            index,
            hash: raw.hash.clone(),
        })
    }
}

#[derive(Debug)]
struct LedgerState {
    blocks: Vec<LedgerBlock>,
    tip: Tip,
    suspect_from: Option<u64>,
    skipped: Vec<u64>,
    closed: bool,
}

/// 改ざん検知台帳
pub struct Ledger {
    store: Arc<dyn BlockStore>,
    state: Mutex<LedgerState>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    /// ストアから台帳を読み込む
    ///
    /// デコードできない行は警告を出して読み飛ばし、`skipped_indices()`に記録する。
    /// 先端は最後の行そのものから取るため、壊れた行の連番が再利用されることはない。
    /// ストアが空ならジェネシスブロックを作成して保存する。
    pub async fn initialize(store: Arc<dyn BlockStore>) -> MedResult<Self> {
        let raw_blocks = store.load_blocks_ordered().await?;

        let mut blocks = Vec::with_capacity(raw_blocks.len());
        let mut skipped = Vec::new();
        for raw in &raw_blocks {
            match raw.decode() {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    warn!(
                        block_index = raw.block_index,
                        error = %e,
                        "Ledger integrity warning: skipping undecodable block"
                    );
                    skipped.push(raw.block_index.max(0) as u64);
                }
            }
        }

        let tip = match raw_blocks.last() {
            Some(raw) => Tip::from_raw(raw)?,
            None => {
                let genesis = genesis_block(Utc::now())?;
                store.persist_block(&genesis).await?;
                info!(hash = %genesis.hash, "Created genesis block");
                let tip = Tip {
                    index: genesis.index,
                    hash: genesis.hash.clone(),
                };
                blocks.push(genesis);
                tip
            }
        };

        info!(
            blocks = blocks.len(),
            skipped = skipped.len(),
            tip_index = tip.index,
            "Ledger initialized"
        );

        Ok(Self {
            store,
            state: Mutex::new(LedgerState {
                blocks,
                tip,
                suspect_from: None,
                skipped,
                closed: false,
            }),
        })
    }

    /// 変更操作を1ブロックとして追記
    ///
    /// 永続化に失敗した場合はメモリ上の台帳も変更せずエラーを返す。
    pub async fn append(
        &self,
        action: AuditAction,
        resource: ResourceKind,
        record_id: i64,
        doctor_id: i64,
        patient_id: i64,
        details: String,
    ) -> MedResult<LedgerBlock> {
        let transaction = Transaction {
            action,
            resource,
            record_id,
            doctor_id,
            patient_id,
            timestamp: Utc::now(),
            details,
        };
        let mut state = self.state.lock().await;
        self.append_locked(&mut state, transaction, None)
            .await?
            .ok_or_else(|| MedError::StorageFailure("Block was not persisted".to_string()))
    }

    /// アウトボックスの監査エントリを追記し、同じトランザクションで行を削除
    ///
    /// # Returns
    /// * `Ok(Some(block))` - 追記したブロック
    /// * `Ok(None)` - 別の経路（`drain_outbox`）で既に台帳に載っていた
    pub async fn append_pending(&self, pending: &PendingAudit) -> MedResult<Option<LedgerBlock>> {
        let mut state = self.state.lock().await;
        self.append_locked(&mut state, transaction_for(pending), Some(pending.id))
            .await
    }

    /// 台帳未記録のアウトボックス行をID順にすべて追記
    ///
    /// 変更のコミット後に追記が失敗した（またはプロセスが落ちた）エントリを回収する。
    ///
    /// # Returns
    /// * `Ok(usize)` - 追記したブロック数
    pub async fn drain_outbox(&self) -> MedResult<usize> {
        let mut state = self.state.lock().await;
        let pending = self.store.pending_audits().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!(count = pending.len(), "Draining audit outbox");
        let mut appended = 0;
        for entry in &pending {
            if self
                .append_locked(&mut state, transaction_for(entry), Some(entry.id))
                .await?
                .is_some()
            {
                appended += 1;
            }
        }
        Ok(appended)
    }

    async fn append_locked(
        &self,
        state: &mut LedgerState,
        transaction: Transaction,
        outbox_id: Option<i64>,
    ) -> MedResult<Option<LedgerBlock>> {
        if state.closed {
            return Err(MedError::StorageFailure("Ledger is closed".to_string()));
        }

        let index = state.tip.index + 1;
        let timestamp = Utc::now();
        let transaction = Some(transaction);
        let hash = compute_hash(index, &timestamp, &transaction, &state.tip.hash)?;
        let block = LedgerBlock {
            index,
            timestamp,
            transaction,
            previous_hash: state.tip.hash.clone(),
            hash,
        };

        let persisted = match outbox_id {
            Some(id) => self.store.persist_block_resolving(&block, id).await?,
            None => {
                self.store.persist_block(&block).await?;
                true
            }
        };
        if !persisted {
            debug!(outbox_id = ?outbox_id, "Outbox entry already chained; nothing appended");
            return Ok(None);
        }

        debug!(
            block_index = block.index,
            hash = %block.hash,
            outbox_id = ?outbox_id,
            "Appended ledger block"
        );

        state.tip = Tip {
            index: block.index,
            hash: block.hash.clone(),
        };
        state.blocks.push(block.clone());
        Ok(Some(block))
    }

    /// 保存済みの全ブロックを先頭から検証
    ///
    /// 不一致が見つかった場合は台帳を「要確認」とし、以後も追記は継続する。修復はしない。
    pub async fn verify_chain(&self) -> MedResult<ChainVerification> {
        let mut state = self.state.lock().await;
        let raw_blocks = self.store.load_blocks_ordered().await?;
        let result = verify_rows(&raw_blocks);

        if let Some(index) = result.first_bad_index {
            if state.suspect_from.map_or(true, |current| index < current) {
                state.suspect_from = Some(index);
            }
            warn!(
                first_bad_index = index,
                "Ledger marked suspect after failed verification"
            );
        } else {
            info!(blocks_checked = result.blocks_checked, "Ledger chain verified");
        }

        Ok(result)
    }

    /// メモリ上のブロック一覧（読み飛ばした行を除く）
    pub async fn blocks(&self) -> Vec<LedgerBlock> {
        self.state.lock().await.blocks.clone()
    }

    /// メモリ上のブロック数
    pub async fn len(&self) -> usize {
        self.state.lock().await.blocks.len()
    }

    /// ブロックが1件もないか（初期化後は常にfalse）
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.blocks.is_empty()
    }

    /// 最後のブロック
    pub async fn last(&self) -> Option<LedgerBlock> {
        self.state.lock().await.blocks.last().cloned()
    }

    /// 検証で最初に不一致が見つかったブロック番号
    pub async fn suspect_from(&self) -> Option<u64> {
        self.state.lock().await.suspect_from
    }

    /// 読み込み時にデコードできず読み飛ばしたブロック番号
    pub async fn skipped_indices(&self) -> Vec<u64> {
        self.state.lock().await.skipped.clone()
    }

    /// 台帳を閉じる（以後の追記はエラー）
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        info!(
            tip_index = state.tip.index,
            tip_hash = %state.tip.hash,
            "Ledger closed"
        );
    }
}

/// 保存済みの行を先頭から検証する（ロックやストアを持たない）
///
/// デコードできない行は、それより前が健全であればその行番号での不一致として扱う。
pub fn verify_rows(raw_blocks: &[RawBlock]) -> ChainVerification {
    let mut decoded = Vec::with_capacity(raw_blocks.len());
    let mut undecodable = None;
    for raw in raw_blocks {
        match raw.decode() {
            Ok(block) => decoded.push(block),
            Err(e) => {
                undecodable = Some((raw.block_index.max(0) as u64, e));
                break;
            }
        }
    }

    let result = verify_blocks(&decoded);
    match undecodable {
        Some((index, e)) if result.valid => {
            warn!(block_index = index, error = %e, "Hash chain broken: undecodable block");
            ChainVerification::broken(
                index,
                result.blocks_checked,
                format!("Block {} cannot be decoded: {}", index, e),
            )
        }
        _ => result,
    }
}

fn transaction_for(pending: &PendingAudit) -> Transaction {
    Transaction {
        action: pending.action,
        resource: pending.resource,
        record_id: pending.record_id,
        doctor_id: pending.doctor_id,
        patient_id: pending.patient_id,
        timestamp: pending.created_at,
        details: pending.details.clone(),
    }
}
