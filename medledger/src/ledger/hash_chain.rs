//! SHA-256ハッシュチェーン
//!
//! ブロックのハッシュ以外のフィールドを正規JSONにシリアライズし、SHA-256を計算する。
//! 読み込み時の検証も同じアルゴリズムで行う。

use crate::ledger::types::{ChainVerification, LedgerBlock, Transaction};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

/// ジェネシスブロックのprevious_hash
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// ハッシュ対象フィールド（フィールド順がそのままシリアライズ順になる）
#[derive(Serialize)]
struct HashInput<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    transaction: &'a Option<Transaction>,
    previous_hash: &'a str,
}

/// ブロックハッシュを計算
///
/// `SHA-256(json(index, timestamp, transaction, previous_hash))`
pub fn compute_hash(
    index: u64,
    timestamp: &DateTime<Utc>,
    transaction: &Option<Transaction>,
    previous_hash: &str,
) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(&HashInput {
        index,
        timestamp,
        transaction,
        previous_hash,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(format!("{:x}", hasher.finalize()))
}

/// 既存ブロックのハッシュを再計算
pub fn compute_block_hash(block: &LedgerBlock) -> Result<String, serde_json::Error> {
    compute_hash(
        block.index,
        &block.timestamp,
        &block.transaction,
        &block.previous_hash,
    )
}

/// ジェネシスブロックを生成
pub fn genesis_block(timestamp: DateTime<Utc>) -> Result<LedgerBlock, serde_json::Error> {
    let hash = compute_hash(0, &timestamp, &None, GENESIS_PREVIOUS_HASH)?;
    Ok(LedgerBlock {
        index: 0,
        timestamp,
        transaction: None,
        previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        hash,
    })
}

/// ブロック列のハッシュチェーンを検証
///
/// 先頭から順に「連番 → ハッシュ再計算 → 直前ブロックとの連結」を確認し、
/// 最初に不一致となったブロック番号を返す。
pub fn verify_blocks(blocks: &[LedgerBlock]) -> ChainVerification {
    let mut previous: Option<&LedgerBlock> = None;
    let mut checked = 0u64;

    for block in blocks {
        let expected_index = previous.map(|p| p.index + 1).unwrap_or(0);
        if block.index != expected_index {
            warn!(
                expected = expected_index,
                actual = block.index,
                "Hash chain broken: block index gap"
            );
            return ChainVerification::broken(
                expected_index,
                checked,
                format!(
                    "Block {} is missing (next stored block is {})",
                    expected_index, block.index
                ),
            );
        }

        let recomputed = match compute_block_hash(block) {
            Ok(hash) => hash,
            Err(e) => {
                return ChainVerification::broken(
                    block.index,
                    checked,
                    format!("Failed to encode block {}: {}", block.index, e),
                )
            }
        };
        if recomputed != block.hash {
            warn!(
                block_index = block.index,
                stored = %block.hash,
                recomputed = %recomputed,
                "Hash chain broken: block hash mismatch"
            );
            return ChainVerification::broken(
                block.index,
                checked,
                format!("Block hash mismatch at block {}", block.index),
            );
        }

        let expected_previous = previous
            .map(|p| p.hash.as_str())
            .unwrap_or(GENESIS_PREVIOUS_HASH);
        if block.previous_hash != expected_previous {
            warn!(
                block_index = block.index,
                expected = %expected_previous,
                actual = %block.previous_hash,
                "Hash chain broken: previous_hash mismatch"
            );
            return ChainVerification::broken(
                block.index,
                checked,
                format!("Previous hash mismatch at block {}", block.index),
            );
        }

        checked += 1;
        previous = Some(block);
    }

    ChainVerification::clean(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{AuditAction, ResourceKind};
    use chrono::TimeZone;

    fn fixed_time(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + secs, 0).unwrap()
    }

    fn transaction(record_id: i64) -> Transaction {
        Transaction {
            action: AuditAction::Create,
            resource: ResourceKind::Record,
            record_id,
            doctor_id: 3,
            patient_id: 9,
            timestamp: fixed_time(1),
            details: "{}".to_string(),
        }
    }

    fn chain(len: usize) -> Vec<LedgerBlock> {
        let mut blocks = vec![genesis_block(fixed_time(0)).unwrap()];
        for i in 1..len {
            let prev = blocks.last().unwrap();
            let tx = Some(transaction(i as i64));
            let ts = fixed_time(i as i64);
            let hash = compute_hash(i as u64, &ts, &tx, &prev.hash).unwrap();
            blocks.push(LedgerBlock {
                index: i as u64,
                timestamp: ts,
                transaction: tx,
                previous_hash: prev.hash.clone(),
                hash,
            });
        }
        blocks
    }

    #[test]
    fn test_compute_hash_deterministic() {
        let tx = Some(transaction(7));
        let hash1 = compute_hash(1, &fixed_time(5), &tx, "abc").unwrap();
        let hash2 = compute_hash(1, &fixed_time(5), &tx, "abc").unwrap();
        assert_eq!(hash1, hash2, "Same fields should produce same hash");
        assert_eq!(hash1.len(), 64, "SHA-256 hex should be 64 chars");
    }

    #[test]
    fn test_compute_hash_covers_every_field() {
        let tx = Some(transaction(7));
        let base = compute_hash(1, &fixed_time(5), &tx, "abc").unwrap();
        assert_ne!(base, compute_hash(2, &fixed_time(5), &tx, "abc").unwrap());
        assert_ne!(base, compute_hash(1, &fixed_time(6), &tx, "abc").unwrap());
        assert_ne!(
            base,
            compute_hash(1, &fixed_time(5), &Some(transaction(8)), "abc").unwrap()
        );
        assert_ne!(base, compute_hash(1, &fixed_time(5), &tx, "abd").unwrap());
    }

    #[test]
    fn test_genesis_block_shape() {
        let genesis = genesis_block(fixed_time(0)).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert!(genesis.transaction.is_none());
        assert_eq!(genesis.hash, compute_block_hash(&genesis).unwrap());
    }

    #[test]
    fn test_verify_empty_and_clean_chain() {
        assert!(verify_blocks(&[]).valid);
        let result = verify_blocks(&chain(5));
        assert!(result.valid);
        assert_eq!(result.blocks_checked, 5);
        assert!(result.first_bad_index.is_none());
    }

    #[test]
    fn test_verify_detects_tampered_transaction() {
        let mut blocks = chain(5);
        if let Some(tx) = blocks[3].transaction.as_mut() {
            tx.details = r#"{"diagnosis":"forged"}"#.to_string();
        }
        let result = verify_blocks(&blocks);
        assert!(!result.valid);
        assert_eq!(result.first_bad_index, Some(3));
        assert_eq!(result.blocks_checked, 3);
    }

    #[test]
    fn test_verify_detects_tampered_hash() {
        let mut blocks = chain(4);
        blocks[2].hash = "f".repeat(64);
        let result = verify_blocks(&blocks);
        assert_eq!(result.first_bad_index, Some(2));
    }

    #[test]
    fn test_verify_detects_tampered_genesis() {
        let mut blocks = chain(3);
        blocks[0].hash = "0".repeat(64);
        assert_eq!(verify_blocks(&blocks).first_bad_index, Some(0));
    }

    #[test]
    fn test_verify_detects_missing_block() {
        let mut blocks = chain(5);
        blocks.remove(2);
        let result = verify_blocks(&blocks);
        assert_eq!(result.first_bad_index, Some(2));
        assert!(result.message.unwrap().contains("missing"));
    }

    #[test]
    fn test_verify_detects_relinked_block() {
        // ハッシュを再計算しても、前ブロックとの連結が切れていれば検出される
        let mut blocks = chain(4);
        blocks[2].previous_hash = "a".repeat(64);
        blocks[2].hash = compute_block_hash(&blocks[2]).unwrap();
        assert_eq!(verify_blocks(&blocks).first_bad_index, Some(2));
    }
}
