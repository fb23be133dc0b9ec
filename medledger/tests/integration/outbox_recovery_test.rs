//! アウトボックス回収の統合テスト
//!
//! 台帳追記前にプロセスが落ちた状況を再現し、再起動で監査エントリが
//! チェーンに載ることを確認する。

use medledger::bootstrap;
use medledger::db::blocks::{insert_pending, list_pending};
use medledger::ledger::types::{AuditAction, ResourceKind};

use crate::support::{file_config, seed_profiles};

#[tokio::test]
async fn restart_appends_pending_entries_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);

    let ctx = bootstrap::initialize(&config).await.unwrap();
    let (doctor, patient) = seed_profiles(ctx.store.pool(), "870312450016").await;

    // 変更はコミット済みだが、追記前に停止した
    {
        let mut conn = ctx.store.pool().acquire().await.unwrap();
        for (record_id, action) in [(11, AuditAction::Create), (11, AuditAction::Update)] {
            insert_pending(
                &mut conn,
                action,
                ResourceKind::Record,
                record_id,
                doctor.doctor_id,
                patient.patient_id,
                "{}".to_string(),
            )
            .await
            .unwrap();
        }
    }
    ctx.shutdown().await;

    let ctx = bootstrap::initialize(&config).await.unwrap();
    assert_eq!(ctx.drained, 2);
    assert!(list_pending(ctx.store.pool()).await.unwrap().is_empty());

    let blocks = ctx.ledger.blocks().await;
    let actions: Vec<AuditAction> = blocks
        .iter()
        .filter_map(|b| b.transaction.as_ref().map(|t| t.action))
        .collect();
    assert_eq!(actions, vec![AuditAction::Create, AuditAction::Update]);
    assert!(ctx.ledger.verify_chain().await.unwrap().valid);
    ctx.shutdown().await;

    // 2回目の起動では何も回収しない
    let ctx = bootstrap::initialize(&config).await.unwrap();
    assert_eq!(ctx.drained, 0);
    assert_eq!(ctx.ledger.len().await, 3);
    ctx.shutdown().await;
}
