//! 改ざん検知の統合テスト
//!
//! ファイルDBで変更を記録し、再起動後の検証とCLIの終了コードを確認する。

use std::process::Command;

use medledger::bootstrap;
use medledger::common::types::{ActorContext, RecordFields};
use medledger::db::migrations::initialize_database;
use medledger::service::types::{Mutation, Resource};

use crate::support::{file_config, seed_profiles};

const PATIENT_IIN: &str = "900517400123";

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_medledger")
}

/// `drain`は書き込み側なので、空のDBにジェネシスを作る
fn create_genesis(config: &medledger::config::LedgerConfig) {
    let output = Command::new(bin_path())
        .args(["drain", "--database-url", &config.database_url])
        .output()
        .expect("failed to run medledger drain");
    assert!(output.status.success());
}

fn fields(diagnosis: &str) -> RecordFields {
    RecordFields {
        diagnosis: diagnosis.to_string(),
        treatment_plan: "rest".to_string(),
        test_result: "negative".to_string(),
    }
}

#[tokio::test]
async fn tampered_block_is_reported_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);

    let ctx = bootstrap::initialize(&config).await.unwrap();
    let (doctor, _patient) = seed_profiles(ctx.store.pool(), PATIENT_IIN).await;
    let actor = ActorContext::doctor(doctor.user_id);

    let created = ctx
        .service
        .perform(
            &actor,
            Mutation::CreateRecord {
                patient_iin: PATIENT_IIN.to_string(),
                fields: fields("Influenza"),
            },
        )
        .await
        .unwrap();
    let Resource::Record(record) = created else {
        panic!("expected a record");
    };
    ctx.service
        .perform(
            &actor,
            Mutation::UpdateRecord {
                record_id: record.record_id,
                fields: fields("Influenza A"),
            },
        )
        .await
        .unwrap();
    assert_eq!(ctx.ledger.len().await, 3);
    ctx.shutdown().await;

    // 再起動前は健全
    let ctx = bootstrap::initialize(&config).await.unwrap();
    assert!(ctx.verification.as_ref().is_some_and(|v| v.valid));
    ctx.shutdown().await;

    let pool = initialize_database(&config.database_url).await.unwrap();
    sqlx::query(
        "UPDATE ledger_blocks SET transaction_json = REPLACE(transaction_json, 'Influenza', 'Common cold')
         WHERE block_index = 1",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let ctx = bootstrap::initialize(&config).await.unwrap();
    let verification = ctx.verification.clone().unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.first_bad_index, Some(1));
    assert_eq!(ctx.ledger.suspect_from().await, Some(1));

    // 疑わしい台帳でも追記は継続する
    ctx.service
        .perform(
            &actor,
            Mutation::DeleteRecord {
                record_id: record.record_id,
            },
        )
        .await
        .unwrap();
    assert_eq!(ctx.ledger.last().await.map(|b| b.index), Some(3));
    ctx.shutdown().await;
}

#[tokio::test]
async fn verify_command_exits_with_failure_on_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);
    create_genesis(&config);

    let ok = Command::new(bin_path())
        .args(["verify", "--database-url", &config.database_url])
        .output()
        .expect("failed to run medledger verify");
    assert!(ok.status.success(), "fresh ledger should verify");
    let stdout = String::from_utf8_lossy(&ok.stdout);
    assert!(stdout.contains("\"valid\":true"), "unexpected stdout: {stdout}");

    let pool = initialize_database(&config.database_url).await.unwrap();
    sqlx::query("UPDATE ledger_blocks SET previous_hash = 'x' WHERE block_index = 0")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let broken = Command::new(bin_path())
        .args(["verify", "--database-url", &config.database_url])
        .output()
        .expect("failed to run medledger verify");
    assert_eq!(broken.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&broken.stderr);
    assert!(
        stderr.contains("Integrity violation at block 0"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn blocks_command_prints_genesis() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);

    create_genesis(&config);

    let output = Command::new(bin_path())
        .args(["blocks", "--database-url", &config.database_url])
        .output()
        .expect("failed to run medledger blocks");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().expect("at least one block");
    let json: serde_json::Value = serde_json::from_str(first).unwrap();
    assert_eq!(json["index"], 0);
    assert_eq!(json["previous_hash"], "0");
}

#[tokio::test]
async fn read_only_commands_run_while_writer_holds_lock() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);
    let ctx = bootstrap::initialize(&config).await.unwrap();

    for command in ["verify", "blocks", "pending"] {
        let output = Command::new(bin_path())
            .args([command, "--database-url", &config.database_url])
            .output()
            .expect("failed to run medledger");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(output.status.success(), "{command} failed: {stderr}");
    }

    let drain = Command::new(bin_path())
        .args(["drain", "--database-url", &config.database_url])
        .output()
        .expect("failed to run medledger drain");
    assert!(!drain.status.success(), "drain must not run beside a live writer");

    ctx.shutdown().await;
}
