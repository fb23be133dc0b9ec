//! 統合テスト用ヘルパー

#![allow(dead_code)]

use medledger::common::types::{Doctor, Patient};
use medledger::config::LedgerConfig;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// 一時ディレクトリ上のファイルDBを指す設定
pub fn file_config(dir: &TempDir) -> LedgerConfig {
    LedgerConfig {
        database_url: format!("sqlite:{}", dir.path().join("medledger.db").display()),
        ..LedgerConfig::default()
    }
}

/// 医師と患者を1人ずつ登録する
pub async fn seed_profiles(pool: &SqlitePool, patient_iin: &str) -> (Doctor, Patient) {
    let doctor = medledger::db::profiles::register_doctor(
        pool,
        "800101300001",
        "Aigerim",
        "Sadykova",
        "therapist",
    )
    .await
    .expect("seed doctor");
    let patient = medledger::db::profiles::register_patient(
        pool,
        patient_iin,
        "Daniyar",
        "Nurlanov",
        "1990-05-17",
    )
    .await
    .expect("seed patient");
    (doctor, patient)
}
