// データベース初期化とマイグレーション実行

use crate::common::error::{MedError, MedResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;
use std::str::FromStr;

/// SQLiteデータベース接続プールを作成してマイグレーションを実行
///
/// # Arguments
/// * `database_url` - データベースURL（例: "sqlite:data/medledger.db"）
///
/// # Returns
/// * `Ok(SqlitePool)` - 初期化済みデータベースプール
/// * `Err(MedError)` - 初期化失敗
pub async fn initialize_database(database_url: &str) -> MedResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| MedError::Config(format!("Invalid database URL '{}': {}", database_url, e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MedError::StorageFailure(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    tracing::info!("Opening database: {}", database_url);
    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to connect to database: {}", e)))?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// 既存データベースを読み取り専用で開く
///
/// ファイルの作成やマイグレーションは行わないため、稼働中の書き込みプロセスと
/// 並行して使える。ファイルが無ければエラー。
pub async fn open_read_only(database_url: &str) -> MedResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| MedError::Config(format!("Invalid database URL '{}': {}", database_url, e)))?
        .read_only(true)
        .create_if_missing(false);

    tracing::debug!("Opening database read-only: {}", database_url);
    SqlitePool::connect_with(options)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to open database: {}", e)))
}

/// マイグレーションを実行（sqlx::migrate!マクロを使用）
///
/// # Arguments
/// * `pool` - データベース接続プール
///
/// # Returns
/// * `Ok(())` - マイグレーション成功
/// * `Err(MedError)` - マイグレーション失敗
pub async fn run_migrations(pool: &SqlitePool) -> MedResult<()> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| MedError::StorageFailure(format!("Failed to run migrations: {}", e)))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
