//! verify subcommand
//!
//! Walks the whole chain and prints the result as JSON.

use clap::Args;
use serde::Serialize;

use crate::common::error::MedError;
use crate::config::LedgerConfig;
use crate::db::blocks::load_blocks_ordered;
use crate::db::migrations::open_read_only;
use crate::ledger::types::ChainVerification;
use crate::ledger::verify_rows;

/// Arguments for the verify subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct VerifyArgs {
    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,
}

/// verifyの出力
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    /// 検証結果
    #[serde(flatten)]
    pub verification: ChainVerification,
    /// デコードできなかったブロック番号
    pub skipped_indices: Vec<u64>,
}

/// Run verification and build the report
///
/// 読み取り専用で開くので、書き込みプロセスが稼働中でも実行できる。
pub async fn run(config: &LedgerConfig) -> Result<VerifyReport, MedError> {
    let pool = open_read_only(&config.database_url).await?;
    let rows = load_blocks_ordered(&pool).await;
    pool.close().await;
    let rows = rows?;

    let skipped_indices = rows
        .iter()
        .filter(|raw| raw.decode().is_err())
        .map(|raw| raw.block_index.max(0) as u64)
        .collect();

    Ok(VerifyReport {
        verification: verify_rows(&rows),
        skipped_indices,
    })
}

/// Execute the verify command
///
/// Prints the report to stdout; returns an integrity error when the chain is broken.
pub async fn execute(args: &VerifyArgs, config: &LedgerConfig) -> Result<(), anyhow::Error> {
    let report = run(config).await?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);

    if let Some(index) = report.verification.first_bad_index {
        return Err(MedError::IntegrityViolation {
            index,
            message: report
                .verification
                .message
                .unwrap_or_else(|| "hash chain broken".to_string()),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::db::migrations::initialize_database;

    fn file_config(dir: &tempfile::TempDir) -> LedgerConfig {
        LedgerConfig {
            database_url: format!("sqlite:{}", dir.path().join("med.db").display()),
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_verify_reports_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        bootstrap::initialize(&config).await.unwrap().shutdown().await;

        let clean = run(&config).await.unwrap();
        assert!(clean.verification.valid);
        assert_eq!(clean.verification.blocks_checked, 1);

        let pool = initialize_database(&config.database_url).await.unwrap();
        sqlx::query("UPDATE ledger_blocks SET hash = 'deadbeef' WHERE block_index = 0")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let report = run(&config).await.unwrap();
        assert!(!report.verification.valid);
        assert_eq!(report.verification.first_bad_index, Some(0));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["first_bad_index"], 0);
    }

    #[tokio::test]
    async fn test_verify_runs_alongside_live_writer() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        let ctx = bootstrap::initialize(&config).await.unwrap();

        let report = run(&config).await.unwrap();
        assert!(report.verification.valid);
        assert_eq!(report.verification.blocks_checked, 1);
        assert!(report.skipped_indices.is_empty());

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_verify_missing_database_fails_without_creating_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);

        assert!(run(&config).await.is_err());
        assert!(!dir.path().join("med.db").exists());
    }
}
