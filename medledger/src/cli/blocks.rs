//! blocks subcommand
//!
//! Prints stored blocks as JSON lines. Read-only; no lock is taken.

use clap::Args;
use serde::Serialize;

use crate::common::error::MedResult;
use crate::config::LedgerConfig;
use crate::db::blocks::load_blocks_ordered;
use crate::db::migrations::open_read_only;
use crate::ledger::types::LedgerBlock;

/// Arguments for the blocks subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct BlocksArgs {
    /// First block index to print
    #[arg(long, default_value_t = 0)]
    pub from: u64,

    /// Maximum number of blocks to print
    #[arg(long)]
    pub limit: Option<usize>,
}

/// 1行分の出力
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BlockLine {
    /// デコードできたブロック
    Block(LedgerBlock),
    /// デコードできなかった行
    Undecodable {
        /// ブロック番号
        index: i64,
        /// エラー内容
        error: String,
    },
}

/// Load the requested range of blocks
pub async fn collect(args: &BlocksArgs, config: &LedgerConfig) -> MedResult<Vec<BlockLine>> {
    let pool = open_read_only(&config.database_url).await?;
    let rows = load_blocks_ordered(&pool).await;
    pool.close().await;
    let rows = rows?;

    let from = i64::try_from(args.from).unwrap_or(i64::MAX);
    let lines = rows
        .into_iter()
        .filter(|raw| raw.block_index >= from)
        .take(args.limit.unwrap_or(usize::MAX))
        .map(|raw| match raw.decode() {
            Ok(block) => BlockLine::Block(block),
            Err(e) => BlockLine::Undecodable {
                index: raw.block_index,
                error: e.to_string(),
            },
        })
        .collect();
    Ok(lines)
}

/// Execute the blocks command
pub async fn execute(args: &BlocksArgs, config: &LedgerConfig) -> Result<(), anyhow::Error> {
    for line in collect(args, config).await? {
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}
