//! CLI module for medledger
//!
//! Operator commands for inspecting and maintaining the audit ledger.

pub mod blocks;
pub mod outbox;
pub mod verify;

use clap::{Parser, Subcommand};

/// medledger - tamper-evident audit ledger for medical records
#[derive(Parser, Debug)]
#[command(name = "medledger")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    MEDLEDGER_DATABASE_URL        Database URL (default: sqlite:data/medledger.db)
    MEDLEDGER_LOG_LEVEL           Log filter (default: info, fallback: RUST_LOG)
    MEDLEDGER_DOCTOR_READ_POLICY  Doctor read policy: open | require_grant (default: open)
    MEDLEDGER_VERIFY_ON_START     Verify the chain when opening for writing (default: true)
"#)]
pub struct Cli {
    /// Database URL
    #[arg(long, global = true, env = "MEDLEDGER_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify the whole hash chain (exit code 1 on violation)
    Verify(verify::VerifyArgs),
    /// Print stored ledger blocks as JSON lines
    Blocks(blocks::BlocksArgs),
    /// List audit entries that are not yet on the chain
    Pending(outbox::PendingArgs),
    /// Append pending audit entries to the chain
    Drain(outbox::DrainArgs),
}
