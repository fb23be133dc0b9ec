//! 書き込みプロセスの排他制御
//!
//! 1つのデータベースに対して台帳へ追記するプロセスは1つだけとする。
//! 複数プロセスが同じ先端から追記すると連番が衝突するため、データベースファイルの隣に
//! ロックファイルを置いて排他する。
//!
//! # 機能
//!
//! - クロスプラットフォームファイルロック（fs2）
//! - ロックファイルにJSON形式でPID・取得時刻・データベースを記録
//! - 残留ロックの自動検出と解除（PID検証）
//! - Dropトレイトによる解除
//!
//! プロセス内の同一リソースへの変更の直列化は[`resource::ResourceLocks`]が担う。

pub mod resource;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// ロックファイルに保存される情報
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockInfo {
    /// ロックを保持するプロセスのPID
    pub pid: u32,
    /// ロック取得時刻（UTC）
    pub started_at: DateTime<Utc>,
    /// 対象データベースURL
    pub database: String,
}

/// ロック操作に関するエラー型
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// 他のプロセスが既に書き込み中
    #[error("Another writer is already running for {database} (PID: {pid}, started: {started_at})\n\nTo stop: kill -TERM {pid}")]
    AlreadyHeld {
        /// データベースURL
        database: String,
        /// 既存プロセスのPID
        pid: u32,
        /// 取得時刻
        started_at: DateTime<Utc>,
    },

    /// ロック取得に失敗
    #[error("Failed to acquire writer lock: {0}")]
    AcquireFailed(#[source] std::io::Error),

    /// ロック解除に失敗
    #[error("Failed to release writer lock: {0}")]
    ReleaseFailed(#[source] std::io::Error),

    /// ロックファイルが破損
    #[error("Lock file corrupted: {0}")]
    Corrupted(String),

    /// ロックディレクトリの作成に失敗
    #[error("Failed to create lock directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
}

/// データベースURLからロックファイルのパスを決める
///
/// ファイルDBは `<database>.lock`、インメモリDBは一時ディレクトリ配下の
/// `medledger/memory.lock` を使う。
///
/// # Examples
///
/// `sqlite:data/medledger.db` → `data/medledger.db.lock`
pub fn lock_path_for(database_url: &str) -> PathBuf {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let path = path.split('?').next().unwrap_or_default();

    if path.is_empty() || path == ":memory:" {
        return std::env::temp_dir().join("medledger").join("memory.lock");
    }
    PathBuf::from(format!("{}.lock", path))
}

/// 指定PIDのプロセスが存在するか確認
pub fn is_process_running(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}

/// ロックファイルからロック情報を読み取る
///
/// # Returns
///
/// - `Ok(Some(LockInfo))`: ロックファイルが存在し、正常に読み取れた場合
/// - `Ok(None)`: ロックファイルが存在しない場合
/// - `Err(LockError::Corrupted)`: ロックファイルが破損している場合
pub fn read_lock_info(path: &Path) -> Result<Option<LockInfo>, LockError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| LockError::Corrupted(format!("Failed to read lock file: {}", e)))?;
    // 作成直後で未書き込みのファイル
    if content.trim().is_empty() {
        return Ok(None);
    }

    let info: LockInfo = serde_json::from_str(&content)
        .map_err(|e| LockError::Corrupted(format!("Invalid JSON in lock file: {}", e)))?;

    Ok(Some(info))
}

/// 書き込みプロセスのファイルロック
///
/// RAIIパターンでロック解除を保証する。
/// スコープを抜けるか、明示的に`release()`を呼び出すとロックが解除される。
pub struct WriterLock {
    lock_file: Option<File>,
    lock_path: PathBuf,
    info: LockInfo,
}

impl std::fmt::Debug for WriterLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterLock")
            .field("lock_path", &self.lock_path)
            .field("info", &self.info)
            .finish()
    }
}

impl WriterLock {
    /// データベースに対する書き込みロックを取得する
    ///
    /// # Returns
    ///
    /// - `Ok(WriterLock)`: ロック取得に成功した場合
    /// - `Err(LockError::AlreadyHeld)`: 他のプロセスが書き込み中の場合
    /// - `Err(LockError::AcquireFailed)`: ロック取得に失敗した場合
    ///
    /// # 残留ロックの処理
    ///
    /// ロックファイルが存在し、記録されたPIDのプロセスが存在しない場合は、
    /// 残留ロックとして削除し、新しいロックを取得する。
    pub fn acquire(database_url: &str) -> Result<Self, LockError> {
        Self::acquire_at(lock_path_for(database_url), database_url)
    }

    /// 任意のパスでロックを取得する
    pub fn acquire_at(path: PathBuf, database_url: &str) -> Result<Self, LockError> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(LockError::DirectoryCreationFailed)?;
        }

        if let Some(existing) = read_lock_info(&path)? {
            if is_process_running(existing.pid) {
                return Err(LockError::AlreadyHeld {
                    database: existing.database,
                    pid: existing.pid,
                    started_at: existing.started_at,
                });
            }
            warn!(
                "Stale writer lock detected (PID {} not running), cleaning up",
                existing.pid
            );
            std::fs::remove_file(&path).map_err(LockError::AcquireFailed)?;
        }

        let mut file = File::create(&path).map_err(LockError::AcquireFailed)?;

        file.try_lock_exclusive().map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                LockError::AcquireFailed(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "Lock is held by another process",
                ))
            } else {
                LockError::AcquireFailed(e)
            }
        })?;

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
            database: database_url.to_string(),
        };

        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| LockError::AcquireFailed(std::io::Error::other(e)))?;
        file.write_all(json.as_bytes())
            .map_err(LockError::AcquireFailed)?;
        file.flush().map_err(LockError::AcquireFailed)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, permissions).map_err(LockError::AcquireFailed)?;
        }

        debug!(
            "Writer lock acquired for {} (PID: {})",
            database_url, info.pid
        );

        Ok(Self {
            lock_file: Some(file),
            lock_path: path,
            info,
        })
    }

    /// ロック情報
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// ロックファイルのパス
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// ロックを明示的に解除してロックファイルを削除する
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_internal()
    }

    fn release_internal(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.lock_file.take() {
            file.unlock().map_err(LockError::ReleaseFailed)?;
            drop(file);

            if self.lock_path.exists() {
                std::fs::remove_file(&self.lock_path).map_err(LockError::ReleaseFailed)?;
            }

            debug!("Writer lock released for {}", self.info.database);
        }
        Ok(())
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_internal() {
            // panicしない
            tracing::error!("Failed to release writer lock on drop: {}", e);
        }
    }
}
