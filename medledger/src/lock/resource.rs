//! リソース単位のアドバイザリロック
//!
//! 同じ記録・予約への変更を、再読込から台帳追記まで直列化する。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ledger::types::ResourceKind;

type ResourceKey = (ResourceKind, i64);

/// `(ResourceKind, id)` をキーとするロック表
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: DashMap<ResourceKey, Arc<Mutex<()>>>,
}

/// 保持中のリソースロック（Dropで解除）
#[derive(Debug)]
pub struct ResourceGuard {
    key: ResourceKey,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    /// ロック対象のリソース種別
    pub fn kind(&self) -> ResourceKind {
        self.key.0
    }

    /// ロック対象のリソースID
    pub fn id(&self) -> i64 {
        self.key.1
    }
}

impl ResourceLocks {
    /// 空のロック表を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// リソースのロックを取得（他のタスクが保持中なら待つ）
    pub async fn lock(&self, kind: ResourceKind, id: i64) -> ResourceGuard {
        let key = (kind, id);
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        self.prune();
        ResourceGuard { key, _guard: guard }
    }

    /// 誰も参照していないエントリを削除
    fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}
