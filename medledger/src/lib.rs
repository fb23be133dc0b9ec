//! medledger
//!
//! 診療記録・予約の変更をSHA-256ハッシュチェーン台帳に記録する監査コア

#![warn(missing_docs)]

/// 共通型定義とエラー型
pub mod common;

/// アクセス制御（純粋なポリシー評価）
pub mod access;

/// ハッシュチェーン台帳
pub mod ledger;

/// データベースアクセス
pub mod db;

/// 監査付き変更サービス
pub mod service;

/// 書き込みプロセスの排他制御とリソース単位ロック
pub mod lock;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// ロギング初期化ユーティリティ
pub mod logging;

/// 起動処理
pub mod bootstrap;

/// CLIインターフェース
pub mod cli;
