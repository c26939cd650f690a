//! ryke ライブラリ — ベンチマーク・テスト用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の REPL ループ。行エディタは外部コラボレータで、
//! コアは `read_line` 相当のプリミティブだけを消費する。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`expand`] | 展開エンジン（`~`、`$VAR`、`${VAR:-def}`、`$(cmd)`、`$((expr))`、クォート規則） |
//! | [`parser`] | トークナイザ + ブレース展開 + パーサー（パイプライン、リダイレクト、`&&`/`\|\|`、`&`） |
//! | [`executor`] | 実行エンジン（連結条件、パイプ接続、リダイレクト適用、端末受け渡し） |
//! | [`job`] | ジョブテーブルとジョブ制御（`fg`/`bg`、reap、`tcsetpgrp`） |
//! | [`spawn`] | `posix_spawnp` ラッパー（プロセスグループ、順序付き fd 操作） |
//! | [`signal`] | シグナルブリッジ（SIGINT/SIGTSTP/SIGCHLD、reap フラグ） |
//! | [`shell`] | シェル状態と REPL ループ（履歴ポリシー、エイリアス、ヒアドキュメント収集、永続化） |
//! | [`builtins`] | ビルトイン（`exit`, `cd`, `jobs`, `fg`, `bg`, `alias`, `theme`, `set` 等） |
//! | [`glob`] | パス名展開（`*`, `?`, `[...]`） |
//! | [`history`] | コマンド履歴（上限付きキュー、ファイル永続化） |
//! | [`prompt`] | プロンプトテンプレート描画とカラーテーマ |

pub mod builtins;
pub mod executor;
pub mod expand;
pub mod glob;
pub mod history;
pub mod job;
pub mod parser;
pub mod prompt;
pub mod shell;
pub mod signal;
pub mod spawn;

/// 子プロセスを spawn するテストの直列化用ロック。
/// reap（`waitpid(-1, ...)`）が他テストの子を横取りしないようにする。
#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::{Mutex, MutexGuard};

    static EXEC_LOCK: Mutex<()> = Mutex::new(());

    pub fn exec_lock() -> MutexGuard<'static, ()> {
        EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
