//! ジョブテーブルとジョブ制御。
//!
//! ジョブはパイプライン 1 本 = プロセスグループ 1 つに対応し、
//! `{id, pgid, コマンド文字列, 状態, 終了コード}` で追跡する。
//! executor（登録・フォアグラウンド待機）、builtins（`jobs`/`fg`/`bg`）、
//! シェルループ（バックグラウンド reap）がこの葉モジュールを共有する。
//!
//! ## 不変条件
//!
//! - ジョブ ID は単調増加で、プロセスの生存中は再利用しない。
//! - Done になったジョブは一覧表示・`last` 参照の前に削除される。
//! - シグナルハンドラはこのテーブルに触れない。reap はメインループが
//!   [`reap_background`] を呼ぶことでのみ起きる。

use std::io::Write;

use libc::pid_t;

use crate::signal;

// ── データ構造 ───────────────────────────────────────────────────────

/// ジョブの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done,
}

impl JobStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Done => "Done",
        }
    }
}

/// ジョブ 1 件。
#[derive(Debug)]
pub struct Job {
    /// `[N]` 形式で表示されるジョブ番号。
    pub id: usize,
    /// プロセスグループ ID。`kill(-pgid, sig)` / `waitpid(-pgid, ...)` の対象。
    pub pgid: pid_t,
    /// 表示用コマンド文字列（末尾の `&` を除いたもの）。
    pub command: String,
    pub status: JobStatus,
    pub exit_code: i32,
}

/// ジョブテーブル。
pub struct JobTable {
    jobs: Vec<Job>,
    next_id: usize,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 1,
        }
    }

    /// ジョブを登録して ID を返す。ID は単調増加。
    pub fn add(&mut self, pgid: pid_t, command: String, status: JobStatus) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push(Job {
            id,
            pgid,
            command,
            status,
            exit_code: 0,
        });
        id
    }

    pub fn find_by_id(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn find_by_pgid(&mut self, pgid: pid_t) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.pgid == pgid)
    }

    /// 最新の非 Done ジョブ。`fg`/`bg` が ID 省略時に使う。
    pub fn last(&mut self) -> Option<&mut Job> {
        self.prune_done();
        self.jobs.last_mut()
    }

    /// pgid のジョブに状態遷移を適用する。同じ状態への遷移は何もしない。
    pub fn update(&mut self, pgid: pid_t, status: JobStatus, exit_code: Option<i32>) {
        if let Some(job) = self.find_by_pgid(pgid) {
            if job.status != status {
                job.status = status;
            }
            if let Some(code) = exit_code {
                job.exit_code = code;
            }
        }
    }

    /// Done のジョブを全て削除する。
    pub fn prune_done(&mut self) {
        self.jobs.retain(|j| j.status != JobStatus::Done);
    }

    /// ジョブ一覧を出力する。`verbose` で pgid も表示する。
    pub fn list(&mut self, verbose: bool, out: &mut dyn Write) {
        self.prune_done();
        for job in &self.jobs {
            let _ = if verbose {
                writeln!(
                    out,
                    "[{}] {} {} {}",
                    job.id,
                    job.pgid,
                    job.status.label(),
                    job.command,
                )
            } else {
                writeln!(out, "[{}] {} {}", job.id, job.status.label(), job.command)
            };
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

// ── 待機ヘルパー ─────────────────────────────────────────────────────

/// waitpid のステータスを終了コードへ変換する。
///
/// `WIFEXITED → コード`、`WIFSIGNALED → 128 + シグナル番号`、
/// `WIFSTOPPED → 128 + 停止シグナル番号`。
pub fn exit_code_of(raw_status: i32) -> i32 {
    if libc::WIFEXITED(raw_status) {
        libc::WEXITSTATUS(raw_status)
    } else if libc::WIFSIGNALED(raw_status) {
        128 + libc::WTERMSIG(raw_status)
    } else if libc::WIFSTOPPED(raw_status) {
        128 + libc::WSTOPSIG(raw_status)
    } else {
        raw_status
    }
}

/// フォアグラウンドのプロセスグループを待機する。
///
/// `waitpid(-pgid, WUNTRACED)` をグループが空になるまで繰り返す。
/// 最終ステージ（`last_pid`）のステータスがパイプラインのステータスになる。
/// `last_pid == 0` なら最後に reap したプロセスのステータスを採用する
/// （`fg` のように個々の pid を把握していない呼び出し用）。
/// いずれかのプロセスが停止したら即座に `(128 + 停止シグナル, true)` を返す。
pub fn wait_foreground(pgid: pid_t, last_pid: pid_t) -> (i32, bool) {
    let mut final_status: i32 = 0;
    loop {
        let mut raw: i32 = 0;
        let pid = unsafe { libc::waitpid(-pgid, &mut raw, libc::WUNTRACED) };
        if pid <= 0 {
            break;
        }
        if libc::WIFSTOPPED(raw) {
            return (exit_code_of(raw), true);
        }
        if pid == last_pid || last_pid == 0 {
            final_status = raw;
        }
    }
    (exit_code_of(final_status), false)
}

/// 非ブロッキングでバックグラウンドの子を reap し、テーブルに反映する。
///
/// `waitpid(-1, WNOHANG | WUNTRACED | WCONTINUED)` を回し、reap した pid を
/// `getpgid` でジョブに対応付ける。Done へ遷移したジョブは `notify` 有効時に
/// `job [id] done` を stdout へ出力する。プロンプト表示前に呼ばれる。
pub fn reap_background(jobs: &mut JobTable, notify: bool) {
    loop {
        let mut raw: i32 = 0;
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut raw,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };
        if pid <= 0 {
            break;
        }

        let pgid = unsafe { libc::getpgid(pid) };
        if pgid == -1 {
            continue;
        }

        if libc::WIFSTOPPED(raw) {
            jobs.update(pgid, JobStatus::Stopped, None);
        } else if libc::WIFCONTINUED(raw) {
            jobs.update(pgid, JobStatus::Running, None);
        } else {
            let was_done = jobs
                .find_by_pgid(pgid)
                .map(|j| j.status == JobStatus::Done)
                .unwrap_or(true);
            jobs.update(pgid, JobStatus::Done, Some(exit_code_of(raw)));
            if !was_done && notify {
                if let Some(job) = jobs.find_by_pgid(pgid) {
                    println!("job [{}] done", job.id);
                }
            }
        }
    }
}

// ── ターミナル制御 ───────────────────────────────────────────────────

/// ターミナルのフォアグラウンドプロセスグループを `pgid` にする。
/// 非端末 fd では失敗するが無視する（スクリプト実行・テスト時）。
pub fn give_terminal_to(terminal_fd: i32, pgid: pid_t) {
    unsafe {
        libc::tcsetpgrp(terminal_fd, pgid);
    }
}

/// ターミナルをシェル自身のプロセスグループへ戻す。
pub fn take_terminal_back(terminal_fd: i32, shell_pgid: pid_t) {
    unsafe {
        libc::tcsetpgrp(terminal_fd, shell_pgid);
    }
}

// ── フォアグラウンド / バックグラウンド操作 ──────────────────────────

/// ジョブをフォアグラウンドへ移す。
///
/// 端末をジョブへ渡し、停止中なら `SIGCONT` を送って再開し、
/// 完了または再停止まで待つ。`monitor` 無効時と該当ジョブなしは `false`。
pub fn foreground_job(
    jobs: &mut JobTable,
    id: Option<usize>,
    terminal_fd: i32,
    shell_pgid: pid_t,
    monitor: bool,
) -> bool {
    if !monitor {
        return false;
    }
    let (pgid, stopped) = {
        let job = match id {
            Some(id) => jobs.find_by_id(id),
            None => jobs.last(),
        };
        match job {
            Some(job) => (job.pgid, job.status == JobStatus::Stopped),
            None => return false,
        }
    };

    signal::set_foreground_pgid(pgid);
    give_terminal_to(terminal_fd, pgid);
    if stopped {
        unsafe {
            libc::kill(-pgid, libc::SIGCONT);
        }
        jobs.update(pgid, JobStatus::Running, None);
    }

    let (code, stopped_again) = wait_foreground(pgid, 0);

    take_terminal_back(terminal_fd, shell_pgid);
    signal::clear_foreground_pgid();

    if stopped_again {
        jobs.update(pgid, JobStatus::Stopped, None);
    } else {
        jobs.update(pgid, JobStatus::Done, Some(code));
        jobs.prune_done();
    }
    true
}

/// 停止中のジョブをバックグラウンドで再開する。端末は渡さない。
pub fn background_job(jobs: &mut JobTable, id: Option<usize>, monitor: bool) -> bool {
    if !monitor {
        return false;
    }
    let job = match id {
        Some(id) => jobs.find_by_id(id),
        None => jobs.last(),
    };
    let job = match job {
        Some(job) => job,
        None => return false,
    };
    if job.status == JobStatus::Stopped {
        unsafe {
            libc::kill(-job.pgid, libc::SIGCONT);
        }
        job.status = JobStatus::Running;
    }
    true
}

// ── Tests ───────────────────────────────────────────────────────
