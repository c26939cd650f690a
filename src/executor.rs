//! 実行エンジン: 連結条件の評価、リダイレクト適用、パイプライン起動、
//! ターミナル受け渡し、終了ステータス回収。
//!
//! ## パイプライン実行の流れ
//!
//! 1. N-1 本のパイプを作成
//! 2. 各ステージの引数に glob 展開を適用（`noglob` 時はスキップ）
//! 3. リダイレクト先ファイルを親側で開き、fd 操作列を組み立てる
//!    （パイプ接続が先、リダイレクトはテキスト順。
//!    `cmd >f 2>&1` と `cmd 2>&1 >f` の区別はこの順序で保証される）
//! 4. [`spawn`](crate::spawn::spawn) でステージを起動。最初の子の PID が
//!    pgid になり、親側でも `setpgid` を呼んでレースを閉じる
//! 5. ヒアドキュメント本体は spawn 後に親がパイプへ書き込む
//! 6. フォアグラウンド: `tcsetpgrp` で端末を渡し、グループ全体を
//!    `WUNTRACED` 付きで待機。停止検出時は Stopped ジョブとして登録。
//!    待機後は無条件に端末をシェルへ戻す
//!    バックグラウンド: ジョブ登録して `[id] pgid` を表示し即座に戻る
//!
//! ## エラーの扱い
//!
//! | 失敗 | 挙動 |
//! |------|------|
//! | `pipe` 失敗 | パイプラインを中止して 1 |
//! | リダイレクト先 open 失敗 | 残りステージを中止、spawn 済みを待機、非 0 |
//! | spawn 失敗（ENOENT 等） | 赤字の `Command not found` を表示、127/126 |

use std::ffi::CString;

use libc::pid_t;

use crate::expand;
use crate::glob;
use crate::job::{self, JobStatus};
use crate::parser::{Command, Pipeline, RedirectOp};
use crate::shell::{Shell, ShellOptions};
use crate::signal;
use crate::spawn::{self, StageIo};

/// パイプライン列を連結条件に従って実行し、最後に実行した
/// パイプラインの終了ステータスを返す。
///
/// `line` は元のコマンド行で、ジョブテーブルの表示と `xtrace` に使う。
pub fn execute(shell: &mut Shell, pipelines: &[Pipeline], line: &str) -> i32 {
    if shell.options.xtrace {
        eprintln!("+ {}", line);
    }

    let mut last_status = 0;
    let mut ran_any = false;

    for pipeline in pipelines {
        match pipeline.condition {
            crate::parser::ChainCondition::And if ran_any && last_status != 0 => continue,
            crate::parser::ChainCondition::Or if ran_any && last_status == 0 => continue,
            _ => {}
        }
        last_status = execute_pipeline(shell, pipeline, line);
        ran_any = true;
    }

    last_status
}

// ── ステージ準備 ─────────────────────────────────────────────────────

/// 1 ステージ分の spawn 前準備の結果。
struct StagePrep {
    io: StageIo,
    /// 親が spawn 後に閉じる fd（開いたファイル、ヒアドキュメントの読み端）。
    parent_close: Vec<i32>,
    /// spawn 後に親が書き込むヒアドキュメント本体と書き込み端。
    heredoc_write: Option<(i32, Vec<u8>)>,
}

/// リダイレクト列から fd 操作列を組み立てる。
///
/// リダイレクトはテキスト順のまま fd 操作列に変換する。`cmd >f 2>&1` は
/// 両ストリームをファイルへ、`cmd 2>&1 >f` は stderr を元の stdout へ
/// 向ける、という区別はこの順序保存だけで成立する。
/// open 失敗はエラーメッセージを表示して `Err(1)` を返す
/// （noclobber の `O_EXCL` 失敗も同じ経路）。
fn prepare_redirects(command: &Command, options: &ShellOptions) -> Result<StagePrep, i32> {
    let mut prep = StagePrep {
        io: StageIo::default(),
        parent_close: Vec::new(),
        heredoc_write: None,
    };

    for redirect in &command.redirects {
        match &redirect.op {
            RedirectOp::ReadFile(path) => {
                let fd = open_file(path, libc::O_RDONLY, 0)?;
                prep.io.dup2s.push((fd, redirect.fd));
                prep.parent_close.push(fd);
            }
            RedirectOp::WriteFile { path, append } => {
                let flags = if *append {
                    libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND
                } else if options.noclobber {
                    libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL
                } else {
                    libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC
                };
                let fd = open_file(path, flags, 0o644)?;
                prep.io.dup2s.push((fd, redirect.fd));
                prep.parent_close.push(fd);
            }
            RedirectOp::HereDoc { body, expand: expand_vars, .. } => {
                // タブ除去は本体収集時に済んでいる。変数展開は書き込み時に行う
                let raw = body.clone().unwrap_or_default();
                let text = if *expand_vars {
                    expand::expand_line(&raw, options).unwrap_or(raw)
                } else {
                    raw
                };
                let (read_fd, write_fd) = make_pipe()?;
                prep.io.dup2s.push((read_fd, redirect.fd));
                prep.parent_close.push(read_fd);
                if let Some((old_fd, _)) = prep.heredoc_write.take() {
                    unsafe { libc::close(old_fd) };
                }
                prep.heredoc_write = Some((write_fd, text.into_bytes()));
            }
            RedirectOp::HereString(text) => {
                let (read_fd, write_fd) = make_pipe()?;
                prep.io.dup2s.push((read_fd, redirect.fd));
                prep.parent_close.push(read_fd);
                if let Some((old_fd, _)) = prep.heredoc_write.take() {
                    unsafe { libc::close(old_fd) };
                }
                prep.heredoc_write = Some((write_fd, format!("{}\n", text).into_bytes()));
            }
            RedirectOp::DupFd(src) => {
                prep.io.dup2s.push((*src, redirect.fd));
            }
        }
    }

    Ok(prep)
}

fn open_file(path: &str, flags: i32, mode: libc::mode_t) -> Result<i32, i32> {
    let cpath = match CString::new(path) {
        Ok(p) => p,
        Err(_) => {
            eprintln!("ryke: {}: invalid path", path);
            return Err(1);
        }
    };
    let fd = unsafe { libc::open(cpath.as_ptr(), flags, libc::c_uint::from(mode)) };
    if fd < 0 {
        eprintln!("ryke: {}: {}", path, std::io::Error::last_os_error());
        return Err(1);
    }
    Ok(fd)
}

fn make_pipe() -> Result<(i32, i32), i32> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        eprintln!("ryke: pipe: {}", std::io::Error::last_os_error());
        return Err(1);
    }
    Ok((fds[0], fds[1]))
}

/// 引数列に glob 展開を適用する。マッチしないパターンはそのまま残る。
fn expand_glob_args(args: &[String], options: &ShellOptions) -> Vec<String> {
    if options.noglob {
        return args.to_vec();
    }
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if glob::has_glob_chars(arg) {
            out.extend(glob::expand(arg));
        } else {
            out.push(arg.clone());
        }
    }
    out
}

// ── パイプライン実行 ─────────────────────────────────────────────────

fn execute_pipeline(shell: &mut Shell, pipeline: &Pipeline, line: &str) -> i32 {
    let n = pipeline.stages.len();
    if n == 0 {
        return 0;
    }

    // パイプを先に全て作成する
    let mut pipes: Vec<[i32; 2]> = Vec::with_capacity(n.saturating_sub(1));
    for _ in 1..n {
        match make_pipe() {
            Ok((r, w)) => pipes.push([r, w]),
            Err(status) => {
                close_all_pipes(&mut pipes);
                return status;
            }
        }
    }

    let mut pids: Vec<pid_t> = Vec::with_capacity(n);
    let mut pgid: pid_t = 0;
    let mut abort_status: Option<i32> = None;

    for (i, stage) in pipeline.stages.iter().enumerate() {
        let args = expand_glob_args(&stage.args, &shell.options);

        let mut prep = match prepare_redirects(stage, &shell.options) {
            Ok(prep) => prep,
            Err(status) => {
                abort_status = Some(status);
                break;
            }
        };

        if args.is_empty() {
            // コマンドなしのリダイレクトのみ（`> file` 等）: open の副作用だけ残す
            close_fds(&prep.parent_close);
            if let Some((fd, _)) = prep.heredoc_write.take() {
                unsafe { libc::close(fd) };
            }
            continue;
        }

        // パイプ接続は fd 操作列の先頭（リダイレクトが上書きできるように）
        let mut dup2s = Vec::new();
        if i > 0 {
            dup2s.push((pipes[i - 1][0], libc::STDIN_FILENO));
        }
        if i < n - 1 {
            dup2s.push((pipes[i][1], libc::STDOUT_FILENO));
        }
        dup2s.append(&mut prep.io.dup2s);
        prep.io.dup2s = dup2s;

        // 子で閉じる fd: 全パイプ端 + 親が開いた fd + ヒアドキュメント書き込み端
        for p in &pipes {
            prep.io.close_fds.push(p[0]);
            prep.io.close_fds.push(p[1]);
        }
        prep.io.close_fds.extend_from_slice(&prep.parent_close);
        if let Some((write_fd, _)) = &prep.heredoc_write {
            prep.io.close_fds.push(*write_fd);
        }

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        match spawn::spawn(&arg_refs, pgid, &prep.io) {
            Ok(pid) => {
                if pgid == 0 {
                    pgid = pid;
                }
                // spawn 属性と合わせて親側でも設定し、レースを閉じる
                unsafe {
                    libc::setpgid(pid, pgid);
                }
                pids.push(pid);
            }
            Err(e) => {
                eprintln!("{}", e);
                close_fds(&prep.parent_close);
                if let Some((fd, _)) = prep.heredoc_write.take() {
                    unsafe { libc::close(fd) };
                }
                abort_status = Some(e.exit_status());
                break;
            }
        }

        // ヒアドキュメント本体を書き込む（子が読み端を持った後）
        if let Some((write_fd, body)) = prep.heredoc_write.take() {
            write_all(write_fd, &body);
            unsafe { libc::close(write_fd) };
        }

        close_fds(&prep.parent_close);

        // 消費済みのパイプ端を親側で閉じる
        if i > 0 && pipes[i - 1][0] >= 0 {
            unsafe { libc::close(pipes[i - 1][0]) };
            pipes[i - 1][0] = -1;
        }
        if i < n - 1 && pipes[i][1] >= 0 {
            unsafe { libc::close(pipes[i][1]) };
            pipes[i][1] = -1;
        }
    }

    close_all_pipes(&mut pipes);

    if let Some(status) = abort_status {
        // 中止: spawn 済みの子を回収してから返る
        for &pid in &pids {
            unsafe {
                libc::waitpid(pid, std::ptr::null_mut(), 0);
            }
        }
        return status;
    }

    if pids.is_empty() {
        return 0;
    }

    let display_cmd = line.strip_suffix('&').unwrap_or(line).trim().to_string();
    let last_pid = *pids.last().unwrap();

    if pipeline.background {
        let id = shell.jobs.add(pgid, display_cmd, JobStatus::Running);
        println!("[{}] {}", id, pgid);
        return 0;
    }

    if !shell.options.monitor {
        // monitor 無効: 端末は渡さないがジョブとして追跡しつつ待つ
        shell.jobs.add(pgid, display_cmd, JobStatus::Running);
        let (status, stopped) = job::wait_foreground(pgid, last_pid);
        if stopped {
            shell.jobs.update(pgid, JobStatus::Stopped, None);
        } else {
            shell.jobs.update(pgid, JobStatus::Done, Some(status));
        }
        return status;
    }

    signal::set_foreground_pgid(pgid);
    job::give_terminal_to(shell.terminal_fd, pgid);

    let (status, stopped) = job::wait_foreground(pgid, last_pid);

    job::take_terminal_back(shell.terminal_fd, shell.shell_pgid);
    signal::clear_foreground_pgid();

    if stopped {
        let id = shell.jobs.add(pgid, display_cmd.clone(), JobStatus::Stopped);
        eprintln!("\n[{}]  Stopped  {}", id, display_cmd);
    }

    status
}

fn close_fds(fds: &[i32]) {
    for &fd in fds {
        unsafe {
            libc::close(fd);
        }
    }
}

fn close_all_pipes(pipes: &mut [[i32; 2]]) {
    for p in pipes.iter_mut() {
        if p[0] >= 0 {
            unsafe { libc::close(p[0]) };
            p[0] = -1;
        }
        if p[1] >= 0 {
            unsafe { libc::close(p[1]) };
            p[1] = -1;
        }
    }
}

fn write_all(fd: i32, mut data: &[u8]) {
    while !data.is_empty() {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if n <= 0 {
            break;
        }
        data = &data[n as usize..];
    }
}

// ── Tests ───────────────────────────────────────────────────────
