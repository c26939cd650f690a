//! ビルトインコマンドの実装。
//!
//! ビルトインは fork/spawn を経由せずプロセス内で直接実行される。
//! ディスパッチは「単一パイプライン・単一ステージで先頭引数が登録名」の
//! 場合のみ（判定はシェルループ側）。[`dispatch`] が `Some(status)` を
//! 返せば処理済み、`None` なら外部コマンドとして executor に委ねる。
//!
//! stdout のファイルリダイレクト（`>` / `>>`）はビルトインでも有効で、
//! 出力先の `Write` を差し替えて実現する。それ以外のリダイレクトは無視する。
//!
//! | 名前 | 動作 |
//! |------|------|
//! | `exit [n]` | シェル終了（省略時は直前のステータス） |
//! | `cd [dir]` | ディレクトリ移動（省略時 `$HOME`） |
//! | `pwd` | カレントディレクトリ表示 |
//! | `history` | 履歴の番号付き一覧 |
//! | `alias` / `unalias` | エイリアス定義・一覧・削除 |
//! | `theme <color>` | プロンプトカラー変更 |
//! | `set [-o\|+o name]` | シェルオプションの表示・切り替え |
//! | `export` / `unset` | 環境変数の設定・削除 |
//! | `jobs [-l]` | ジョブ一覧（`-l` で pgid も表示） |
//! | `fg [id]` / `bg [id]` | ジョブのフォアグラウンド移行 / バックグラウンド再開 |

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::job;
use crate::parser::{Command, Redirect, RedirectOp};
use crate::shell::Shell;

/// 登録済みビルトイン名か。
pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "exit"
            | "cd"
            | "pwd"
            | "history"
            | "alias"
            | "unalias"
            | "theme"
            | "set"
            | "export"
            | "unset"
            | "jobs"
            | "fg"
            | "bg"
    )
}

/// ビルトインとしての実行を試みる。
///
/// 戻り値:
/// - `Some(status)` — ビルトインとして実行済み
/// - `None` — 該当なし（外部コマンドとして実行すべき）
pub fn dispatch(shell: &mut Shell, command: &Command) -> Option<i32> {
    let name = command.args.first()?;
    if !is_builtin(name) {
        return None;
    }

    let args: Vec<&str> = command.args.iter().map(|s| s.as_str()).collect();
    let status = match open_stdout(&command.redirects, shell.options.noclobber) {
        Ok(Some(mut file)) => run_builtin(shell, &args, &mut file),
        Ok(None) => run_builtin(shell, &args, &mut io::stdout()),
        Err(status) => status,
    };
    Some(status)
}

/// stdout リダイレクト先を開く。指定がなければ `Ok(None)`。
/// 複数指定時は最後の指定が有効（bash 互換）。
fn open_stdout(redirects: &[Redirect], noclobber: bool) -> Result<Option<File>, i32> {
    for redirect in redirects.iter().rev() {
        if redirect.fd != 1 {
            continue;
        }
        if let RedirectOp::WriteFile { path, append } = &redirect.op {
            let result = if *append {
                OpenOptions::new().create(true).append(true).open(path)
            } else if noclobber {
                OpenOptions::new().create_new(true).write(true).open(path)
            } else {
                File::create(path)
            };
            return match result {
                Ok(file) => Ok(Some(file)),
                Err(e) => {
                    eprintln!("ryke: {}: {}", path, e);
                    Err(1)
                }
            };
        }
    }
    Ok(None)
}

fn run_builtin(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> i32 {
    match args[0] {
        "exit" => builtin_exit(shell, args),
        "cd" => builtin_cd(args),
        "pwd" => builtin_pwd(out),
        "history" => builtin_history(shell, out),
        "alias" => builtin_alias(shell, args, out),
        "unalias" => builtin_unalias(shell, args),
        "theme" => builtin_theme(shell, args, out),
        "set" => builtin_set(shell, args, out),
        "export" => builtin_export(args, out),
        "unset" => builtin_unset(args),
        "jobs" => builtin_jobs(shell, args, out),
        "fg" => builtin_fg(shell, args),
        "bg" => builtin_bg(shell, args),
        _ => unreachable!("dispatch checks is_builtin"),
    }
}

/// `exit [N]` — シェルを終了する。N 省略時は直前のステータス。
fn builtin_exit(shell: &mut Shell, args: &[&str]) -> i32 {
    let status = match args.get(1) {
        Some(arg) => match arg.parse::<i32>() {
            Ok(n) => n,
            Err(_) => {
                eprintln!("ryke: exit: {}: numeric argument required", arg);
                2
            }
        },
        None => shell.last_status,
    };
    shell.request_exit(status);
    status
}

/// `cd [dir]` — カレントディレクトリを変更する。省略時は `$HOME`。
fn builtin_cd(args: &[&str]) -> i32 {
    let target = match args.get(1) {
        Some(dir) => (*dir).to_string(),
        None => match env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("ryke: cd: HOME not set");
                return 1;
            }
        },
    };

    match env::set_current_dir(Path::new(&target)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("ryke: cd: {}: {}", target, e);
            1
        }
    }
}

fn builtin_pwd(out: &mut dyn Write) -> i32 {
    match env::current_dir() {
        Ok(dir) => {
            let _ = writeln!(out, "{}", dir.display());
            0
        }
        Err(e) => {
            eprintln!("ryke: pwd: {}", e);
            1
        }
    }
}

fn builtin_history(shell: &mut Shell, out: &mut dyn Write) -> i32 {
    for (index, entry) in shell.history.iter().enumerate() {
        let _ = writeln!(out, "{:5}  {}", index + 1, entry.command);
    }
    0
}

/// `alias` — 一覧表示。`alias name=value` — 定義。`alias name` — 1 件表示。
fn builtin_alias(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> i32 {
    if args.len() == 1 {
        for (name, value) in &shell.aliases {
            let _ = writeln!(out, "alias {}='{}'", name, value);
        }
        return 0;
    }

    let mut status = 0;
    for arg in &args[1..] {
        match arg.split_once('=') {
            Some((name, value)) => {
                let value = value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .unwrap_or(value);
                shell.aliases.insert(name.to_string(), value.to_string());
            }
            None => match shell.aliases.get(*arg) {
                Some(value) => {
                    let _ = writeln!(out, "alias {}='{}'", arg, value);
                }
                None => {
                    eprintln!("ryke: alias: {}: not found", arg);
                    status = 1;
                }
            },
        }
    }
    status
}

fn builtin_unalias(shell: &mut Shell, args: &[&str]) -> i32 {
    let mut status = 0;
    for name in &args[1..] {
        if shell.aliases.remove(*name).is_none() {
            eprintln!("ryke: unalias: {}: not found", name);
            status = 1;
        }
    }
    status
}

fn builtin_theme(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> i32 {
    match args.get(1) {
        Some(color) => {
            if shell.theme.apply_color(color) {
                0
            } else {
                eprintln!("ryke: theme: unknown color: {}", color);
                1
            }
        }
        None => {
            let _ = writeln!(out, "usage: theme <red|green|yellow|blue|magenta|cyan>");
            1
        }
    }
}

/// `set` / `set -o` — オプション一覧。`set -o name` / `set +o name` — 切り替え。
fn builtin_set(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> i32 {
    match (args.get(1), args.get(2)) {
        (None, _) | (Some(&"-o"), None) => {
            for (name, enabled) in shell.option_entries() {
                let _ = writeln!(out, "{:<22} {}", name, if enabled { "on" } else { "off" });
            }
            0
        }
        (Some(&"-o"), Some(name)) | (Some(&"+o"), Some(name)) => {
            let enable = args[1] == "-o";
            if shell.apply_option(name, enable) {
                0
            } else {
                eprintln!("ryke: set: {}: unknown option", name);
                1
            }
        }
        (Some(flag), _) => {
            eprintln!("ryke: set: {}: usage: set [-o|+o name]", flag);
            1
        }
    }
}

/// `export NAME=VALUE ...` — 環境変数を設定する。引数なしは一覧表示。
fn builtin_export(args: &[&str], out: &mut dyn Write) -> i32 {
    if args.len() == 1 {
        for (name, value) in env::vars() {
            let _ = writeln!(out, "{}={}", name, value);
        }
        return 0;
    }
    for arg in &args[1..] {
        if let Some((name, value)) = arg.split_once('=') {
            env::set_var(name, value);
        }
    }
    0
}

fn builtin_unset(args: &[&str]) -> i32 {
    for name in &args[1..] {
        env::remove_var(name);
    }
    0
}

/// `jobs [-l]` — ジョブ一覧。`-l` で pgid も表示する。
fn builtin_jobs(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> i32 {
    let verbose = args.iter().any(|a| *a == "-l");
    shell.jobs.list(verbose, out);
    0
}

/// `fg [id]` / `bg [id]` のジョブ ID 引数。`%N` 形式も受け付ける。
fn parse_job_id(arg: Option<&&str>) -> Result<Option<usize>, ()> {
    match arg {
        None => Ok(None),
        Some(text) => {
            let text = text.strip_prefix('%').unwrap_or(text);
            text.parse::<usize>().map(Some).map_err(|_| ())
        }
    }
}

fn builtin_fg(shell: &mut Shell, args: &[&str]) -> i32 {
    let id = match parse_job_id(args.get(1)) {
        Ok(id) => id,
        Err(()) => {
            eprintln!("ryke: fg: {}: invalid job id", args[1]);
            return 1;
        }
    };
    if job::foreground_job(
        &mut shell.jobs,
        id,
        shell.terminal_fd,
        shell.shell_pgid,
        shell.options.monitor,
    ) {
        0
    } else {
        eprintln!("ryke: fg: no such job");
        1
    }
}

fn builtin_bg(shell: &mut Shell, args: &[&str]) -> i32 {
    let id = match parse_job_id(args.get(1)) {
        Ok(id) => id,
        Err(()) => {
            eprintln!("ryke: bg: {}: invalid job id", args[1]);
            return 1;
        }
    };
    if job::background_job(&mut shell.jobs, id, shell.options.monitor) {
        0
    } else {
        eprintln!("ryke: bg: no such job");
        1
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::parser;
    use crate::testutil::exec_lock as lock;
    use std::fs;

    fn shell() -> Shell {
        let mut shell = Shell::new();
        shell.options.monitor = false;
        shell
    }

    fn capture(shell: &mut Shell, args: &[&str]) -> (i32, String) {
        let mut out = Vec::new();
        let status = run_builtin(shell, args, &mut out);
        (status, String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn registry_knows_builtins() {
        for name in ["exit", "cd", "jobs", "fg", "bg", "theme", "set"] {
            assert!(is_builtin(name));
        }
        assert!(!is_builtin("ls"));
        assert!(!is_builtin(""));
    }

    #[test]
    fn dispatch_ignores_external_commands() {
        let mut sh = shell();
        let command = Command {
            args: vec!["definitely-external".into()],
            redirects: Vec::new(),
        };
        assert!(dispatch(&mut sh, &command).is_none());
    }

    #[test]
    fn exit_uses_last_status_by_default() {
        let mut sh = shell();
        sh.last_status = 4;
        let (status, _) = capture(&mut sh, &["exit"]);
        assert_eq!(status, 4);
        assert!(sh.should_exit);
        assert_eq!(sh.exit_status, 4);
    }

    #[test]
    fn exit_with_bad_argument() {
        let mut sh = shell();
        let (status, _) = capture(&mut sh, &["exit", "notanumber"]);
        assert_eq!(status, 2);
        assert!(sh.should_exit);
    }

    #[test]
    fn cd_and_pwd_roundtrip() {
        let _g = lock();
        let mut sh = shell();
        let before = env::current_dir().unwrap();

        let (status, _) = capture(&mut sh, &["cd", "/tmp"]);
        assert_eq!(status, 0);
        let (status, output) = capture(&mut sh, &["pwd"]);
        assert_eq!(status, 0);
        assert_eq!(output.trim_end(), "/tmp");

        env::set_current_dir(before).unwrap();
    }

    #[test]
    fn cd_missing_directory_fails() {
        let mut sh = shell();
        let (status, _) = capture(&mut sh, &["cd", "/no/such/dir/zz"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn alias_define_list_remove() {
        let mut sh = shell();
        let (status, _) = capture(&mut sh, &["alias", "ll=ls -l"]);
        assert_eq!(status, 0);
        assert_eq!(sh.aliases.get("ll").map(String::as_str), Some("ls -l"));

        let (_, output) = capture(&mut sh, &["alias"]);
        assert!(output.contains("alias ll='ls -l'"));

        let (status, _) = capture(&mut sh, &["unalias", "ll"]);
        assert_eq!(status, 0);
        assert!(sh.aliases.is_empty());

        let (status, _) = capture(&mut sh, &["unalias", "ll"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn alias_strips_single_quotes() {
        let mut sh = shell();
        capture(&mut sh, &["alias", "gs='git status'"]);
        assert_eq!(sh.aliases.get("gs").map(String::as_str), Some("git status"));
    }

    #[test]
    fn theme_changes_color() {
        let mut sh = shell();
        let (status, _) = capture(&mut sh, &["theme", "red"]);
        assert_eq!(status, 0);
        assert_eq!(sh.theme.color_name(), "red");

        let (status, _) = capture(&mut sh, &["theme", "polka-dot"]);
        assert_eq!(status, 1);
        assert_eq!(sh.theme.color_name(), "red");
    }

    #[test]
    fn set_toggles_options() {
        let mut sh = shell();
        let (status, _) = capture(&mut sh, &["set", "-o", "errexit"]);
        assert_eq!(status, 0);
        assert!(sh.options.errexit);

        let (status, _) = capture(&mut sh, &["set", "+o", "errexit"]);
        assert_eq!(status, 0);
        assert!(!sh.options.errexit);

        let (status, _) = capture(&mut sh, &["set", "-o", "bogus"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn set_lists_options() {
        let mut sh = shell();
        let (status, output) = capture(&mut sh, &["set", "-o"]);
        assert_eq!(status, 0);
        assert!(output.contains("monitor"));
        assert!(output.contains("noclobber"));
    }

    #[test]
    fn export_and_unset() {
        let mut sh = shell();
        capture(&mut sh, &["export", "RYKE_T_EXPORT=works"]);
        assert_eq!(env::var("RYKE_T_EXPORT").unwrap(), "works");

        capture(&mut sh, &["unset", "RYKE_T_EXPORT"]);
        assert!(env::var("RYKE_T_EXPORT").is_err());
    }

    #[test]
    fn jobs_lists_table() {
        let mut sh = shell();
        sh.jobs.add(1234, "sleep 9".into(), JobStatus::Running);

        let (status, output) = capture(&mut sh, &["jobs"]);
        assert_eq!(status, 0);
        assert_eq!(output, "[1] Running sleep 9\n");

        let (_, output) = capture(&mut sh, &["jobs", "-l"]);
        assert_eq!(output, "[1] 1234 Running sleep 9\n");
    }

    #[test]
    fn fg_bg_report_missing_jobs() {
        let mut sh = shell();
        sh.options.monitor = true;
        let (status, _) = capture(&mut sh, &["fg"]);
        assert_eq!(status, 1);
        let (status, _) = capture(&mut sh, &["bg", "%7"]);
        assert_eq!(status, 1);
        let (status, _) = capture(&mut sh, &["fg", "abc"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn fg_bg_disabled_without_monitor() {
        let mut sh = shell();
        sh.jobs.add(55, "x".into(), JobStatus::Stopped);
        let (status, _) = capture(&mut sh, &["fg", "1"]);
        assert_eq!(status, 1);
        let (status, _) = capture(&mut sh, &["bg", "1"]);
        assert_eq!(status, 1);
    }

    #[test]
    fn builtin_honors_stdout_redirect() {
        let mut sh = shell();
        let path = format!("/tmp/ryke-test-builtin-out-{}", std::process::id());
        let _ = fs::remove_file(&path);

        let pipelines = parser::parse(&format!("pwd > {}", path));
        let status = dispatch(&mut sh, &pipelines[0].stages[0]).unwrap();
        assert_eq!(status, 0);
        assert!(!fs::read_to_string(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }
}
