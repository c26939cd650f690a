//! シェルの状態と REPL ループ。
//!
//! [`Shell`] がオプション・履歴・エイリアス・テーマ・ジョブテーブルを所有し、
//! 1 行の処理を「展開 → エイリアス解決 → パース → ヒアドキュメント収集 →
//! ビルトイン判定 → 実行」の順に通す。対話ループとスクリプト実行は
//! この共通経路（[`Shell::eval_line`]）を共有する。
//!
//! ## 永続化
//!
//! 行指向のドットファイル 3 つを起動時に読み、終了時に書く。
//!
//! | ファイル | 形式 |
//! |----------|------|
//! | `~/.ryke_history` | 1 行 1 コマンド、古い順 |
//! | `~/.ryke_aliases` | `name=value` |
//! | `~/.ryke_config` | `prompt_color=`, `prompt_template=`, `option=<name>:<0\|1>` |
//!
//! ワールドライタブルな状態ファイルは警告を出して読み込みは続行する。
//! `~/.rykerc` が存在すれば対話ループ開始前にスクリプトとして実行する。

use std::collections::BTreeMap;
use std::env;
use std::ffi::CStr;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use libc::pid_t;

use crate::builtins;
use crate::executor;
use crate::expand;
use crate::history::History;
use crate::job::{self, JobTable};
use crate::parser::{self, Pipeline, RedirectOp};
use crate::prompt::{self, PromptTheme};
use crate::signal;

// ── オプション ───────────────────────────────────────────────────────

/// シェル全体の動作フラグ。`set -o` / `set +o` と設定ファイルで切り替わる。
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// ジョブ制御（端末受け渡しとジョブ追跡）を有効にする。
    pub monitor: bool,
    /// `>` で既存ファイルの上書きを拒否する。
    pub noclobber: bool,
    /// 非 0 で終了したパイプラインでシェルを終了する。
    pub errexit: bool,
    /// 未設定変数の展開を失敗にする。
    pub nounset: bool,
    /// 実行する行を `+ line` として stderr に表示する。
    pub xtrace: bool,
    /// バックグラウンドジョブ完了を通知する。
    pub notify: bool,
    /// パス名展開（glob）を無効にする。
    pub noglob: bool,
    /// 直前と同じコマンドを履歴に積まない。
    pub ignore_dups: bool,
    /// 先頭が空白の行を履歴に積まない。
    pub ignore_space: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            monitor: true,
            noclobber: false,
            errexit: false,
            nounset: false,
            xtrace: false,
            notify: true,
            noglob: false,
            ignore_dups: true,
            ignore_space: true,
        }
    }
}

// ── 設定 ─────────────────────────────────────────────────────────────

/// 起動時の設定。ファイルパス未指定時は `$HOME` 直下のドットファイルを使う。
pub struct ShellConfig {
    pub history_limit: usize,
    pub history_file: Option<PathBuf>,
    pub alias_file: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub prompt_template: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            history_file: None,
            alias_file: None,
            config_file: None,
            prompt_template: "{color}{user}@{host}{reset}:{cwdcolor}{cwd}{reset}$ ".to_string(),
        }
    }
}

// ── 継続行ソース ─────────────────────────────────────────────────────

/// ヒアドキュメント本体の継続行を供給する。
/// 対話モードは `> ` プロンプト付きの標準入力、スクリプトモードは後続行。
pub trait LineSource {
    /// 次の継続行（末尾改行なし）。EOF で `None`。
    fn continuation_line(&mut self) -> Option<String>;
}

/// スクリプトの行列。メインループとヒアドキュメント収集が同じカーソルを進める。
pub struct ScriptSource {
    lines: Vec<String>,
    pos: usize,
}

impl ScriptSource {
    pub fn new(content: &str) -> Self {
        Self {
            lines: content.lines().map(String::from).collect(),
            pos: 0,
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        let line = self.lines.get(self.pos)?.clone();
        self.pos += 1;
        Some(line)
    }
}

impl LineSource for ScriptSource {
    fn continuation_line(&mut self) -> Option<String> {
        self.next_line()
    }
}

/// 対話入力。継続行では `> ` プロンプトを出す。
struct InteractiveSource {
    stdin: io::StdinLock<'static>,
}

impl InteractiveSource {
    fn new() -> Self {
        Self {
            stdin: io::stdin().lock(),
        }
    }

    /// メインループ用の 1 行読み取り。EOF で `None`。
    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.stdin.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

impl LineSource for InteractiveSource {
    fn continuation_line(&mut self) -> Option<String> {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = self.read_line()?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

// ── Shell ────────────────────────────────────────────────────────────

/// シェルの実行状態。REPL ループ全体で共有される。
pub struct Shell {
    pub options: ShellOptions,
    pub history: History,
    pub aliases: BTreeMap<String, String>,
    pub theme: PromptTheme,
    pub jobs: JobTable,
    pub prompt_template: String,
    /// シェル自身のプロセスグループ。端末を取り戻す先。
    pub shell_pgid: pid_t,
    /// 制御端末の fd（通常 stdin）。
    pub terminal_fd: i32,
    /// 直前のコマンドの終了ステータス。
    pub last_status: i32,
    /// `exit` / `errexit` で立ち、ループを終了させる。
    pub should_exit: bool,
    /// `should_exit` 時の終了コード。
    pub exit_status: i32,

    home: PathBuf,
    history_path: PathBuf,
    alias_path: PathBuf,
    config_path: PathBuf,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self::with_config(ShellConfig::default())
    }

    pub fn with_config(config: ShellConfig) -> Self {
        let home = home_directory();
        let history_path = config
            .history_file
            .unwrap_or_else(|| home.join(".ryke_history"));
        let alias_path = config.alias_file.unwrap_or_else(|| home.join(".ryke_aliases"));
        let config_path = config.config_file.unwrap_or_else(|| home.join(".ryke_config"));

        Self {
            options: ShellOptions::default(),
            history: History::new(config.history_limit),
            aliases: BTreeMap::new(),
            theme: PromptTheme::default(),
            jobs: JobTable::new(),
            prompt_template: config.prompt_template,
            shell_pgid: unsafe { libc::getpgrp() },
            terminal_fd: libc::STDIN_FILENO,
            last_status: 0,
            should_exit: false,
            exit_status: 0,
            home,
            history_path,
            alias_path,
            config_path,
        }
    }

    /// `exit` ビルトインと `errexit` から呼ばれる。
    pub fn request_exit(&mut self, status: i32) {
        self.should_exit = true;
        self.exit_status = status;
    }

    // ── ループ ───────────────────────────────────────────────────

    /// 対話 REPL。EOF または `exit` まで回り、終了コードを返す。
    pub fn run_interactive(&mut self) -> i32 {
        self.run_rc();

        let mut source = InteractiveSource::new();
        loop {
            if signal::take_reap_flag() {
                job::reap_background(&mut self.jobs, self.options.notify);
            }
            job::reap_background(&mut self.jobs, self.options.notify);
            self.jobs.prune_done();

            let mut rendered = prompt::render(&self.prompt_template, &self.theme);
            if self.last_status != 0 {
                rendered = format!("[{}] {}", self.last_status, rendered);
            }
            print!("{}", rendered);
            let _ = io::stdout().flush();

            let line = match source.read_line() {
                Some(line) => line,
                None => {
                    println!();
                    self.exit_status = self.last_status;
                    break;
                }
            };

            self.eval_line(&line, &mut source);
            if self.should_exit {
                break;
            }
        }

        self.save_state();
        self.exit_status
    }

    /// スクリプト実行。空行と `#` コメント行は読み飛ばす。
    pub fn run_script(&mut self, path: &str) -> i32 {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("ryke: failed to open script: {}: {}", path, e);
                return 1;
            }
        };
        self.run_lines(&content);
        self.save_state();
        if self.should_exit {
            self.exit_status
        } else {
            self.last_status
        }
    }

    fn run_lines(&mut self, content: &str) {
        let mut source = ScriptSource::new(content);
        while let Some(line) = source.next_line() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.eval_line(&line, &mut source);
            if self.should_exit {
                break;
            }
        }
    }

    fn run_rc(&mut self) {
        let rc = self.home.join(".rykerc");
        if let Ok(content) = fs::read_to_string(rc) {
            self.run_lines(&content);
        }
    }

    // ── 1 行の処理 ───────────────────────────────────────────────

    /// 1 行を「履歴 → 展開 → エイリアス → パース → ヒアドキュメント →
    /// ビルトイン/実行 → errexit」の順で処理する。
    pub fn eval_line(&mut self, raw: &str, source: &mut dyn LineSource) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }

        // 履歴ポリシー。ignore_space はトリム前の行で判定する
        let leading_space = raw.starts_with(' ') || raw.starts_with('\t');
        let duplicate = self.history.last_command() == Some(line);
        if !(self.options.ignore_space && leading_space)
            && !(self.options.ignore_dups && duplicate)
        {
            self.history.add(line);
        }

        let expanded = match expand::expand_line(line, &self.options) {
            Ok(expanded) => expanded,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        };
        let resolved = self.resolve_alias(&expanded);

        let mut pipelines = parser::parse(&resolved);
        if pipelines.is_empty() {
            return;
        }
        collect_heredocs(&mut pipelines, source);

        // 単一パイプライン・単一ステージのみビルトイン候補
        if pipelines.len() == 1
            && pipelines[0].stages.len() == 1
            && !pipelines[0].background
        {
            let command = pipelines[0].stages[0].clone();
            if let Some(status) = builtins::dispatch(self, &command) {
                self.last_status = status;
                if self.options.errexit && status != 0 && !self.should_exit {
                    self.request_exit(status);
                }
                return;
            }
        }

        let status = executor::execute(self, &pipelines, line);
        self.last_status = status;
        if self.options.errexit && status != 0 {
            self.request_exit(status);
        }
    }

    /// 展開済みの行の先頭トークンをエイリアス解決する（1 回のみ、非再帰）。
    pub fn resolve_alias(&self, line: &str) -> String {
        let trimmed = line.trim_start();
        let end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let first = &trimmed[..end];
        match self.aliases.get(first) {
            Some(value) => format!("{}{}", value, &trimmed[end..]),
            None => line.to_string(),
        }
    }

    // ── オプション ───────────────────────────────────────────────

    /// 名前でオプションを切り替える。未知の名前は `false`。
    pub fn apply_option(&mut self, name: &str, enabled: bool) -> bool {
        match name {
            "monitor" => self.options.monitor = enabled,
            "noclobber" => self.options.noclobber = enabled,
            "errexit" => self.options.errexit = enabled,
            "nounset" => self.options.nounset = enabled,
            "xtrace" => self.options.xtrace = enabled,
            "notify" => self.options.notify = enabled,
            "noglob" => self.options.noglob = enabled,
            "history-ignore-dups" => self.options.ignore_dups = enabled,
            "history-ignore-space" => self.options.ignore_space = enabled,
            _ => return false,
        }
        true
    }

    /// `(名前, 現在値)` の一覧。`set -o` の表示用。
    pub fn option_entries(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("monitor", self.options.monitor),
            ("noclobber", self.options.noclobber),
            ("errexit", self.options.errexit),
            ("nounset", self.options.nounset),
            ("xtrace", self.options.xtrace),
            ("notify", self.options.notify),
            ("noglob", self.options.noglob),
            ("history-ignore-dups", self.options.ignore_dups),
            ("history-ignore-space", self.options.ignore_space),
        ]
    }

    // ── 永続化 ───────────────────────────────────────────────────

    /// 履歴・エイリアス・設定ファイルを読み込む。起動時に 1 回呼ぶ。
    pub fn load_state(&mut self) {
        for path in [&self.history_path, &self.alias_path, &self.config_path] {
            warn_if_world_writable(path);
        }

        let history_path = self.history_path.clone();
        self.history.load(&history_path);

        if let Ok(file) = File::open(&self.alias_path) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                if let Some((name, value)) = line.split_once('=') {
                    self.aliases.insert(name.to_string(), value.to_string());
                }
            }
        }

        if let Ok(file) = File::open(&self.config_path) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                let Some((key, value)) = line.split_once('=') else {
                    continue;
                };
                match key {
                    "prompt_color" => {
                        self.theme.apply_color(value);
                    }
                    "prompt_template" => self.prompt_template = value.to_string(),
                    "option" => {
                        if let Some((name, flag)) = value.split_once(':') {
                            self.apply_option(name, flag == "1");
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// 履歴・エイリアス・設定ファイルを書き出す。終了時に呼ぶ。
    pub fn save_state(&self) {
        self.history.save(&self.history_path);

        if let Ok(mut file) = File::create(&self.alias_path) {
            for (name, value) in &self.aliases {
                let _ = writeln!(file, "{}={}", name, value);
            }
        }

        if let Ok(mut file) = File::create(&self.config_path) {
            let _ = writeln!(file, "prompt_color={}", self.theme.color_name());
            let _ = writeln!(file, "prompt_template={}", self.prompt_template);
            for (name, enabled) in self.option_entries() {
                let _ = writeln!(file, "option={}:{}", name, if enabled { 1 } else { 0 });
            }
        }
    }
}

/// `$HOME`、なければ passwd エントリ、最後は `.`。
fn home_directory() -> PathBuf {
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home);
    }
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if !pw.is_null() {
            return PathBuf::from(CStr::from_ptr((*pw).pw_dir).to_string_lossy().into_owned());
        }
    }
    PathBuf::from(".")
}

fn warn_if_world_writable(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        if meta.mode() & 0o002 != 0 {
            eprintln!(
                "ryke: warning: state file is world-writable: {}",
                path.display(),
            );
        }
    }
}

// ── ヒアドキュメント収集 ─────────────────────────────────────────────

/// 本体未収集のヒアドキュメントに継続行を供給する。
///
/// デリミタ行（`<<-` ではタブ除去後に比較）で終端する。EOF でも終端する。
/// 本体の変数展開は executor が書き込み時に行う。
pub fn collect_heredocs(pipelines: &mut [Pipeline], source: &mut dyn LineSource) {
    for pipeline in pipelines.iter_mut() {
        for stage in &mut pipeline.stages {
            for redirect in &mut stage.redirects {
                let RedirectOp::HereDoc {
                    delimiter,
                    strip_tabs,
                    body,
                    ..
                } = &mut redirect.op
                else {
                    continue;
                };
                if body.is_some() {
                    continue;
                }
                let mut text = String::new();
                while let Some(line) = source.continuation_line() {
                    let line = if *strip_tabs {
                        line.trim_start_matches('\t').to_string()
                    } else {
                        line
                    };
                    if line == *delimiter {
                        break;
                    }
                    text.push_str(&line);
                    text.push('\n');
                }
                *body = Some(text);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
