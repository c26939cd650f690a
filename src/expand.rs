//! 展開エンジン: パース前のテキスト前処理。
//!
//! 入力行 1 行をクォート状態 `(in_single, in_double)` を追跡しながら走査し、
//! 以下を 1 パスで展開する。展開は行ごとに 1 回だけ、トークナイズより前に行う。
//!
//! | 構文 | 展開 | クォート規則 |
//! |------|------|--------------|
//! | `\x` | `x` をリテラル出力（エスケープ 1 段消費）。`x` がクォート文字または `\` のときはエスケープごと残し、トークナイザに消費させる | シングル内では無効 |
//! | `~` / `~user` | `$HOME` / 該当ユーザのホーム | 非クォート・語頭のみ |
//! | `$NAME` | 環境変数値 | シングル内では無効 |
//! | `${NAME:-default}` | 値 or デフォルト | 同上 |
//! | `$(cmd)` | コマンド置換（stdout、末尾改行除去） | 同上 |
//! | `$((expr))` | 整数算術（左から右への畳み込み） | 同上 |
//!
//! シングルクォート内は一切展開しない。ダブルクォート内は `$` 系は生きるが
//! `~` は展開しない。クォート文字自体は出力にそのまま残り、トークナイザが除去する。
//!
//! 失敗するのは `nounset` 有効時の未設定変数参照のみ（[`ExpandError`]）。
//! 不正な構文（閉じていない `${` 等）は元のテキストのまま残す。

use std::env;
use std::ffi::CStr;
use std::fmt;

use crate::shell::ShellOptions;
use crate::spawn::{self, StageIo};

// ── エラー型 ──────────────────────────────────────────────────────

/// 展開の失敗。`nounset` 有効時のみ発生する。
#[derive(Debug, PartialEq)]
pub enum ExpandError {
    /// 未設定の変数を参照した。引数は変数名。
    UnsetVariable(String),
}

impl fmt::Display for ExpandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsetVariable(name) => write!(f, "ryke: unset variable: {}", name),
        }
    }
}

// ── 公開エントリポイント ──────────────────────────────────────────

/// 入力行全体を展開する。
pub fn expand_line(input: &str, options: &ShellOptions) -> Result<String, ExpandError> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut out: Vec<u8> = Vec::with_capacity(len);
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < len {
        let c = bytes[i];

        if c == b'\\' && !in_single && i + 1 < len {
            let next = bytes[i + 1];
            // クォート境界に効くバイトはエスケープを残したまま出力し、
            // トークナイザが区切りとして再解釈しないようにする。
            // エスケープ処理の残り 1 段はトークナイザが消費する
            if matches!(next, b'"' | b'\'' | b'\\') {
                out.push(c);
            }
            out.push(next);
            i += 2;
            continue;
        }

        if c == b'\'' && !in_double {
            in_single = !in_single;
            out.push(c);
            i += 1;
            continue;
        }
        if c == b'"' && !in_single {
            in_double = !in_double;
            out.push(c);
            i += 1;
            continue;
        }

        let at_word_start = i == 0 || bytes[i - 1].is_ascii_whitespace();
        if c == b'~' && !in_single && !in_double && at_word_start {
            let mut end = i + 1;
            while end < len && !bytes[end].is_ascii_whitespace() {
                end += 1;
            }
            out.extend_from_slice(expand_tilde(&input[i..end]).as_bytes());
            i = end;
            continue;
        }

        if c == b'$' && !in_single {
            // $(( 算術 )) — $( より先に判定する
            if i + 2 < len && bytes[i + 1] == b'(' && bytes[i + 2] == b'(' {
                let (expr, next) = scan_parens(input, i + 2);
                out.extend_from_slice(eval_arithmetic(&expr).to_string().as_bytes());
                i = (next + 1).min(len); // 外側の ')' を消費
                continue;
            }
            // $( コマンド置換 )
            if i + 1 < len && bytes[i + 1] == b'(' {
                let (cmd, next) = scan_parens(input, i + 1);
                out.extend_from_slice(capture_command(&cmd).as_bytes());
                i = next;
                continue;
            }
            // ${NAME} / ${NAME:-default}
            if i + 1 < len && bytes[i + 1] == b'{' {
                if let Some(close) = input[i + 2..].find('}') {
                    let expr = &input[i + 2..i + 2 + close];
                    let (name, default) = match expr.find(":-") {
                        Some(pos) => (&expr[..pos], Some(&expr[pos + 2..])),
                        None => (expr, None),
                    };
                    match env::var(name) {
                        Ok(value) => out.extend_from_slice(value.as_bytes()),
                        Err(_) => match default {
                            Some(d) => out.extend_from_slice(d.as_bytes()),
                            None if options.nounset => {
                                return Err(ExpandError::UnsetVariable(name.to_string()));
                            }
                            None => {}
                        },
                    }
                    i = i + 2 + close + 1;
                    continue;
                }
                // 閉じ '}' なし: `${...` をそのまま残す
                out.push(c);
                i += 1;
                continue;
            }
            // $NAME
            let start = i + 1;
            let mut end = start;
            if end < len && (bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
                end += 1;
                while end < len && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
            }
            if end == start {
                // 名前が続かない `$` はリテラル
                out.push(c);
                i += 1;
                continue;
            }
            let name = &input[start..end];
            match env::var(name) {
                Ok(value) => out.extend_from_slice(value.as_bytes()),
                Err(_) if options.nounset => {
                    return Err(ExpandError::UnsetVariable(name.to_string()));
                }
                Err(_) => {}
            }
            i = end;
            continue;
        }

        out.push(c);
        i += 1;
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

// ── チルダ展開 ────────────────────────────────────────────────────

/// `~` / `~user` をホームディレクトリに展開する。解決できなければそのまま返す。
pub fn expand_tilde(word: &str) -> String {
    if !word.starts_with('~') {
        return word.to_string();
    }

    let (user_part, rest) = match word.find('/') {
        Some(slash) => (&word[1..slash], &word[slash..]),
        None => (&word[1..], ""),
    };

    let home = if user_part.is_empty() {
        env::var("HOME").ok().or_else(passwd_home_self)
    } else {
        passwd_home_of(user_part)
    };

    match home {
        Some(home) => format!("{}{}", home, rest),
        None => word.to_string(),
    }
}

/// `getpwuid` で自 UID のホームを引く（`$HOME` 未設定時のフォールバック）。
fn passwd_home_self() -> Option<String> {
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if pw.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*pw).pw_dir).to_string_lossy().into_owned())
    }
}

/// `getpwnam` で指定ユーザのホームを引く。
fn passwd_home_of(user: &str) -> Option<String> {
    let cname = std::ffi::CString::new(user).ok()?;
    unsafe {
        let pw = libc::getpwnam(cname.as_ptr());
        if pw.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*pw).pw_dir).to_string_lossy().into_owned())
    }
}

// ── 括弧スキャン ──────────────────────────────────────────────────

/// `open` 位置の `(` から対応する `)` までを深さ追跡で読み取る。
/// 戻り値は `(内側のテキスト, 閉じ括弧の次の位置)`。閉じ括弧が
/// 見つからなければ入力末尾まで読む。
fn scan_parens(input: &str, open: usize) -> (String, usize) {
    let bytes = input.as_bytes();
    let mut depth = 0;
    let mut j = open;

    while j < bytes.len() {
        match bytes[j] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return (input[open + 1..j].to_string(), j + 1);
                }
            }
            _ => {}
        }
        j += 1;
    }

    (input[(open + 1).min(bytes.len())..].to_string(), j)
}

// ── コマンド置換 ──────────────────────────────────────────────────

/// `$(cmd)` の中身を `/bin/sh -c` で実行し stdout を取得する。
///
/// 再帰的に自前の実行パイプラインへ入らず、単一の子プロセスに委譲する。
/// 子はシェルのプロセスグループに留まり、端末シグナルを共有する。
/// 末尾の改行は除去する。失敗時は空文字列。
fn capture_command(cmd: &str) -> String {
    if cmd.is_empty() {
        return String::new();
    }

    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return String::new();
    }

    let io = StageIo {
        dup2s: vec![(fds[1], libc::STDOUT_FILENO)],
        close_fds: vec![fds[0], fds[1]],
    };
    let pid = match spawn::spawn(&["/bin/sh", "-c", cmd], unsafe { libc::getpgrp() }, &io) {
        Ok(pid) => pid,
        Err(_) => {
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return String::new();
        }
    };
    unsafe { libc::close(fds[1]) };

    let mut output = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fds[0], buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        output.extend_from_slice(&buf[..n as usize]);
    }
    unsafe {
        libc::close(fds[0]);
        libc::waitpid(pid, std::ptr::null_mut(), 0);
    }

    let mut text = String::from_utf8_lossy(&output).into_owned();
    while text.ends_with('\n') || text.ends_with('\r') {
        text.pop();
    }
    text
}

// ── 算術展開 ──────────────────────────────────────────────────────

/// `$((expr))` の中身を評価する。
///
/// `+ - * /` を優先順位なしで左から右に畳み込む整数演算。
/// ゼロ除算はアキュムレータを保持する（互換挙動として維持）。
fn eval_arithmetic(expr: &str) -> i64 {
    let bytes = expr.as_bytes();
    let len = bytes.len();
    let mut total: i64 = 0;
    let mut op = b'+';
    let mut i = 0;

    while i < len {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut negative = false;
        if i < len && (bytes[i] == b'+' || bytes[i] == b'-') {
            negative = bytes[i] == b'-';
            i += 1;
        }
        let mut value: i64 = 0;
        while i < len && bytes[i].is_ascii_digit() {
            value = value * 10 + i64::from(bytes[i] - b'0');
            i += 1;
        }
        if negative {
            value = -value;
        }

        match op {
            b'+' => total += value,
            b'-' => total -= value,
            b'*' => total *= value,
            b'/' => {
                if value != 0 {
                    total /= value;
                }
            }
            _ => {}
        }

        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < len {
            op = bytes[i];
            i += 1;
        }
    }

    total
}

// ── Tests ───────────────────────────────────────────────────────
