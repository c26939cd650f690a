//! トークナイザ + ブレース展開 + パーサー: 展開済みの行からパイプライン列を構築する。
//!
//! 処理順: [`tokenize`]（クォート対応の型付きトークン化）→
//! [`expand_braces`]（語トークンごとの `{a,b}` / `{n..m}` 展開）→
//! [`parse`]（線形ステートマシンで [`Pipeline`] 列へ変換）。
//!
//! ## 演算子（最長一致）
//!
//! | 演算子 | 意味 |
//! |--------|------|
//! | `\|\|` `&&` | パイプライン連結（直前の終了ステータスで条件実行） |
//! | `\|&` | パイプ + stderr 合流 |
//! | `\|` | パイプライン区切り |
//! | `&>` | stdout と stderr をファイルへ（上書き） |
//! | `<<-` / `<<` / `<<<` | ヒアドキュメント（タブ除去/通常）/ ヒアストリング |
//! | `>>` `>` `<` | stdout 追記/上書き、stdin |
//! | `N>` `N>>` | fd 指定リダイレクト（N は 1 桁、トークン先頭のみ） |
//! | `&` | バックグラウンド実行（パイプラインを区切る） |
//!
//! `N>&M`（fd 複製）はトークナイザではなくパーサーが `N>` `&` `M` の
//! 3 トークンから組み立てる。クォートされたトークンは演算子として扱わない。
//!
//! パーサーは失敗しない。不正な並びはベストエフォートで解釈し、
//! 空のパイプラインは捨てる。

use std::env;

// ── AST ─────────────────────────────────────────────────────────────

/// 直前のパイプラインとの連結条件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainCondition {
    /// 無条件に実行。
    None,
    /// `&&` — 直前の終了ステータスが 0 のときのみ実行。
    And,
    /// `||` — 直前の終了ステータスが非 0 のときのみ実行。
    Or,
}

/// リダイレクトの操作種別。
#[derive(Debug, Clone, PartialEq)]
pub enum RedirectOp {
    /// `fd< path` — ファイルから読み取り。
    ReadFile(String),
    /// `fd> path` / `fd>> path` — ファイルへ書き込み。
    WriteFile { path: String, append: bool },
    /// `fd>&N` — fd を N の複製にする。
    DupFd(i32),
    /// `<< delim` / `<<- delim` — ヒアドキュメント。本体はシェルループが
    /// 継続行から収集して `body` に格納する。
    HereDoc {
        delimiter: String,
        expand: bool,
        strip_tabs: bool,
        body: Option<String>,
    },
    /// `<<< word` — ヒアストリング。
    HereString(String),
}

/// リダイレクト 1 件。`redirects` リスト内の順序は入力のテキスト順。
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub fd: i32,
    pub op: RedirectOp,
}

/// パイプラインの 1 ステージ。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub args: Vec<String>,
    pub redirects: Vec<Redirect>,
}

impl Command {
    fn is_empty(&self) -> bool {
        self.args.is_empty() && self.redirects.is_empty()
    }
}

/// パイプで接続されたコマンド列と、その実行条件。
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Command>,
    pub condition: ChainCondition,
    pub background: bool,
}

// ── トークナイザ ─────────────────────────────────────────────────────

/// トークン。`quoted` は一部でもクォート由来であれば立つ
/// （IFS 分割の抑止と、演算子文字列との区別に使う）。
#[derive(Debug, PartialEq)]
pub struct Token {
    pub text: String,
    pub quoted: bool,
}

/// 展開済みの行をトークン列に変換する。
///
/// クォート文字はトークンテキストに含めず `quoted` フラグに反映する。
/// 演算子は最長一致で独立トークンとして切り出す。
/// バックスラッシュはシングルクォート外でのみエスケープとして働き
/// （展開側が残した `\"` 等を消費する）、シングルクォート内では
/// そのままトークンに入る。
pub fn tokenize(input: &str) -> Vec<Token> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut tokens: Vec<Token> = Vec::new();
    let mut current = Vec::<u8>::new();
    let mut quoted = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut escaping = false;
    let mut i = 0;

    macro_rules! flush {
        () => {
            if !current.is_empty() || quoted {
                tokens.push(Token {
                    text: String::from_utf8_lossy(&current).into_owned(),
                    quoted,
                });
                current.clear();
                quoted = false;
            }
        };
    }
    macro_rules! operator {
        ($text:expr, $width:expr) => {{
            flush!();
            tokens.push(Token {
                text: $text.to_string(),
                quoted: false,
            });
            i += $width;
            continue;
        }};
    }

    while i < len {
        let c = bytes[i];

        if escaping {
            current.push(c);
            escaping = false;
            i += 1;
            continue;
        }
        // シングルクォート内のバックスラッシュはリテラル。展開側が
        // エスケープ処理を済ませており、ここに届くバックスラッシュは
        // クォート文字等を区切りとして解釈させないための 1 段だけ
        if c == b'\\' && !in_single {
            escaping = true;
            i += 1;
            continue;
        }

        if c == b'\'' && !in_double {
            in_single = !in_single;
            quoted = true;
            i += 1;
            continue;
        }
        if c == b'"' && !in_single {
            in_double = !in_double;
            quoted = true;
            i += 1;
            continue;
        }

        if !in_single && !in_double {
            if c.is_ascii_whitespace() {
                flush!();
                i += 1;
                continue;
            }

            let next = bytes.get(i + 1).copied();
            let next2 = bytes.get(i + 2).copied();

            match c {
                b'&' if next == Some(b'&') => operator!("&&", 2),
                b'&' if next == Some(b'>') => operator!("&>", 2),
                b'&' => operator!("&", 1),
                b'|' if next == Some(b'|') => operator!("||", 2),
                b'|' if next == Some(b'&') => operator!("|&", 2),
                b'|' => operator!("|", 1),
                b'<' if next == Some(b'<') && next2 == Some(b'<') => operator!("<<<", 3),
                b'<' if next == Some(b'<') && next2 == Some(b'-') => operator!("<<-", 3),
                b'<' if next == Some(b'<') => operator!("<<", 2),
                b'<' => operator!("<", 1),
                b'>' if next == Some(b'>') => operator!(">>", 2),
                b'>' => operator!(">", 1),
                // fd 指定形はトークン先頭のみ（`file2>out` は語 `file2` + `>`）
                d if d.is_ascii_digit()
                    && current.is_empty()
                    && !quoted
                    && next == Some(b'>') =>
                {
                    if next2 == Some(b'>') {
                        operator!(format!("{}>>", d as char), 3);
                    }
                    operator!(format!("{}>", d as char), 2);
                }
                _ => {}
            }
        }

        current.push(c);
        i += 1;
    }

    // 末尾で宙に浮いたエスケープはリテラルとして残す
    if escaping {
        current.push(b'\\');
    }
    flush!();
    tokens
}

/// トークンテキストが演算子かどうか（非クォート前提で呼ぶ）。
fn is_operator(text: &str) -> bool {
    matches!(
        text,
        "|" | "|&" | "||" | "&&" | "&" | "&>" | "<" | ">" | ">>" | "<<" | "<<-" | "<<<"
    ) || fd_redirect(text).is_some()
}

/// `N>` / `N>>` 形式なら `(fd, append)` を返す。
fn fd_redirect(text: &str) -> Option<(i32, bool)> {
    let bytes = text.as_bytes();
    match bytes {
        [d, b'>'] if d.is_ascii_digit() => Some((i32::from(d - b'0'), false)),
        [d, b'>', b'>'] if d.is_ascii_digit() => Some((i32::from(d - b'0'), true)),
        _ => None,
    }
}

// ── ブレース展開 ─────────────────────────────────────────────────────

/// 語トークンごとに `{a,b,c}` / `{n..m}` を展開する。
///
/// 対応する `{...}` のうち最初の 1 組のみを展開する（ネストは展開せず
/// 要素としてそのまま残る）。整数レンジは `n` から `m` へ向かって進む。
/// 不正な形（閉じ括弧なし、空の中身）はトークンを変更しない。
pub fn expand_braces(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !token.quoted && is_operator(&token.text) {
            out.push(token);
            continue;
        }
        match expand_one_brace(&token.text) {
            Some(parts) => {
                for part in parts {
                    out.push(Token {
                        text: part,
                        quoted: token.quoted,
                    });
                }
            }
            None => out.push(token),
        }
    }
    out
}

/// 1 語の最初の対応ブレースを展開する。展開不要なら `None`。
fn expand_one_brace(word: &str) -> Option<Vec<String>> {
    let bytes = word.as_bytes();
    let open = word.find('{')?;

    let mut depth = 0;
    let mut close = None;
    for (j, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(j);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;

    let prefix = &word[..open];
    let inner = &word[open + 1..close];
    let suffix = &word[close + 1..];
    if inner.is_empty() {
        return None;
    }

    // 整数レンジ {n..m}
    if let Some(dots) = inner.find("..") {
        let (lo_s, hi_s) = (&inner[..dots], &inner[dots + 2..]);
        if let (Ok(from), Ok(to)) = (lo_s.parse::<i64>(), hi_s.parse::<i64>()) {
            let step: i64 = if from <= to { 1 } else { -1 };
            let mut parts = Vec::new();
            let mut v = from;
            loop {
                parts.push(format!("{}{}{}", prefix, v, suffix));
                if v == to {
                    break;
                }
                v += step;
            }
            return Some(parts);
        }
    }

    // トップレベルのカンマで分割
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (j, &b) in inner.as_bytes().iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&inner[start..j]);
                start = j + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);

    Some(
        parts
            .into_iter()
            .map(|p| format!("{}{}{}", prefix, p, suffix))
            .collect(),
    )
}

// ── パーサー ────────────────────────────────────────────────────────

/// トークン列を線形に消費してパイプライン列を構築する。
///
/// 空入力 → 空 Vec。パーサーは失敗せず、リダイレクト演算子の後に
/// ターゲットがない等の不正は読み飛ばす。
pub fn parse(input: &str) -> Vec<Pipeline> {
    let tokens = expand_braces(tokenize(input));
    let ifs = env::var("IFS").unwrap_or_else(|_| " \t\n".to_string());

    let mut pipelines: Vec<Pipeline> = Vec::new();
    let mut stages: Vec<Command> = Vec::new();
    let mut command = Command::default();
    let mut background = false;
    let mut pending = ChainCondition::None;

    macro_rules! flush_command {
        () => {
            if !command.is_empty() {
                stages.push(std::mem::take(&mut command));
            }
        };
    }
    macro_rules! flush_pipeline {
        () => {
            flush_command!();
            if !stages.is_empty() {
                pipelines.push(Pipeline {
                    stages: std::mem::take(&mut stages),
                    condition: pending,
                    background,
                });
            }
            background = false;
            pending = ChainCondition::None;
        };
    }

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];

        if !token.quoted {
            match token.text.as_str() {
                "|" => {
                    flush_command!();
                    i += 1;
                    continue;
                }
                "|&" => {
                    command.redirects.push(Redirect {
                        fd: 2,
                        op: RedirectOp::DupFd(1),
                    });
                    flush_command!();
                    i += 1;
                    continue;
                }
                "&&" | "||" => {
                    let next = if token.text == "&&" {
                        ChainCondition::And
                    } else {
                        ChainCondition::Or
                    };
                    flush_pipeline!();
                    pending = next;
                    i += 1;
                    continue;
                }
                "&" => {
                    // `cmd & x` は background の cmd と独立したパイプライン x
                    background = true;
                    flush_pipeline!();
                    i += 1;
                    continue;
                }
                "<" => {
                    if let Some(target) = tokens.get(i + 1) {
                        command.redirects.push(Redirect {
                            fd: 0,
                            op: RedirectOp::ReadFile(target.text.clone()),
                        });
                        i += 2;
                    } else {
                        i += 1;
                    }
                    continue;
                }
                ">" | ">>" => {
                    let append = token.text == ">>";
                    if !append {
                        if let Some(dup) = dup_target(&tokens, i) {
                            command.redirects.push(Redirect {
                                fd: 1,
                                op: RedirectOp::DupFd(dup),
                            });
                            i += 3;
                            continue;
                        }
                    }
                    if let Some(target) = tokens.get(i + 1) {
                        command.redirects.push(Redirect {
                            fd: 1,
                            op: RedirectOp::WriteFile {
                                path: target.text.clone(),
                                append,
                            },
                        });
                        i += 2;
                    } else {
                        i += 1;
                    }
                    continue;
                }
                "&>" => {
                    if let Some(target) = tokens.get(i + 1) {
                        command.redirects.push(Redirect {
                            fd: 1,
                            op: RedirectOp::WriteFile {
                                path: target.text.clone(),
                                append: false,
                            },
                        });
                        command.redirects.push(Redirect {
                            fd: 2,
                            op: RedirectOp::DupFd(1),
                        });
                        i += 2;
                    } else {
                        i += 1;
                    }
                    continue;
                }
                "<<" | "<<-" => {
                    let strip_tabs = token.text == "<<-";
                    if let Some(delim) = tokens.get(i + 1) {
                        command.redirects.push(Redirect {
                            fd: 0,
                            op: RedirectOp::HereDoc {
                                delimiter: delim.text.clone(),
                                expand: !delim.quoted,
                                strip_tabs,
                                body: None,
                            },
                        });
                        i += 2;
                    } else {
                        i += 1;
                    }
                    continue;
                }
                "<<<" => {
                    if let Some(word) = tokens.get(i + 1) {
                        command.redirects.push(Redirect {
                            fd: 0,
                            op: RedirectOp::HereString(word.text.clone()),
                        });
                        i += 2;
                    } else {
                        i += 1;
                    }
                    continue;
                }
                text => {
                    if let Some((fd, append)) = fd_redirect(text) {
                        if !append {
                            if let Some(dup) = dup_target(&tokens, i) {
                                command.redirects.push(Redirect {
                                    fd,
                                    op: RedirectOp::DupFd(dup),
                                });
                                i += 3;
                                continue;
                            }
                        }
                        if let Some(target) = tokens.get(i + 1) {
                            command.redirects.push(Redirect {
                                fd,
                                op: RedirectOp::WriteFile {
                                    path: target.text.clone(),
                                    append,
                                },
                            });
                            i += 2;
                        } else {
                            i += 1;
                        }
                        continue;
                    }
                }
            }
        }

        // 語トークン: クォートなしは IFS で分割、クォートありは 1 引数
        if token.quoted {
            command.args.push(token.text.clone());
        } else {
            for field in token.text.split(|c| ifs.contains(c)) {
                if !field.is_empty() {
                    command.args.push(field.to_string());
                }
            }
        }
        i += 1;
    }

    flush_pipeline!();
    pipelines
}

/// `N>` / `>` の直後が `&` `M`（M は 1 桁の数字）であれば M を返す。
fn dup_target(tokens: &[Token], i: usize) -> Option<i32> {
    let amp = tokens.get(i + 1)?;
    let num = tokens.get(i + 2)?;
    if amp.quoted || amp.text != "&" || num.quoted {
        return None;
    }
    let bytes = num.text.as_bytes();
    if bytes.len() == 1 && bytes[0].is_ascii_digit() {
        Some(i32::from(bytes[0] - b'0'))
    } else {
        None
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// 各ステージの引数だけを取り出す（単一パイプライン前提）。
    fn stage_args(input: &str) -> Vec<Vec<String>> {
        let pipelines = parse(input);
        assert_eq!(pipelines.len(), 1, "expected one pipeline for {:?}", input);
        pipelines[0]
            .stages
            .iter()
            .map(|s| s.args.clone())
            .collect()
    }

    fn words(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    // ── 単純コマンド ──

    #[test]
    fn simple_command() {
        assert_eq!(stage_args("echo hello world"), vec![words(&["echo", "hello", "world"])]);
    }

    #[test]
    fn whitespace_insensitive() {
        assert_eq!(parse(" a "), parse("a"));
        assert_eq!(stage_args("  echo   x  "), vec![words(&["echo", "x"])]);
    }

    #[test]
    fn empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("   \t ").is_empty());
    }

    // ── クォート ──

    #[test]
    fn quotes_group_words() {
        assert_eq!(stage_args("echo 'hello world'"), vec![words(&["echo", "hello world"])]);
        assert_eq!(stage_args("echo \"a  b\""), vec![words(&["echo", "a  b"])]);
    }

    #[test]
    fn empty_quotes_yield_empty_arg() {
        assert_eq!(stage_args("echo ''"), vec![words(&["echo", ""])]);
    }

    #[test]
    fn quoted_operator_is_a_word() {
        assert_eq!(stage_args("echo '|' '&&'"), vec![words(&["echo", "|", "&&"])]);
    }

    #[test]
    fn adjacent_quote_joins_token() {
        assert_eq!(stage_args("echo pre'fix'"), vec![words(&["echo", "prefix"])]);
    }

    // ── パイプライン ──

    #[test]
    fn two_stage_pipeline() {
        assert_eq!(
            stage_args("ls | grep toml"),
            vec![words(&["ls"]), words(&["grep", "toml"])],
        );
    }

    #[test]
    fn three_stage_pipeline() {
        assert_eq!(
            stage_args("cat f | sort | head -1"),
            vec![words(&["cat", "f"]), words(&["sort"]), words(&["head", "-1"])],
        );
    }

    #[test]
    fn pipe_merge_stderr() {
        let p = parse("make |& tee log");
        assert_eq!(p[0].stages.len(), 2);
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect { fd: 2, op: RedirectOp::DupFd(1) }],
        );
    }

    // ── リダイレクト ──

    #[test]
    fn output_redirect() {
        let p = parse("echo hi > out.txt");
        assert_eq!(p[0].stages[0].args, words(&["echo", "hi"]));
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect {
                fd: 1,
                op: RedirectOp::WriteFile { path: "out.txt".into(), append: false },
            }],
        );
    }

    #[test]
    fn append_and_input_redirect() {
        let p = parse("sort < in.txt >> out.txt");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![
                Redirect { fd: 0, op: RedirectOp::ReadFile("in.txt".into()) },
                Redirect {
                    fd: 1,
                    op: RedirectOp::WriteFile { path: "out.txt".into(), append: true },
                },
            ],
        );
    }

    #[test]
    fn stderr_redirects() {
        let p = parse("cmd 2> err.log");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect {
                fd: 2,
                op: RedirectOp::WriteFile { path: "err.log".into(), append: false },
            }],
        );

        let p = parse("cmd 2>> err.log");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect {
                fd: 2,
                op: RedirectOp::WriteFile { path: "err.log".into(), append: true },
            }],
        );
    }

    #[test]
    fn explicit_fd_redirect() {
        let p = parse("cmd 3> three.log");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect {
                fd: 3,
                op: RedirectOp::WriteFile { path: "three.log".into(), append: false },
            }],
        );
    }

    #[test]
    fn fd_dup_from_three_tokens() {
        let p = parse("cmd 2>&1");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect { fd: 2, op: RedirectOp::DupFd(1) }],
        );

        let p = parse("cmd >&2");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect { fd: 1, op: RedirectOp::DupFd(2) }],
        );
    }

    #[test]
    fn redirect_order_is_textual() {
        let p = parse("cmd > f 2>&1");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![
                Redirect {
                    fd: 1,
                    op: RedirectOp::WriteFile { path: "f".into(), append: false },
                },
                Redirect { fd: 2, op: RedirectOp::DupFd(1) },
            ],
        );

        let p = parse("cmd 2>&1 > f");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![
                Redirect { fd: 2, op: RedirectOp::DupFd(1) },
                Redirect {
                    fd: 1,
                    op: RedirectOp::WriteFile { path: "f".into(), append: false },
                },
            ],
        );
    }

    #[test]
    fn ampersand_gt_writes_both_streams() {
        let p = parse("cmd &> all.log");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![
                Redirect {
                    fd: 1,
                    op: RedirectOp::WriteFile { path: "all.log".into(), append: false },
                },
                Redirect { fd: 2, op: RedirectOp::DupFd(1) },
            ],
        );
    }

    #[test]
    fn digit_mid_word_is_not_a_redirect() {
        // `echo 2 > f` の 2 は引数
        let p = parse("echo 2 > f");
        assert_eq!(p[0].stages[0].args, words(&["echo", "2"]));
        assert_eq!(p[0].stages[0].redirects.len(), 1);
        assert_eq!(p[0].stages[0].redirects[0].fd, 1);

        // `file2>out` は語 file2 + stdout リダイレクト
        let p = parse("cat file2>out");
        assert_eq!(p[0].stages[0].args, words(&["cat", "file2"]));
        assert_eq!(p[0].stages[0].redirects[0].fd, 1);
    }

    #[test]
    fn dangling_redirect_is_dropped() {
        let p = parse("echo >");
        assert_eq!(p[0].stages[0].args, words(&["echo"]));
        assert!(p[0].stages[0].redirects.is_empty());
    }

    // ── ヒアドキュメント / ヒアストリング ──

    #[test]
    fn heredoc_unquoted_delimiter_expands() {
        let p = parse("cat << EOF");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect {
                fd: 0,
                op: RedirectOp::HereDoc {
                    delimiter: "EOF".into(),
                    expand: true,
                    strip_tabs: false,
                    body: None,
                },
            }],
        );
    }

    #[test]
    fn heredoc_quoted_delimiter_suppresses_expansion() {
        let p = parse("cat << 'EOF'");
        match &p[0].stages[0].redirects[0].op {
            RedirectOp::HereDoc { expand, .. } => assert!(!expand),
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn heredoc_dash_strips_tabs() {
        let p = parse("cat <<- END");
        match &p[0].stages[0].redirects[0].op {
            RedirectOp::HereDoc { strip_tabs, delimiter, .. } => {
                assert!(strip_tabs);
                assert_eq!(delimiter, "END");
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn here_string() {
        let p = parse("tr a-z A-Z <<< hello");
        assert_eq!(
            p[0].stages[0].redirects,
            vec![Redirect { fd: 0, op: RedirectOp::HereString("hello".into()) }],
        );
    }

    // ── 連結とバックグラウンド ──

    #[test]
    fn chain_conditions() {
        let p = parse("a && b || c");
        assert_eq!(p.len(), 3);
        assert_eq!(p[0].condition, ChainCondition::None);
        assert_eq!(p[1].condition, ChainCondition::And);
        assert_eq!(p[2].condition, ChainCondition::Or);
    }

    #[test]
    fn background_marks_pipeline() {
        let p = parse("sleep 1 &");
        assert_eq!(p.len(), 1);
        assert!(p[0].background);
        assert_eq!(p[0].stages[0].args, words(&["sleep", "1"]));
    }

    #[test]
    fn background_then_next_pipeline() {
        // `cmd & x` はバックグラウンドの cmd と独立した x
        let p = parse("cmd & x");
        assert_eq!(p.len(), 2);
        assert!(p[0].background);
        assert!(!p[1].background);
        assert_eq!(p[1].stages[0].args, words(&["x"]));
    }

    #[test]
    fn mixed_chain_and_pipeline() {
        let p = parse("echo \"hello world\" && ls | grep rs > out &");
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].condition, ChainCondition::None);
        assert_eq!(p[0].stages[0].args, words(&["echo", "hello world"]));
        assert!(!p[0].background);

        assert_eq!(p[1].condition, ChainCondition::And);
        assert!(p[1].background);
        assert_eq!(p[1].stages.len(), 2);
        assert_eq!(p[1].stages[1].args, words(&["grep", "rs"]));
        assert_eq!(
            p[1].stages[1].redirects,
            vec![Redirect {
                fd: 1,
                op: RedirectOp::WriteFile { path: "out".into(), append: false },
            }],
        );
    }

    #[test]
    fn empty_pipelines_are_discarded() {
        assert!(parse("&&").is_empty());
        assert!(parse("| |").is_empty());
        assert_eq!(parse("a && && b").len(), 2);
    }

    // ── フィールド分割 ──

    #[test]
    fn tab_separates_unquoted_words() {
        let p = parse("echo one\ttwo");
        assert_eq!(p[0].stages[0].args, words(&["echo", "one", "two"]));
    }

    #[test]
    fn quoted_word_is_one_field() {
        let p = parse("echo \"one two\"");
        assert_eq!(p[0].stages[0].args, words(&["echo", "one two"]));
    }

    // ── ブレース展開 ──

    #[test]
    fn brace_comma_list() {
        assert_eq!(stage_args("echo {a,b,c}"), vec![words(&["echo", "a", "b", "c"])]);
    }

    #[test]
    fn brace_prefix_suffix() {
        assert_eq!(
            stage_args("touch file.{rs,toml}"),
            vec![words(&["touch", "file.rs", "file.toml"])],
        );
    }

    #[test]
    fn brace_numeric_range() {
        assert_eq!(stage_args("echo {1..4}"), vec![words(&["echo", "1", "2", "3", "4"])]);
    }

    #[test]
    fn brace_reverse_range() {
        assert_eq!(stage_args("echo {3..1}"), vec![words(&["echo", "3", "2", "1"])]);
    }

    #[test]
    fn brace_negative_range() {
        assert_eq!(stage_args("echo {-1..1}"), vec![words(&["echo", "-1", "0", "1"])]);
    }

    #[test]
    fn brace_nested_not_expanded() {
        assert_eq!(stage_args("echo {a,{b,c}}"), vec![words(&["echo", "a", "{b,c}"])]);
    }

    #[test]
    fn brace_without_braces_is_identity() {
        let token = Token { text: "plain-word".into(), quoted: false };
        let out = expand_braces(vec![token]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "plain-word");
    }

    #[test]
    fn brace_malformed_untouched() {
        assert_eq!(stage_args("echo {a,b"), vec![words(&["echo", "{a,b"])]);
        assert_eq!(stage_args("echo {}"), vec![words(&["echo", "{}"])]);
    }

    #[test]
    fn brace_single_element() {
        assert_eq!(stage_args("echo {only}"), vec![words(&["echo", "only"])]);
    }

    // ── トークナイザ単体 ──

    #[test]
    fn tokenize_longest_match() {
        let tokens = tokenize("a&&b||c|&d");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "&&", "b", "||", "c", "|&", "d"]);
    }

    #[test]
    fn tokenize_quoted_flag() {
        let tokens = tokenize("plain 'quoted' mix'ed'");
        assert!(!tokens[0].quoted);
        assert!(tokens[1].quoted);
        assert!(tokens[2].quoted);
        assert_eq!(tokens[2].text, "mixed");
    }

    #[test]
    fn tokenize_backslash_literal_in_single_quotes() {
        let tokens = tokenize(r"echo 'a\b'");
        assert_eq!(tokens[1].text, r"a\b");
        assert!(tokens[1].quoted);

        let tokens = tokenize(r"cat 'C:\tmp\f'");
        assert_eq!(tokens[1].text, r"C:\tmp\f");
    }

    #[test]
    fn tokenize_escaped_double_quote_is_literal() {
        let tokens = tokenize(r#"echo "a\"b""#);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, r#"a"b"#);
        assert!(tokens[1].quoted);
    }

    #[test]
    fn tokenize_escaped_quotes_outside_quotes() {
        let tokens = tokenize(r"echo \' \\");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["echo", "'", "\\"]);
    }

    #[test]
    fn tokenize_trailing_backslash_kept() {
        let tokens = tokenize(r"echo a\");
        assert_eq!(tokens[1].text, r"a\");
    }

    #[test]
    fn tokenize_heredoc_operators() {
        let tokens = tokenize("cat <<- X <<< y << Z");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["cat", "<<-", "X", "<<<", "y", "<<", "Z"]);
    }
}
