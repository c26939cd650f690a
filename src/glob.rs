//! パス名展開（glob）: `*`, `?`, `[...]` によるファイル名マッチング。
//!
//! executor が各引数に適用する（`noglob` オプションで無効化）。
//! マッチするファイルがなければ元のパターンをそのまま 1 語として返す
//! （bash の nullglob 無効時と同じ挙動）。
//!
//! `.` で始まるファイルはパターンが `.` で始まる場合のみマッチする。

use std::fs;

/// 語にグロブ文字（`*`, `?`, `[`）が含まれるか判定する。
pub fn has_glob_chars(word: &str) -> bool {
    word.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
}

/// パターンを展開し、マッチしたパスをソート済みで返す。
/// マッチなし → 元のパターン 1 語の Vec を返す。
pub fn expand(pattern: &str) -> Vec<String> {
    let matched = match pattern.rfind('/') {
        Some(slash) => {
            let dir_part = &pattern[..slash];
            let file_part = &pattern[slash + 1..];
            if has_glob_chars(dir_part) {
                // ディレクトリ部分にもグロブ → 各候補ディレクトリで展開
                let mut out = Vec::new();
                for dir in expand(dir_part) {
                    if fs::metadata(&dir).map(|m| m.is_dir()).unwrap_or(false) {
                        out.extend(expand_in_dir(&dir, file_part));
                    }
                }
                out
            } else {
                let dir = if dir_part.is_empty() { "/" } else { dir_part };
                expand_in_dir(dir, file_part)
            }
        }
        None => expand_in_dir(".", pattern),
    };

    if matched.is_empty() {
        vec![pattern.to_string()]
    } else {
        matched
    }
}

/// ディレクトリ内でパターンにマッチするエントリ名を収集する。
fn expand_in_dir(dir: &str, file_pattern: &str) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if name.starts_with('.') && !file_pattern.starts_with('.') {
            continue;
        }
        if matches(file_pattern, &name) {
            if dir == "." {
                out.push(name);
            } else {
                out.push(format!("{}/{}", dir, name));
            }
        }
    }
    out.sort();
    out
}

/// パターンとファイル名を照合する。
///
/// `*` バックトラック方式の反復実装: `*` に遭遇したら位置を記録し、
/// 以降の不一致は記録位置に戻って `*` の消費量を 1 文字ずつ増やす。
pub fn matches(pattern: &str, name: &str) -> bool {
    let pat = pattern.as_bytes();
    let nam = name.as_bytes();
    let (mut pi, mut ni) = (0usize, 0usize);
    // 直近の `*` の直後位置と、その時点の name 位置
    let mut star: Option<(usize, usize)> = None;

    while ni < nam.len() {
        if pi < pat.len() {
            match pat[pi] {
                b'*' => {
                    star = Some((pi + 1, ni));
                    pi += 1;
                    continue;
                }
                b'?' => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                b'[' => {
                    if let Some(next_pi) = match_class(pat, pi, nam[ni]) {
                        pi = next_pi;
                        ni += 1;
                        continue;
                    }
                }
                c if c == nam[ni] => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                _ => {}
            }
        }
        // 不一致: 直近の `*` に 1 文字余分に食わせて再試行
        match star {
            Some((sp, sn)) => {
                pi = sp;
                ni = sn + 1;
                star = Some((sp, sn + 1));
            }
            None => return false,
        }
    }

    // name を消費し切った: 残りパターンが `*` のみなら成立
    while pi < pat.len() && pat[pi] == b'*' {
        pi += 1;
    }
    pi == pat.len()
}

/// `[...]` 文字クラスを照合する。成立すればクラス終端の次の位置を返す。
///
/// `[!...]` / `[^...]` は否定。先頭の `]` はリテラルとして扱う。
/// 閉じ `]` がない場合は不成立（`None`）。
fn match_class(pat: &[u8], open: usize, ch: u8) -> Option<usize> {
    let mut pi = open + 1;
    let negate = pat.get(pi).is_some_and(|&b| b == b'!' || b == b'^');
    if negate {
        pi += 1;
    }

    let mut matched = false;
    let mut first = true;
    while pi < pat.len() && (pat[pi] != b']' || first) {
        first = false;
        if pi + 2 < pat.len() && pat[pi + 1] == b'-' && pat[pi + 2] != b']' {
            let (lo, hi) = (pat[pi], pat[pi + 2]);
            if (lo.min(hi)..=lo.max(hi)).contains(&ch) {
                matched = true;
            }
            pi += 3;
        } else {
            if pat[pi] == ch {
                matched = true;
            }
            pi += 1;
        }
    }

    if pi >= pat.len() {
        return None; // 閉じ括弧なし
    }
    if matched != negate {
        Some(pi + 1)
    } else {
        None
    }
}
