//! プロンプト描画: カラーテーマとテンプレート展開。
//!
//! テンプレートは `{user}@{host}{reset}:{cwdcolor}{cwd}{reset}$ ` のような
//! プレースホルダ置換で描画する。描画自体は外部のラインエディタに渡す
//! 文字列を作るだけで、端末制御はしない。
//!
//! | キー | 置換 |
//! |------|------|
//! | `{user}` | `$USER`（なければ passwd エントリ） |
//! | `{host}` | `gethostname` |
//! | `{cwd}` | カレントディレクトリ |
//! | `{color}` | テーマの ANSI カラーコード |
//! | `{cwdcolor}` | ディレクトリ用カラー（青固定） |
//! | `{reset}` | `\x1b[0m` |

use std::env;
use std::ffi::CStr;

/// プロンプトのカラーテーマ。`theme` ビルトインから変更される。
pub struct PromptTheme {
    color: String,
    name: String,
}

/// 色名と ANSI コードの対応表。
const COLOR_TABLE: &[(&str, &str)] = &[
    ("red", "\x1b[1;31m"),
    ("green", "\x1b[1;32m"),
    ("yellow", "\x1b[1;33m"),
    ("blue", "\x1b[1;34m"),
    ("magenta", "\x1b[1;35m"),
    ("cyan", "\x1b[1;36m"),
];

impl Default for PromptTheme {
    fn default() -> Self {
        Self {
            color: "\x1b[1;32m".to_string(),
            name: "green".to_string(),
        }
    }
}

impl PromptTheme {
    /// 色名を適用する。未知の色名なら `false` を返し何も変えない。
    pub fn apply_color(&mut self, name: &str) -> bool {
        for (known, code) in COLOR_TABLE {
            if *known == name {
                self.color = (*code).to_string();
                self.name = name.to_string();
                return true;
            }
        }
        false
    }

    pub fn color_code(&self) -> &str {
        &self.color
    }

    pub fn color_name(&self) -> &str {
        &self.name
    }
}

/// テンプレートからプロンプト文字列を組み立てる。
pub fn render(template: &str, theme: &PromptTheme) -> String {
    let user = env::var("USER").ok().or_else(passwd_user).unwrap_or_else(|| "user".into());
    let host = hostname().unwrap_or_else(|| "localhost".into());
    let cwd = env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "?".into());

    template
        .replace("{user}", &user)
        .replace("{host}", &host)
        .replace("{cwd}", &cwd)
        .replace("{color}", theme.color_code())
        .replace("{cwdcolor}", "\x1b[1;34m")
        .replace("{reset}", "\x1b[0m")
}

fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn passwd_user() -> Option<String> {
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if pw.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_theme_is_green() {
        let theme = PromptTheme::default();
        assert_eq!(theme.color_name(), "green");
        assert_eq!(theme.color_code(), "\x1b[1;32m");
    }

    #[test]
    fn apply_known_and_unknown_colors() {
        let mut theme = PromptTheme::default();
        assert!(theme.apply_color("cyan"));
        assert_eq!(theme.color_name(), "cyan");

        assert!(!theme.apply_color("plaid"));
        assert_eq!(theme.color_name(), "cyan");
    }

    #[test]
    fn render_replaces_placeholders() {
        env::set_var("USER", "ryketest");
        let theme = PromptTheme::default();
        let prompt = render("{user}:{color}X{reset}", &theme);
        assert_eq!(prompt, "ryketest:\x1b[1;32mX\x1b[0m");
    }

    #[test]
    fn render_fills_cwd() {
        let theme = PromptTheme::default();
        let prompt = render("{cwd}", &theme);
        assert!(!prompt.is_empty());
        assert!(!prompt.contains("{cwd}"));
    }
}
