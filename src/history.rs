//! コマンド履歴: 上限付き両端キューとファイル永続化。
//!
//! エントリは `{コマンド文字列, タイムスタンプ}`。末尾に追加し、
//! 上限を超えたら先頭（最古）から捨てる。重複・先頭空白によるスキップは
//! シェルループのポリシー（`ignore_dups` / `ignore_space`）が判断する。
//!
//! ファイル形式は 1 行 1 コマンド、古い順（タイムスタンプは保存しない）。

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::SystemTime;

/// 履歴エントリ。
#[derive(Debug, Clone)]
pub struct Entry {
    pub command: String,
    pub timestamp: SystemTime,
}

/// コマンド履歴。
pub struct History {
    entries: VecDeque<Entry>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// エントリを追加する。空文字列は無視。上限超過時は最古を捨てる。
    pub fn add(&mut self, command: &str) {
        if command.is_empty() {
            return;
        }
        self.entries.push_back(Entry {
            command: command.to_string(),
            timestamp: SystemTime::now(),
        });
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 直前に追加されたコマンド。`ignore_dups` の比較に使う。
    pub fn last_command(&self) -> Option<&str> {
        self.entries.back().map(|e| e.command.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// 履歴ファイルを読み込む。存在しなければ何もしない。
    pub fn load(&mut self, path: &Path) {
        if let Ok(file) = File::open(path) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                if !line.is_empty() {
                    self.add(&line);
                }
            }
        }
    }

    /// 全エントリをファイルへ書き出す（古い順、上書き）。
    pub fn save(&self, path: &Path) {
        if let Ok(mut file) = fs::File::create(path) {
            for entry in &self.entries {
                let _ = writeln!(file, "{}", entry.command);
            }
        }
    }
}
