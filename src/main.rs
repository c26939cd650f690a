//! ryke — ジョブ制御付き POSIX 風インタラクティブシェル
//!
//! 起動手順: シグナルハンドラ設置 → 自身をプロセスグループリーダーに昇格 →
//! 端末掌握 → 状態読み込み → REPL ループまたはスクリプト実行。
//!
//! 使い方: `ryke [script]` — 引数があればスクリプトとして実行し、
//! なければ対話ループに入る。

use std::env;

use ryke::shell::Shell;
use ryke::signal;

fn main() {
    signal::install();

    // termios は起動時に 1 回だけ保存し、終了時に復元する
    let saved_termios = save_termios();

    // シェルを自身のプロセスグループリーダーにし、端末を掌握する。
    // 非端末起動（パイプ経由等）では tcsetpgrp が失敗するが無視してよい
    unsafe {
        let pid = libc::getpid();
        libc::setpgid(pid, pid);
        libc::tcsetpgrp(libc::STDIN_FILENO, pid);
    }

    let mut shell = Shell::new();
    shell.load_state();

    let args: Vec<String> = env::args().collect();
    let status = match args.get(1) {
        Some(script) => shell.run_script(script),
        None => shell.run_interactive(),
    };

    if let Some(termios) = saved_termios {
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &termios);
        }
    }

    std::process::exit(status);
}

fn save_termios() -> Option<libc::termios> {
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(libc::STDIN_FILENO, &mut termios) == 0 {
            Some(termios)
        } else {
            None
        }
    }
}
