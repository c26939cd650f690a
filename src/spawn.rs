//! `posix_spawnp()` の安全な Rust ラッパー。
//!
//! パイプラインの各ステージを 1 回の `posix_spawnp` で起動する。
//! プロセスグループ設定とシグナルのデフォルト復帰は spawn 属性で、
//! パイプ接続・リダイレクトは順序付きの file actions で子プロセスに適用される。
//!
//! ## 構成
//!
//! | 型 | 役割 |
//! |-----|------|
//! | [`SpawnAttr`] | `posix_spawnattr_t` の RAII ラッパー（プロセスグループ、シグナル復帰） |
//! | [`FileActions`] | `posix_spawn_file_actions_t` の RAII ラッパー（dup2 / close） |
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//! | [`StageIo`] | 呼び出し側が組み立てる fd 操作列 |
//! | [`spawn`] | 上記を組み合わせて `posix_spawnp` を呼ぶ公開関数 |
//!
//! ## fd 操作の順序
//!
//! `StageIo::dup2s` は登録順に `dup2(src, target)` として適用される。
//! executor はここに「パイプ接続 → ファイルリダイレクト → fd 複製」の順で
//! 積むことで、`cmd >f 2>&1` と `cmd 2>&1 >f` の区別を保証する。
//! `close_fds` は dup2 適用後に閉じられる（dup2 のターゲットと重なる fd は
//! 閉じない）。

use std::ffi::CString;
use std::fmt;

use libc::pid_t;

// ── エラー型 ──────────────────────────────────────────────────────

/// `posix_spawnp` の失敗。errno とコマンド名を保持する。
#[derive(Debug)]
pub struct SpawnError {
    pub errno: i32,
    pub command: String,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno {
            libc::ENOENT => {
                write!(f, "\x1b[1;31mCommand not found: {}\x1b[0m", self.command)
            }
            libc::EACCES => write!(f, "ryke: {}: permission denied", self.command),
            _ => write!(f, "ryke: {}: cannot execute (errno {})", self.command, self.errno),
        }
    }
}

impl SpawnError {
    /// 対応する終了ステータス。127 = not found, 126 = permission denied。
    pub fn exit_status(&self) -> i32 {
        match self.errno {
            libc::ENOENT => 127,
            libc::EACCES => 126,
            _ => 1,
        }
    }
}

// ── StageIo ───────────────────────────────────────────────────────

/// 1 ステージ分の fd 操作列。
#[derive(Default)]
pub struct StageIo {
    /// `(src, target)` の列。登録順に `dup2(src, target)` として適用される。
    pub dup2s: Vec<(i32, i32)>,
    /// 子プロセスで閉じる fd（未使用のパイプ端、親が開いたリダイレクト fd）。
    pub close_fds: Vec<i32>,
}

// ── SpawnAttr ─────────────────────────────────────────────────────

/// `posix_spawnattr_t` の RAII ラッパー。Drop で自動 destroy。
struct SpawnAttr {
    inner: libc::posix_spawnattr_t,
}

impl SpawnAttr {
    fn new() -> Self {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            libc::posix_spawnattr_init(&mut attr);
            Self { inner: attr }
        }
    }

    /// `POSIX_SPAWN_SETPGROUP` を立てて子のプロセスグループを `pgid` にする。
    /// `pgid == 0` なら子自身の PID がグループリーダーになる。
    fn set_pgroup(&mut self, pgid: pid_t) {
        unsafe {
            let mut flags: libc::c_short = 0;
            libc::posix_spawnattr_getflags(&self.inner, &mut flags);
            flags |= libc::POSIX_SPAWN_SETPGROUP as libc::c_short;
            libc::posix_spawnattr_setflags(&mut self.inner, flags);
            libc::posix_spawnattr_setpgroup(&mut self.inner, pgid);
        }
    }

    /// シェルが捕捉/無視しているシグナルを子で `SIG_DFL` に戻す。
    fn set_sigdefault(&mut self) {
        unsafe {
            let mut flags: libc::c_short = 0;
            libc::posix_spawnattr_getflags(&self.inner, &mut flags);
            flags |= libc::POSIX_SPAWN_SETSIGDEF as libc::c_short;
            libc::posix_spawnattr_setflags(&mut self.inner, flags);

            let mut sigset: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut sigset);
            for sig in [
                libc::SIGINT,
                libc::SIGQUIT,
                libc::SIGTSTP,
                libc::SIGTTOU,
                libc::SIGTTIN,
                libc::SIGCHLD,
            ] {
                libc::sigaddset(&mut sigset, sig);
            }
            libc::posix_spawnattr_setsigdefault(&mut self.inner, &sigset);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.inner
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.inner);
        }
    }
}

// ── FileActions ───────────────────────────────────────────────────

/// `posix_spawn_file_actions_t` の RAII ラッパー。Drop で自動 destroy。
struct FileActions {
    inner: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> Self {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            libc::posix_spawn_file_actions_init(&mut actions);
            Self { inner: actions }
        }
    }

    fn add_dup2(&mut self, src: i32, target: i32) {
        unsafe {
            libc::posix_spawn_file_actions_adddup2(&mut self.inner, src, target);
        }
    }

    fn add_close(&mut self, fd: i32) {
        unsafe {
            libc::posix_spawn_file_actions_addclose(&mut self.inner, fd);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.inner
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.inner);
        }
    }
}

// ── CStringVec ────────────────────────────────────────────────────

/// argv 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*mut libc::c_char>,
}

impl CStringVec {
    /// 内部 NUL を含む引数は空文字列に落とす（exec に渡せないため）。
    fn from_args(args: &[&str]) -> Self {
        let strings: Vec<CString> = args
            .iter()
            .map(|s| CString::new(*s).unwrap_or_default())
            .collect();
        let mut ptrs: Vec<*mut libc::c_char> = strings
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        ptrs.push(std::ptr::null_mut());
        Self {
            _strings: strings,
            ptrs,
        }
    }

    fn as_ptr(&self) -> *const *mut libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── spawn 関数 ────────────────────────────────────────────────────

/// `posix_spawnp` で子プロセスを起動する。成功時は子 PID を返す。
///
/// - `args`: コマンドと引数（`args[0]` がコマンド名、PATH 検索付き）
/// - `pgid`: プロセスグループ ID（0 なら子 PID をリーダーに昇格）
/// - `io`: fd 操作列（[`StageIo`] 参照）
///
/// 環境は `std::env::set_var` 済みの `environ` をそのまま継承する。
pub fn spawn(args: &[&str], pgid: pid_t, io: &StageIo) -> Result<pid_t, SpawnError> {
    debug_assert!(!args.is_empty());
    let argv = CStringVec::from_args(args);

    let mut attr = SpawnAttr::new();
    attr.set_pgroup(pgid);
    attr.set_sigdefault();

    let mut actions = FileActions::new();
    for &(src, target) in &io.dup2s {
        actions.add_dup2(src, target);
    }
    for &fd in &io.close_fds {
        // dup2 のターゲットになった fd を閉じると接続が失われる
        let is_target = io.dup2s.iter().any(|&(_, t)| t == fd);
        if !is_target {
            actions.add_close(fd);
        }
    }

    extern "C" {
        static environ: *const *mut libc::c_char;
    }

    let mut pid: pid_t = 0;
    let ret = unsafe {
        libc::posix_spawnp(
            &mut pid,
            argv.ptrs[0] as *const libc::c_char,
            actions.as_ptr(),
            attr.as_ptr(),
            argv.as_ptr(),
            environ as *const *mut libc::c_char,
        )
    };

    if ret != 0 {
        return Err(SpawnError {
            errno: ret,
            command: args[0].to_string(),
        });
    }

    Ok(pid)
}
