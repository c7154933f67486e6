//! Platform split for PTY ownership. Unix is the real implementation;
//! Windows compiles to a stub that reports `PtyError::Platform` from
//! `spawn` rather than silently degrading.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixPty as Pty;
#[cfg(windows)]
pub use windows::WindowsPty as Pty;

#[cfg(unix)]
pub fn run_pty_exec_entry(slave_path: &str, argv: &[String]) -> ! {
    unix::run_pty_exec(slave_path, argv)
}

/// Parameters needed to spawn the child shell behind a fresh PTY.
pub struct SpawnOptions {
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: Option<std::path::PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
}
