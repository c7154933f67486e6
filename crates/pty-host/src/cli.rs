//! CLI surface for normal host invocation. The `--pty-exec` child helper is
//! deliberately not a clap subcommand: it runs between fork and exec of the
//! shell, before it would be safe to pull in clap's allocation-heavy parser,
//! so `main` recognizes and dispatches it by inspecting raw argv first.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "pty-host", about = "Owns one PTY and speaks the host IPC protocol over a Unix socket")]
pub struct HostArgs {
    /// Session id this host instance serves; also names its socket file.
    #[arg(long)]
    pub session_id: String,

    /// Shell binary to run inside the PTY.
    #[arg(long, default_value = "/bin/sh")]
    pub shell: String,

    /// Initial working directory for the shell.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    #[arg(long, default_value_t = 80)]
    pub cols: u16,

    #[arg(long, default_value_t = 24)]
    pub rows: u16,

    /// Scrollback ring buffer capacity, in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    pub scrollback_bytes: usize,
}

/// Matches argv against the `pty-host --pty-exec <slave-path> -- <argv>`
/// form and returns the slave path and child argv if it does. Returning
/// `None` means "handle as the normal declarative CLI instead".
pub fn parse_pty_exec(args: &[String]) -> Option<(String, Vec<String>)> {
    if args.len() < 2 || args[1] != "--pty-exec" {
        return None;
    }
    let slave_path = args.get(2)?.clone();
    let sep = args.iter().position(|a| a == "--")?;
    let argv = args[sep + 1..].to_vec();
    Some((slave_path, argv))
}
