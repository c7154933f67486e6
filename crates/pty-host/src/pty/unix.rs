//! Unix PTY backend: opens a PTY pair via `posix_openpt`, then spawns the
//! shell by re-executing this same binary under the `--pty-exec` subcommand
//! (§4.J), which opens the slave, attaches it to stdio, and execs the shell.
//! We never fork directly in the async runtime; `Command::spawn` does the
//! fork+exec for us, which keeps tokio's reactor out of the child's half of
//! the fork.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;
use tokio::process::{Child, Command};

use super::SpawnOptions;
use crate::error::PtyHostError;

nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

pub struct UnixPty {
    master: AsyncFd<OwnedFd>,
    child: Child,
    pid: u32,
}

impl UnixPty {
    pub fn spawn(opts: SpawnOptions) -> Result<Self, PtyHostError> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(|e| {
            PtyHostError::PtyOpen(io::Error::from_raw_os_error(e as i32))
        })?;
        grantpt(&master).map_err(|e| PtyHostError::PtyOpen(io::Error::from_raw_os_error(e as i32)))?;
        unlockpt(&master).map_err(|e| PtyHostError::PtyOpen(io::Error::from_raw_os_error(e as i32)))?;
        let slave_path = ptsname(&master).map_err(|e| PtyHostError::PtyOpen(io::Error::from_raw_os_error(e as i32)))?;

        set_winsize(master.as_raw_fd(), opts.cols, opts.rows)?;

        let exe = std::env::current_exe().map_err(PtyHostError::SpawnFailed)?;
        let mut cmd = Command::new(exe);
        cmd.arg("--pty-exec").arg(&slave_path).arg("--").arg(&opts.shell);
        cmd.args(&opts.args);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        for (key, val) in &opts.env {
            cmd.env(key, val);
        }
        let child = cmd.spawn().map_err(PtyHostError::SpawnFailed)?;
        let pid = child.id().ok_or(PtyHostError::SpawnFailed(io::Error::other("child exited immediately")))?;

        fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
            .map_err(|e| PtyHostError::PtyOpen(io::Error::from_raw_os_error(e as i32)))?;
        let master_fd: OwnedFd = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
        let master = AsyncFd::new(master_fd).map_err(PtyHostError::Io)?;

        Ok(Self { master, child, pid })
    }

    pub async fn read_output(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable_mut().await?;
            match guard.try_io(|fd| {
                let n = nix::unistd::read(fd.get_ref().as_raw_fd(), buf)?;
                Ok(n)
            }) {
                Ok(result) => return result.map_err(io::Error::from),
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn write_input(&mut self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            let mut guard = self.master.writable_mut().await?;
            match guard.try_io(|fd| {
                let n = nix::unistd::write(fd.get_ref(), &data[written..])?;
                Ok(n)
            }) {
                Ok(result) => written += result.map_err(io::Error::from)?,
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Resizing the winsize causes the kernel to deliver SIGWINCH to the
    /// slave's foreground process group automatically; no signal to send.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyHostError> {
        set_winsize(self.master.get_ref().as_raw_fd(), cols, rows)
    }

    /// SIGHUP, not SIGTERM: interactive zsh and bash both ignore SIGTERM but
    /// treat SIGHUP as a hangup of the controlling terminal and exit.
    pub fn terminate(&mut self) {
        let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGHUP);
    }

    pub fn try_wait_exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

#[cfg(target_os = "linux")]
fn ptsname(fd: &PtyMaster) -> nix::Result<String> {
    nix::pty::ptsname_r(fd)
}

#[cfg(not(target_os = "linux"))]
fn ptsname(fd: &PtyMaster) -> nix::Result<String> {
    // Not thread-safe on non-Linux unices, but we only ever have one PTY
    // host process opening one PTY, so there is no concurrent caller.
    unsafe { nix::pty::ptsname(fd) }
}

fn set_winsize(fd: RawFd, cols: u16, rows: u16) -> Result<(), PtyHostError> {
    let ws = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe {
        tiocswinsz(fd, &ws).map_err(|e| PtyHostError::PtyOpen(io::Error::from_raw_os_error(e as i32)))?;
    }
    Ok(())
}

/// Child helper invoked as `pty-host --pty-exec <slave-path> -- <argv>`.
/// Runs post-fork, pre-exec-of-shell; never returns on success. Exit codes
/// follow §6.4: 1 setsid, 2 open, 3 dup2, 4 execvp, 5 invalid args.
pub fn run_pty_exec(slave_path: &str, argv: &[String]) -> ! {
    use nix::sys::stat::Mode;
    use nix::unistd::setsid;
    use std::ffi::CString;

    if setsid().is_err() {
        eprintln!("pty-exec: setsid failed");
        std::process::exit(1);
    }

    let slave_fd = match nix::fcntl::open(slave_path, OFlag::O_RDWR, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("pty-exec: failed to open slave {slave_path}: {e}");
            std::process::exit(2);
        }
    };

    for target in [0, 1, 2] {
        if unsafe { nix::unistd::dup2(slave_fd, target) }.is_err() {
            eprintln!("pty-exec: dup2({slave_fd}, {target}) failed");
            std::process::exit(3);
        }
    }
    if slave_fd > 2 {
        let _ = nix::unistd::close(slave_fd);
    }
    unsafe {
        libc::ioctl(0, libc::TIOCSCTTY as _, 0);
    }

    let Some((shell, args)) = argv.split_first() else {
        eprintln!("pty-exec: missing shell argv");
        std::process::exit(5);
    };
    let Ok(c_shell) = CString::new(shell.as_str()) else {
        eprintln!("pty-exec: shell path contains a NUL byte");
        std::process::exit(5);
    };
    let mut c_args: Vec<CString> = vec![c_shell.clone()];
    for a in args {
        match CString::new(a.as_str()) {
            Ok(c) => c_args.push(c),
            Err(_) => {
                eprintln!("pty-exec: argv contains a NUL byte");
                std::process::exit(5);
            }
        }
    }

    let _ = nix::unistd::execvp(&c_shell, &c_args);
    eprintln!("pty-exec: execvp failed for {shell}");
    std::process::exit(4);
}
