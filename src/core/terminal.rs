//! The controlling terminal: the one resource the shell and its foreground
//! job take turns owning.

use std::os::unix::io::RawFd;

use failure::ResultExt;
use log::{debug, error};
use nix::{
    libc,
    sys::{
        signal::{self, SigHandler, Signal},
        termios::{self, SetArg, Termios},
    },
    unistd::{self, Pid},
};

use crate::errors::{Error, ErrorKind, Result};
use crate::util;

/// Signals the shell ignores while it owns the terminal and restores to
/// their default disposition in every child it launches.
pub const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

#[derive(Clone, Debug)]
pub struct Terminal {
    fd: RawFd,
    shell_pgid: Pid,
    /// Modes saved at startup and restored after every foreground job, in
    /// case a program (e.g. an editor) leaves the terminal modified.
    shell_tmodes: Option<Termios>,
}

impl Terminal {
    /// Takes control of the terminal on stdin for the shell.
    ///
    /// Loops until the shell is in the foreground, ignores the job-control
    /// signals, puts the shell in its own process group and makes that group
    /// the terminal's foreground group.
    pub fn acquire() -> Result<Terminal> {
        let fd = util::get_terminal();

        loop {
            let shell_pgid = unistd::getpgrp();
            if unistd::tcgetpgrp(fd).context(ErrorKind::Nix)? == shell_pgid {
                break;
            }
            signal::kill(
                Pid::from_raw(-libc::pid_t::from(shell_pgid)),
                Signal::SIGTTIN,
            )
            .context(ErrorKind::Nix)?;
        }

        ignore_job_control_signals()?;

        let shell_pgid = Pid::this();
        if unistd::getpgrp() != shell_pgid {
            unistd::setpgid(shell_pgid, shell_pgid).context(ErrorKind::Nix)?;
        }

        let terminal = Terminal {
            fd,
            shell_pgid,
            shell_tmodes: termios::tcgetattr(fd).ok(),
        };
        terminal.reclaim()?;
        debug!(
            "shell pid {} owns terminal {} (pgid {})",
            Pid::this(),
            fd,
            shell_pgid
        );
        Ok(terminal)
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// Makes `pgid` the terminal's foreground process group.
    pub fn give_to(&self, pgid: Pid) -> Result<()> {
        debug!("giving terminal to process group {}", pgid);
        unistd::tcsetpgrp(self.fd, pgid).map_err(|e| {
            error!("tcsetpgrp({}) failed: {}", pgid, e);
            Error::terminal(format!("tcsetpgrp {}", pgid))
        })
    }

    /// Puts the shell's own process group back in the foreground.
    pub fn reclaim(&self) -> Result<()> {
        self.give_to(self.shell_pgid)
    }

    /// Restores the terminal modes saved when the shell started.
    pub fn restore_modes(&self) -> Result<()> {
        if let Some(ref tmodes) = self.shell_tmodes {
            termios::tcsetattr(self.fd, SetArg::TCSADRAIN, tmodes).map_err(|e| {
                error!("tcsetattr failed: {}", e);
                Error::terminal("tcsetattr")
            })?;
        }
        Ok(())
    }
}

fn ignore_job_control_signals() -> Result<()> {
    for &sig in JOB_CONTROL_SIGNALS.iter() {
        unsafe { signal::signal(sig, SigHandler::SigIgn) }.context(ErrorKind::Nix)?;
    }
    Ok(())
}

/// Restores the default disposition of the job-control signals. Called in
/// forked children before exec.
pub fn restore_job_control_signals() -> nix::Result<()> {
    for &sig in JOB_CONTROL_SIGNALS.iter() {
        unsafe { signal::signal(sig, SigHandler::SigDfl) }?;
    }
    Ok(())
}
