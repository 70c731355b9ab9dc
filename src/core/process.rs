use std::convert::Infallible;
use std::ffi::CString;
use std::fmt;
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::process::ExitStatus;

use failure::{Fail, ResultExt};
use log::{debug, warn};
use nix::{
    errno::Errno,
    fcntl::{self, OFlag},
    libc,
    sys::{
        signal::{self, SigHandler, Signal},
        stat::{self, Mode},
        wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::{self, ForkResult, Pid},
};

use crate::core::terminal::{self, Terminal};
use crate::errors::{Error, ErrorKind, Result};
use crate::util::MshExitStatusExt;

/// Exit code of a child whose executable could not be found.
pub const COMMAND_NOT_FOUND_EXIT_STATUS: i32 = 127;
/// Exit code of a child that failed to set itself up or exec for any other reason.
pub const EXEC_FAILURE_EXIT_STATUS: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    RunningForeground,
    RunningBackground,
    Stopped,
    Completed,
}

impl ProcessStatus {
    pub fn running(background: bool) -> Self {
        if background {
            ProcessStatus::RunningBackground
        } else {
            ProcessStatus::RunningForeground
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProcessStatus::RunningForeground => write!(f, "Running (fg)"),
            ProcessStatus::RunningBackground => write!(f, "Running (bg)"),
            ProcessStatus::Stopped => write!(f, "Stopped"),
            ProcessStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// One external program launch.
#[derive(Debug, PartialEq)]
pub struct Process {
    /// `argv[0]` is the program, looked up in `PATH` at exec time.
    argv: Vec<String>,
    /// `pid` is None until the process is launched
    pid: Option<Pid>,
    pgid: Option<Pid>,
    status: ProcessStatus,
    background: bool,
    /// Descriptors the child remaps onto its stdin/stdout. The shell owns
    /// them; they are only valid while the job is being started.
    stdin: RawFd,
    stdout: RawFd,
    exit_status: Option<ExitStatus>,
}

impl Process {
    pub fn new<S: AsRef<str>>(program: S) -> Self {
        Self {
            argv: vec![program.as_ref().to_string()],
            pid: None,
            pgid: None,
            status: ProcessStatus::RunningForeground,
            background: false,
            stdin: libc::STDIN_FILENO,
            stdout: libc::STDOUT_FILENO,
            exit_status: None,
        }
    }

    /// # Panics
    /// Panics if `argv` is empty.
    pub fn with_args<S: AsRef<str>>(argv: &[S]) -> Self {
        let mut process = Self::new(&argv[0]);
        for arg in &argv[1..] {
            process.add_arg(arg);
        }
        process
    }

    pub fn add_arg<S: AsRef<str>>(&mut self, arg: S) {
        self.argv.push(arg.as_ref().to_string());
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn pgid(&self) -> Option<Pid> {
        self.pgid
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn stdin(&self) -> RawFd {
        self.stdin
    }

    pub fn stdout(&self) -> RawFd {
        self.stdout
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessStatus::Completed
    }

    pub fn is_stopped(&self) -> bool {
        self.status == ProcessStatus::Stopped
    }

    pub(crate) fn set_background(&mut self, background: bool) {
        self.background = background;
        if !self.is_completed() && !self.is_stopped() {
            self.status = ProcessStatus::running(background);
        }
    }

    /// Marks a stopped or running process as running again, in the
    /// foreground or the background.
    pub(crate) fn mark_resumed(&mut self, background: bool) {
        self.background = background;
        if !self.is_completed() {
            self.status = ProcessStatus::running(background);
        }
    }

    pub(crate) fn set_stdin(&mut self, fd: RawFd) {
        self.stdin = fd;
    }

    pub(crate) fn set_stdout(&mut self, fd: RawFd) {
        self.stdout = fd;
    }

    /// Forks and execs the process.
    ///
    /// `pgid` is the job's process group, `None` if this is the job's first
    /// process (it then becomes the group leader). When `terminal` is given
    /// and the process is in the foreground, its group is handed the terminal.
    pub fn launch(&mut self, pgid: Option<Pid>, terminal: Option<&Terminal>) -> Result<Pid> {
        let argv = self.c_argv()?;
        let terminal_fd = if self.background {
            None
        } else {
            terminal.map(Terminal::fd)
        };

        let _ = io::stdout().flush();

        match unsafe { unistd::fork() }.context(ErrorKind::Nix)? {
            ForkResult::Child => {
                let errno = match self.exec_in_child(pgid, terminal_fd, &argv) {
                    Ok(never) => match never {},
                    Err(errno) => errno,
                };
                eprintln!("msh: {}: {}", self.program(), errno.desc());
                unsafe { libc::_exit(exit_code_for(errno)) }
            }
            ForkResult::Parent { child } => {
                let pgid = pgid.unwrap_or(child);
                self.pid = Some(child);
                self.pgid = Some(pgid);
                self.status = ProcessStatus::running(self.background);
                debug!(
                    "launched {} (pid {}, pgid {}, stdin {}, stdout {})",
                    self.program(),
                    child,
                    pgid,
                    self.stdin,
                    self.stdout
                );

                // Also assert the group from the parent: a signal sent to the
                // group right after fork must not miss the child.
                ensure_group_membership(child, pgid).context(ErrorKind::Nix)?;
                if let (Some(terminal), false) = (terminal, self.background) {
                    terminal.give_to(pgid)?;
                }
                Ok(child)
            }
        }
    }

    /// Runs in the forked child. Only returns if something failed.
    fn exec_in_child(
        &self,
        pgid: Option<Pid>,
        terminal_fd: Option<RawFd>,
        argv: &[CString],
    ) -> nix::Result<Infallible> {
        let pid = unistd::getpid();
        let pgid = pgid.unwrap_or(pid);
        ensure_group_membership(pid, pgid)?;

        // Must happen before stdin is remapped and before SIGTTOU is back to
        // its default disposition.
        if let Some(fd) = terminal_fd {
            unistd::tcsetpgrp(fd, pgid)?;
        }
        terminal::restore_job_control_signals()?;

        remap_fd(self.stdin, libc::STDIN_FILENO)?;
        remap_fd(self.stdout, libc::STDOUT_FILENO)?;

        unistd::execvp(&argv[0], argv)
    }

    /// Blocks until the process exits, is killed or stops.
    pub fn waitfor(&mut self) -> Result<ProcessStatus> {
        let pid = match self.pid {
            Some(pid) if !self.is_completed() => pid,
            _ => return Ok(self.status),
        };

        loop {
            match wait::waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
                Ok(wait_status) => {
                    if self.apply_wait_status(wait_status) {
                        break;
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    warn!("{} ({}) was already reaped", self.program(), pid);
                    self.status = ProcessStatus::Completed;
                    break;
                }
                Err(e) => return Err(e.context(ErrorKind::Nix).into()),
            }
        }

        Ok(self.status)
    }

    /// Checks for a status change without blocking.
    pub fn update_status(&mut self) -> Result<ProcessStatus> {
        let pid = match self.pid {
            Some(pid) if !self.is_completed() => pid,
            _ => return Ok(self.status),
        };

        let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG;
        match wait::waitpid(pid, Some(flags)) {
            Ok(wait_status) => {
                self.apply_wait_status(wait_status);
            }
            Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => {
                warn!("{} ({}) was already reaped", self.program(), pid);
                self.status = ProcessStatus::Completed;
            }
            Err(e) => return Err(e.context(ErrorKind::Nix).into()),
        }

        Ok(self.status)
    }

    /// Records a wait status, reporting it to the user. Returns `true` if the
    /// process stopped or terminated.
    fn apply_wait_status(&mut self, wait_status: WaitStatus) -> bool {
        match wait_status {
            WaitStatus::Exited(pid, code) => {
                debug!("{} exited with {}", pid, code);
                if code != 0 {
                    println!("\n{}: terminated with status {}", self.program(), code);
                }
                self.status = ProcessStatus::Completed;
                self.exit_status = Some(ExitStatus::from_status(code));
                true
            }
            WaitStatus::Signaled(pid, signal, _) => {
                debug!("{} terminated by {}", pid, signal);
                println!(
                    "\n{}: killed by signal {} ({})",
                    self.program(),
                    signal as i32,
                    signal
                );
                self.status = ProcessStatus::Completed;
                self.exit_status = Some(ExitStatus::from_signal(signal));
                true
            }
            WaitStatus::Stopped(pid, signal) => {
                debug!("{} stopped by {}", pid, signal);
                println!(
                    "\n{}: stopped by signal {} ({})",
                    self.program(),
                    signal as i32,
                    signal
                );
                println!("Use fg or bg to resume");
                self.status = ProcessStatus::Stopped;
                self.exit_status = Some(ExitStatus::from_signal(signal));
                true
            }
            _ => false,
        }
    }

    /// Detaches the program from the shell's session entirely, leaving it
    /// reparented to init.
    ///
    /// The first child starts a new session and forks again, then exits so
    /// that the daemon is not a session leader and never becomes a zombie of
    /// the shell. The grandchild clears its umask, moves to `/`, points its
    /// standard descriptors at `/dev/null` and execs.
    pub fn daemonize(&self) -> Result<()> {
        let argv = self.c_argv()?;
        let _ = io::stdout().flush();

        match unsafe { unistd::fork() }.context(ErrorKind::Nix)? {
            ForkResult::Child => {
                let errno = match daemonize_in_child(&argv) {
                    Ok(never) => match never {},
                    Err(errno) => errno,
                };
                unsafe { libc::_exit(exit_code_for(errno)) }
            }
            ForkResult::Parent { child } => loop {
                match wait::waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, 0)) => {
                        debug!("daemonized {}", self.program());
                        return Ok(());
                    }
                    Ok(wait_status) => {
                        warn!("daemonize {}: session leader {:?}", self.program(), wait_status);
                        return Err(ErrorKind::Daemonize(self.program().to_string()).into());
                    }
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.context(ErrorKind::Nix).into()),
                }
            },
        }
    }

    fn c_argv(&self) -> Result<Vec<CString>> {
        self.argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::syntax(format!("{}: argument contains a NUL byte", self.program())))
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Process: {}", self.argv.join(" "))?;
        writeln!(
            f,
            "PGID: {}. PID: {}. Status: {}. STDIN fd: {}. STDOUT fd: {}.",
            display_pid(self.pgid),
            display_pid(self.pid),
            self.status,
            self.stdin,
            self.stdout
        )
    }
}

pub(crate) fn display_pid(pid: Option<Pid>) -> String {
    pid.map(|pid| pid.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Puts `pid` in the process group `pgid`, creating the group when `pid`
/// equals `pgid`.
///
/// Both the shell and the child call this: whichever runs first wins and the
/// other call is a no-op. `EACCES` means the child has already exec'd, which
/// it only does after joining the group itself.
pub fn ensure_group_membership(pid: Pid, pgid: Pid) -> nix::Result<()> {
    match unistd::setpgid(pid, pgid) {
        Err(Errno::EACCES) => Ok(()),
        result => result,
    }
}

fn exit_code_for(errno: Errno) -> i32 {
    if errno == Errno::ENOENT {
        COMMAND_NOT_FOUND_EXIT_STATUS
    } else {
        EXEC_FAILURE_EXIT_STATUS
    }
}

fn remap_fd(fd: RawFd, target: RawFd) -> nix::Result<()> {
    if fd != target {
        unistd::dup2(fd, target)?;
        unistd::close(fd)?;
    }
    Ok(())
}

fn daemonize_in_child(argv: &[CString]) -> nix::Result<Infallible> {
    unistd::setsid()?;
    unsafe { signal::signal(Signal::SIGHUP, SigHandler::SigIgn) }?;

    // The session leader exits right away; the daemon is its orphan.
    if let ForkResult::Parent { .. } = unsafe { unistd::fork() }? {
        unsafe { libc::_exit(0) }
    }

    terminal::restore_job_control_signals()?;
    stat::umask(Mode::empty());
    unistd::chdir("/")?;

    let null = fcntl::open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
    for &fd in &[libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        unistd::dup2(null, fd)?;
    }
    if null > libc::STDERR_FILENO {
        unistd::close(null)?;
    }

    unistd::execvp(&argv[0], argv)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;
    use std::time::Duration;

    use tempdir::TempDir;

    use super::*;

    fn run_to_completion(argv: &[&str]) -> Process {
        let mut process = Process::with_args(argv);
        process.launch(None, None).expect("launch failed");
        assert_eq!(process.waitfor().unwrap(), ProcessStatus::Completed);
        process
    }

    #[test]
    fn test_new_process() {
        let process = Process::with_args(&["cmd", "arg1"]);
        assert_eq!(process.argv(), &["cmd".to_string(), "arg1".to_string()]);
        assert_eq!(process.program(), "cmd");
        assert_eq!(process.pid(), None);
        assert_eq!(process.stdin(), libc::STDIN_FILENO);
        assert_eq!(process.stdout(), libc::STDOUT_FILENO);
        assert!(!process.is_background());
        assert_eq!(process.exit_status(), None);
    }

    #[test]
    fn test_first_process_leads_its_group() {
        let process = run_to_completion(&["true"]);
        assert!(process.pid().is_some());
        assert_eq!(process.pgid(), process.pid());
        assert_eq!(process.exit_status(), Some(ExitStatus::from_success()));
    }

    #[test]
    fn test_later_process_joins_group() {
        let mut leader = Process::with_args(&["sleep", "1"]);
        let pgid = leader.launch(None, None).unwrap();
        let mut member = Process::new("true");
        member.launch(Some(pgid), None).unwrap();
        assert_eq!(member.pgid(), Some(pgid));

        // asserting membership again once the child exec'd is harmless
        assert!(ensure_group_membership(member.pid().unwrap(), pgid).is_ok());
        member.waitfor().unwrap();
        leader.waitfor().unwrap();
    }

    #[test]
    fn test_nonzero_exit_is_recorded() {
        let process = run_to_completion(&["sh", "-c", "exit 3"]);
        assert_eq!(process.exit_status().unwrap().code(), Some(3));
    }

    #[test]
    fn test_missing_executable_exits_with_not_found() {
        let process = run_to_completion(&["msh-test-no-such-program"]);
        assert_eq!(
            process.exit_status().unwrap().code(),
            Some(COMMAND_NOT_FOUND_EXIT_STATUS)
        );
    }

    #[test]
    fn test_killed_process_is_completed() {
        let mut process = Process::with_args(&["sleep", "30"]);
        let pid = process.launch(None, None).unwrap();
        signal::kill(pid, Signal::SIGKILL).unwrap();
        assert_eq!(process.waitfor().unwrap(), ProcessStatus::Completed);
        assert_eq!(process.exit_status().unwrap().code(), Some(128 + 9));
    }

    #[test]
    fn test_stopped_process_can_be_continued() {
        let mut process = Process::with_args(&["sh", "-c", "kill -STOP $$; exit 4"]);
        let pgid = process.launch(None, None).unwrap();
        assert_eq!(process.waitfor().unwrap(), ProcessStatus::Stopped);

        signal::killpg(pgid, Signal::SIGCONT).unwrap();
        process.mark_resumed(false);
        assert_eq!(process.waitfor().unwrap(), ProcessStatus::Completed);
        assert_eq!(process.exit_status().unwrap().code(), Some(4));
    }

    #[test]
    fn test_update_status_does_not_block() {
        let mut process = Process::with_args(&["sleep", "30"]);
        process.set_background(true);
        let pid = process.launch(None, None).unwrap();
        assert_eq!(
            process.update_status().unwrap(),
            ProcessStatus::RunningBackground
        );

        signal::kill(pid, Signal::SIGTERM).unwrap();
        let mut status = process.update_status().unwrap();
        for _ in 0..100 {
            if status == ProcessStatus::Completed {
                break;
            }
            thread::sleep(Duration::from_millis(20));
            status = process.update_status().unwrap();
        }
        assert_eq!(status, ProcessStatus::Completed);
    }

    #[test]
    fn test_waiting_on_completed_process_is_a_noop() {
        let mut process = run_to_completion(&["true"]);
        assert_eq!(process.waitfor().unwrap(), ProcessStatus::Completed);
        assert_eq!(process.update_status().unwrap(), ProcessStatus::Completed);
    }

    #[test]
    fn test_daemon_runs_detached_in_root() {
        let dir = TempDir::new("msh-daemon").unwrap();
        let out = dir.path().join("cwd");
        let script = format!("pwd > {}.tmp; mv {}.tmp {}", out.display(), out.display(), out.display());
        let process = Process::with_args(&["sh", "-c", &script]);
        process.daemonize().expect("daemonize failed");

        for _ in 0..250 {
            if out.exists() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(fs::read_to_string(&out).unwrap(), "/\n");
    }

    #[test]
    fn test_display_report() {
        let process = Process::with_args(&["ls", "-l"]);
        assert_eq!(
            process.to_string(),
            "Process: ls -l\nPGID: -. PID: -. Status: Running (fg). STDIN fd: 0. STDOUT fd: 1.\n"
        );
    }
}
