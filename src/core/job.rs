use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use failure::{Fail, ResultExt};
use log::debug;
use nix::{
    errno::Errno,
    libc,
    sys::signal::{self, Signal},
    unistd::Pid,
};

use crate::core::pipeline::{self, Broadcast, QueueBroadcast, SharedMemoryBroadcast};
use crate::core::process::{self, Process};
use crate::core::terminal::Terminal;
use crate::errors::{Error, ErrorKind, Result};

/// How a job's processes are connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Medium {
    /// A single process.
    None,
    /// `a | b | c`: each process reads the previous one's output.
    Pipe,
    /// `a ## b , c`: `a`'s output is copied to `b` and `c` through a message queue.
    Queue,
    /// `a SS b , c`: like `Queue`, through a shared-memory segment.
    SharedMemory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: PathBuf,
    pub append: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    RunningForeground,
    RunningBackground,
    Stopped,
    Completed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            JobStatus::RunningForeground => write!(f, "Running (fg)"),
            JobStatus::RunningBackground => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// The processes started by one input line. Once launched they all share
/// one process group, whose id is the first process's pid.
#[derive(Debug)]
pub struct Job {
    input: String,
    pgid: Option<Pid>,
    medium: Medium,
    processes: Vec<Process>,
    background: bool,
    redirect_in: Option<PathBuf>,
    redirect_out: Option<OutputRedirect>,
}

impl Job {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.trim().to_string(),
            pgid: None,
            medium: Medium::None,
            processes: Vec::new(),
            background: false,
            redirect_in: None,
            redirect_out: None,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    /// `None` until the job is started.
    pub fn pgid(&self) -> Option<Pid> {
        self.pgid
    }

    pub fn medium(&self) -> Medium {
        self.medium
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn redirect_in(&self) -> Option<&Path> {
        self.redirect_in.as_ref().map(PathBuf::as_path)
    }

    pub fn redirect_out(&self) -> Option<&OutputRedirect> {
        self.redirect_out.as_ref()
    }

    pub(crate) fn set_medium(&mut self, medium: Medium) {
        self.medium = medium;
    }

    pub(crate) fn add_process(&mut self, mut process: Process) {
        process.set_background(self.background);
        self.processes.push(process);
    }

    pub(crate) fn make_background(&mut self) {
        self.background = true;
        for process in &mut self.processes {
            process.set_background(true);
        }
    }

    pub(crate) fn set_redirect_in<P: AsRef<Path>>(&mut self, path: P) {
        self.redirect_in = Some(path.as_ref().to_path_buf());
    }

    pub(crate) fn set_redirect_out<P: AsRef<Path>>(&mut self, path: P, append: bool) {
        self.redirect_out = Some(OutputRedirect {
            path: path.as_ref().to_path_buf(),
            append,
        });
    }

    pub fn status(&self) -> JobStatus {
        if self.is_completed() {
            JobStatus::Completed
        } else if self.is_stopped() {
            JobStatus::Stopped
        } else if self.background {
            JobStatus::RunningBackground
        } else {
            JobStatus::RunningForeground
        }
    }

    pub fn is_completed(&self) -> bool {
        self.processes.iter().all(Process::is_completed)
    }

    /// A job is stopped as soon as any of its processes is.
    pub fn is_stopped(&self) -> bool {
        !self.is_completed() && self.processes.iter().any(Process::is_stopped)
    }

    /// Exit status of the job's last process, once it has one.
    pub fn last_exit_status(&self) -> Option<ExitStatus> {
        self.processes.last().and_then(Process::exit_status)
    }

    /// Launches every process, connected according to the job's medium.
    ///
    /// On error, processes that were already launched keep running.
    pub fn start(&mut self, terminal: Option<&Terminal>) -> Result<()> {
        debug!(
            "starting '{}': {} process(es), medium {:?}, background {}",
            self.input,
            self.processes.len(),
            self.medium,
            self.background
        );

        match self.medium {
            Medium::None | Medium::Pipe => self.start_chain(terminal),
            Medium::Queue => self.start_broadcast(QueueBroadcast::new()?, terminal),
            Medium::SharedMemory => self.start_broadcast(SharedMemoryBroadcast::new()?, terminal),
        }
    }

    /// Connects each process to the next through a pipe. The first process
    /// reads the input redirect, the last one writes the output redirect.
    fn start_chain(&mut self, terminal: Option<&Terminal>) -> Result<()> {
        let (mut upstream, mut redirect_out) = self.open_redirects()?;
        let count = self.processes.len();

        for i in 0..count {
            let (next_upstream, downstream) = if i + 1 < count {
                let (reader, writer) = pipeline::pipe()?;
                (Some(reader), Some(writer))
            } else {
                (None, redirect_out.take())
            };

            let process = &mut self.processes[i];
            process.set_stdin(fd_or(&upstream, libc::STDIN_FILENO));
            process.set_stdout(fd_or(&downstream, libc::STDOUT_FILENO));
            let pid = process.launch(self.pgid, terminal)?;
            self.pgid.get_or_insert(pid);

            // the shell's copies close here, right after the child got them
            upstream = next_upstream;
        }

        Ok(())
    }

    fn start_broadcast<B: Broadcast>(
        &mut self,
        mut broadcast: B,
        terminal: Option<&Terminal>,
    ) -> Result<()> {
        let result = self.run_broadcast(&mut broadcast, terminal);
        let released = broadcast.release();
        result.and(released)
    }

    fn run_broadcast<B: Broadcast>(
        &mut self,
        broadcast: &mut B,
        terminal: Option<&Terminal>,
    ) -> Result<()> {
        let (producer, consumers) = match self.processes.split_first_mut() {
            Some(split) => split,
            None => return Ok(()),
        };

        let stdout = broadcast
            .producer_stdout()
            .ok_or_else(|| Errno::EBADF.context(ErrorKind::Nix))?;
        producer.set_stdout(stdout);
        let pgid = producer.launch(None, terminal)?;
        self.pgid = Some(pgid);

        broadcast.collect(producer)?;

        let readers = broadcast.replicate(consumers.len())?;
        for (consumer, reader) in consumers.iter_mut().zip(&readers) {
            consumer.set_stdin(reader.as_raw_fd());
            consumer.launch(Some(pgid), terminal)?;
        }

        Ok(())
    }

    fn open_redirects(&self) -> Result<(Option<File>, Option<File>)> {
        let stdin = match self.redirect_in {
            Some(ref path) => Some(
                File::open(path).context(ErrorKind::Redirect(path.display().to_string()))?,
            ),
            None => None,
        };

        let stdout = match self.redirect_out {
            Some(ref redirect) => Some(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .append(redirect.append)
                    .truncate(!redirect.append)
                    .mode(0o644)
                    .open(&redirect.path)
                    .context(ErrorKind::Redirect(redirect.path.display().to_string()))?,
            ),
            None => None,
        };

        Ok((stdin, stdout))
    }

    /// Blocks until every process has completed or stopped.
    pub fn waitfor(&mut self) -> Result<JobStatus> {
        for process in &mut self.processes {
            process.waitfor()?;
        }
        Ok(self.status())
    }

    /// Polls every process without blocking. Prints a notice when the job
    /// has just completed.
    pub fn update_status(&mut self) -> Result<JobStatus> {
        let was_completed = self.is_completed();
        for process in &mut self.processes {
            process.update_status()?;
        }

        let status = self.status();
        if !was_completed && status == JobStatus::Completed {
            println!("{}", self);
        }
        Ok(status)
    }

    /// Continues the job's process group, in the background or, after handing
    /// it the terminal, in the foreground.
    pub fn resume(&mut self, background: bool, terminal: Option<&Terminal>) -> Result<()> {
        let pgid = match self.pgid {
            Some(pgid) => pgid,
            None => return Err(Error::no_such_job(&self.input)),
        };

        self.background = background;
        for process in &mut self.processes {
            process.mark_resumed(background);
        }

        if !background {
            println!("{}", self);
            if let Some(terminal) = terminal {
                terminal.give_to(pgid)?;
            }
        }

        debug!("sending SIGCONT to process group {}", pgid);
        signal::killpg(pgid, Signal::SIGCONT).context(ErrorKind::Nix)?;
        Ok(())
    }

    /// Full status of the job and each of its processes.
    pub fn report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "\n----------- JOB STATUS -----------");
        let _ = writeln!(
            report,
            "PGID: {}. Status: {}. Command: \"{}\". Processes: {}.",
            process::display_pid(self.pgid),
            self.status(),
            self.input,
            self.processes.len()
        );
        let _ = writeln!(report, "\n------- PROCESS(es) STATUS -------");
        for process in &self.processes {
            let _ = write!(report, "{}", process);
        }
        report
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]\t{}\t{}",
            process::display_pid(self.pgid),
            self.status(),
            self.input
        )
    }
}

fn fd_or(file: &Option<File>, default: libc::c_int) -> libc::c_int {
    file.as_ref().map_or(default, AsRawFd::as_raw_fd)
}
