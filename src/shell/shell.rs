//! Msh - Shell
//!
//! One read-parse-dispatch loop. Foreground jobs are waited for while they
//! own the terminal; background and stopped jobs live in the job table until
//! they complete.

use std::env;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{self, ExitStatus};

use failure::ResultExt;
use log::{debug, error, info, warn};
use nix::unistd::Pid;

use super::{builtins, JobTable, ShellConfig};
use crate::core::{
    job::{Job, JobStatus},
    parser::{self, ast::Builtin, ast::Outcome},
    process::Process,
    terminal::Terminal,
};
use crate::editor::Editor;
use crate::errors::{Error, ErrorKind, Result};
use crate::util::{self, MshExitStatusExt};

const HISTORY_FILE_NAME: &str = ".msh_history";
const SYNTAX_ERROR_EXIT_STATUS: i32 = 2;
/// Consecutive input errors after which stdin is treated as closed.
const MAX_PROMPT_FAILURES: usize = 3;

/// Msh Shell
pub struct Shell {
    /// Responsible for readline and history.
    editor: Editor,
    history_file: Option<PathBuf>,
    /// `None` when the shell is not interactive or could not take the
    /// terminal; jobs then run without terminal handoff.
    terminal: Option<Terminal>,
    jobs: JobTable,
    /// Exit status of last command executed.
    last_exit_status: ExitStatus,
    config: ShellConfig,
}

impl Shell {
    /// Constructs a new Shell to manage running jobs and command history.
    pub fn new(config: ShellConfig) -> Result<Shell> {
        let mut shell = Shell {
            editor: Editor::with_capacity(config.command_history_capacity),
            history_file: None,
            terminal: None,
            jobs: JobTable::default(),
            last_exit_status: ExitStatus::from_success(),
            config,
        };

        if config.enable_terminal_handoff && util::isatty() {
            match Terminal::acquire() {
                Ok(terminal) => shell.terminal = Some(terminal),
                Err(e) => error!(
                    "failed to initialize shell for job control despite isatty: {}",
                    e
                ),
            }
        }

        if config.enable_command_history {
            shell.load_history()?
        }

        info!("msh started up");
        Ok(shell)
    }

    pub fn is_interactive(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn last_exit_status(&self) -> ExitStatus {
        self.last_exit_status
    }

    fn load_history(&mut self) -> Result<()> {
        self.history_file = dirs::home_dir().map(|p| p.join(HISTORY_FILE_NAME));
        if let Some(ref history_file) = self.history_file {
            self.editor.load_history(history_file)?;
        } else {
            warn!("unable to get home directory")
        }

        Ok(())
    }

    /// Custom prompt to output to the user.
    /// Returns `None` when end of file is reached.
    pub fn prompt(&mut self) -> Result<Option<String>> {
        let cwd = display_cwd(env::current_dir(), dirs::home_dir().as_deref());
        let prompt = format!(
            "{}|{}\nmsh> ",
            self.last_exit_status.code().unwrap_or(1),
            cwd.display()
        );
        self.editor.readline(&prompt)
    }

    /// Parses and runs one line.
    pub fn execute_command_string(&mut self, input: &str) -> Result<()> {
        // skip if empty
        if input.trim().is_empty() {
            return Ok(());
        }

        if self.config.enable_command_history {
            self.editor.add_history_entry(input);
        }

        match parser::parse(input, &self.jobs) {
            Outcome::Empty => Ok(()),
            Outcome::ParseError(e) => {
                eprintln!("msh: {}", Error::syntax(e.to_string()));
                self.last_exit_status = ExitStatus::from_status(SYNTAX_ERROR_EXIT_STATUS);
                Ok(())
            }
            Outcome::Builtin(builtin) => self.execute_builtin(builtin),
            Outcome::DaemonProcess(process) => self.execute_daemon(process),
            Outcome::Job(job) => self.execute_job(job),
        }
    }

    /// Runs a msh script from a file.
    pub fn execute_commands_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut f = File::open(path).context(ErrorKind::Io)?;
        let mut buffer = String::new();
        f.read_to_string(&mut buffer)
            .with_context(|_| ErrorKind::Io)?;

        for line in buffer.lines() {
            self.execute_command_string(line)?
        }

        Ok(())
    }

    /// Runs jobs from stdin until EOF is received.
    pub fn execute_from_stdin(&mut self) {
        let mut prompt_failures = 0;
        loop {
            if self.config.enable_job_control {
                // Check the status of background jobs, removing completed ones.
                self.jobs.update_all();
            }

            let input = match self.prompt() {
                Ok(Some(line)) => {
                    prompt_failures = 0;
                    line
                }
                Ok(None) => break,
                Err(e) => {
                    error!("prompt: {}", e);
                    prompt_failures += 1;
                    if prompt_failures >= MAX_PROMPT_FAILURES {
                        eprintln!("msh: {}", e);
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self.execute_command_string(&input) {
                if e.is_fatal() {
                    eprintln!("msh: {}", e);
                    self.exit(Some(ExitStatus::from_failure()));
                }
                error!("execute_command_string: {}", e);
            }
        }
    }

    fn execute_builtin(&mut self, builtin: Builtin) -> Result<()> {
        let (exit_status, result) = builtins::run(self, builtin, &mut io::stdout());
        self.finish_builtin(exit_status, result)
    }

    fn execute_daemon(&mut self, process: Process) -> Result<()> {
        let (exit_status, result) = builtins::daemonize(self, process, &mut io::stdout());
        self.finish_builtin(exit_status, result)
    }

    fn finish_builtin(&mut self, exit_status: ExitStatus, result: Result<()>) -> Result<()> {
        self.last_exit_status = exit_status;
        match result {
            Err(ref e) if !e.is_fatal() => {
                eprintln!("msh: {}", e);
                Ok(())
            }
            result => result,
        }
    }

    /// Starts a job, then waits for it or files it in the job table.
    fn execute_job(&mut self, mut job: Job) -> Result<()> {
        if let Err(e) = job.start(self.terminal.as_ref()) {
            if e.is_fatal() {
                return Err(e);
            }

            // launched members keep running; the shell only takes the
            // terminal back
            eprintln!("msh: {}", e);
            self.last_exit_status = ExitStatus::from_failure();
            return self.reclaim_terminal();
        }

        if job.is_background() {
            if self.config.display_messages {
                println!("{}", job);
            }
            self.last_exit_status = ExitStatus::from_success();
            self.jobs.push(job);
            Ok(())
        } else {
            self.wait_for_foreground(job)
        }
    }

    /// Waits for a foreground job, then puts the shell back in the
    /// foreground. A stopped job goes to the job table.
    fn wait_for_foreground(&mut self, mut job: Job) -> Result<()> {
        let waited = job.waitfor();
        self.reclaim_terminal()?;
        let status = waited?;

        if self.config.verbose {
            print!("{}", job.report());
        }

        if let Some(exit_status) = job.last_exit_status() {
            self.last_exit_status = exit_status;
        }

        if self.config.display_messages {
            println!("{}", job);
        }
        if status == JobStatus::Stopped {
            self.jobs.push(job);
        }
        Ok(())
    }

    fn reclaim_terminal(&mut self) -> Result<()> {
        if let Some(ref terminal) = self.terminal {
            terminal.reclaim()?;
            terminal.restore_modes()?;
        }
        Ok(())
    }

    /// Continues the job in process group `pgid` in the foreground and waits
    /// for it.
    pub(crate) fn put_job_in_foreground(&mut self, pgid: Pid) -> Result<()> {
        let mut job = self
            .jobs
            .remove(pgid)
            .ok_or_else(|| Error::no_such_job(pgid.to_string()))?;
        debug!("putting job [{}] in foreground", pgid);

        if let Err(e) = job.resume(false, self.terminal.as_ref()) {
            if !e.is_fatal() {
                self.reclaim_terminal()?;
                self.jobs.push(job);
            }
            return Err(e);
        }

        self.wait_for_foreground(job)
    }

    /// Continues the job in process group `pgid` in the background. It stays
    /// in the job table.
    pub(crate) fn put_job_in_background(&mut self, pgid: Pid) -> Result<()> {
        let display_messages = self.config.display_messages;
        let job = self
            .jobs
            .get_mut(pgid)
            .ok_or_else(|| Error::no_such_job(pgid.to_string()))?;
        debug!("putting job [{}] in background", pgid);

        job.resume(true, None)?;
        if display_messages {
            println!("{}", job);
        }
        Ok(())
    }

    /// Exit the shell.
    ///
    /// Every remaining background job is sent SIGTERM first. Exits with `n`,
    /// or with the status of the last command executed if `n` is `None`.
    pub fn exit(&mut self, n: Option<ExitStatus>) -> ! {
        if self.config.display_messages {
            println!("exit");
        }

        self.jobs.terminate_all();

        if self.config.enable_command_history {
            if let Some(ref history_file) = self.history_file {
                if let Err(e) = self.editor.save_history(history_file) {
                    error!(
                        "error: failed to save history to file during shutdown: {}",
                        e
                    );
                }
            }
        }

        let code = n
            .unwrap_or(self.last_exit_status)
            .code()
            .unwrap_or(1);
        let _ = io::stdout().flush();

        info!("msh has shut down");
        process::exit(code);
    }
}

/// The working directory as shown in the prompt, with the home directory
/// abbreviated to `~`. An unreadable working directory shows as `?`.
fn display_cwd(cwd: io::Result<PathBuf>, home: Option<&Path>) -> PathBuf {
    let cwd = match cwd {
        Ok(cwd) => cwd,
        Err(e) => {
            warn!("unable to get current directory: {}", e);
            return PathBuf::from("?");
        }
    };

    match home.map(|home| cwd.strip_prefix(home)) {
        Some(Ok(rel)) => Path::new("~").join(rel),
        _ => cwd,
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} jobs\n{:?}", self.jobs, self.editor)
    }
}
