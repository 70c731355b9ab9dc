//! Msh - Shell Module
//!
//! The Shell owns the terminal, the table of background jobs and the editor
//! of previous commands.

pub use self::job_control::JobTable;
pub use self::shell::Shell;

mod builtins;
pub mod job_control;
#[allow(clippy::module_inception)]
pub mod shell;

/// Policy object to control a Shell's behavior
#[derive(Debug, Copy, Clone)]
pub struct ShellConfig {
    /// Determines if new command entries will be added to the shell's command history.
    ///
    /// Note: This is checked before the other command history config fields.
    enable_command_history: bool,

    /// Number of entries to store in the shell's command history
    command_history_capacity: usize,

    /// Determines if background jobs are polled and reported between
    /// commands.
    enable_job_control: bool,

    /// Determines if the shell takes the terminal when stdin is a tty and
    /// hands it to each foreground job.
    enable_terminal_handoff: bool,

    /// Determines if some messages (e.g. "exit", job status lines) should be displayed.
    display_messages: bool,

    /// Print a full job report after every foreground job.
    verbose: bool,
}

impl ShellConfig {
    /// Creates an interactive shell, e.g. command history, job control
    ///
    /// # Complete List
    /// - Command History is enabled
    /// - Job Control is enabled
    /// - Job status lines and some additional messages are displayed
    pub fn interactive(command_history_capacity: usize) -> Self {
        Self {
            enable_command_history: true,
            command_history_capacity,
            enable_job_control: true,
            enable_terminal_handoff: true,
            display_messages: true,
            verbose: false,
        }
    }

    /// Creates a noninteractive shell, e.g. no command history, no job control
    ///
    /// # Complete List
    /// - Command History is disabled.
    /// - Job Control is disabled. Jobs still run in their own process groups.
    /// - The terminal is left alone; see `terminal_handoff`.
    /// - Fewer messages are displayed
    pub fn noninteractive() -> Self {
        Default::default()
    }

    pub fn verbose(self, verbose: bool) -> Self {
        Self { verbose, ..self }
    }

    /// With this set, a shell whose stdin is a tty gives the terminal to
    /// each foreground job's process group, even without job control.
    pub fn terminal_handoff(self, enable_terminal_handoff: bool) -> Self {
        Self {
            enable_terminal_handoff,
            ..self
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enable_command_history: false,
            command_history_capacity: 0,
            enable_job_control: false,
            enable_terminal_handoff: false,
            display_messages: false,
            verbose: false,
        }
    }
}
