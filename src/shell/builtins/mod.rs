//! Msh builtins
//!
//! Builtins are recognised by the parser, which also resolves the job `fg`
//! and `bg` refer to. Each one runs inside the shell process.

use self::prelude::*;

use self::clear::Clear;
use self::daemonize::Daemonize;
use self::exit::Exit;
use self::jobs::{Bg, Fg, Jobs};
use crate::core::{parser::ast::Builtin, process::Process};

pub mod prelude {
    pub use std::io::Write;
    pub use std::process::ExitStatus;

    pub use failure::ResultExt;

    pub use crate::errors::{Error, ErrorKind, Result};
    pub use crate::shell::Shell;
    pub use crate::util::MshExitStatusExt;
}

mod clear;
mod daemonize;
mod exit;
mod jobs;

/// Represents a Msh builtin command such as jobs or fg.
pub trait BuiltinCommand {
    /// The NAME of the command.
    const NAME: &'static str;
    /// What the parser resolved for this invocation.
    type Args;
    /// Runs the command in the `shell` environment.
    fn run(shell: &mut Shell, args: Self::Args, stdout: &mut dyn Write) -> Result<()>;
}

/// Returns (`exit_status`, `builtin_result`). A successful `fg` leaves the
/// exit status of the job it waited for.
pub fn run(shell: &mut Shell, builtin: Builtin, stdout: &mut dyn Write) -> (ExitStatus, Result<()>) {
    let result = match builtin {
        Builtin::Exit => Exit::run(shell, (), stdout),
        Builtin::Clear => Clear::run(shell, (), stdout),
        Builtin::Jobs => Jobs::run(shell, (), stdout),
        Builtin::Fg(pgid) => Fg::run(shell, pgid, stdout),
        Builtin::Bg(pgid) => Bg::run(shell, pgid, stdout),
    };

    let exit_status = match (builtin, &result) {
        (Builtin::Fg(_), Ok(())) => shell.last_exit_status(),
        _ => get_builtin_exit_status(&result),
    };
    (exit_status, result)
}

pub fn daemonize(
    shell: &mut Shell,
    process: Process,
    stdout: &mut dyn Write,
) -> (ExitStatus, Result<()>) {
    let result = Daemonize::run(shell, process, stdout);
    (get_builtin_exit_status(&result), result)
}

fn get_builtin_exit_status(result: &Result<()>) -> ExitStatus {
    if result.is_ok() {
        ExitStatus::from_success()
    } else {
        ExitStatus::from_failure()
    }
}
