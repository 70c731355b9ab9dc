use log::debug;

use crate::core::{parser::ast::DAEMONIZE_NAME, process::Process};
use crate::shell::builtins::{self, prelude::*};

pub struct Daemonize;

impl builtins::BuiltinCommand for Daemonize {
    const NAME: &'static str = DAEMONIZE_NAME;
    type Args = Process;

    fn run(_shell: &mut Shell, process: Process, stdout: &mut dyn Write) -> Result<()> {
        debug!("{}: {}", Self::NAME, process.argv().join(" "));
        process.daemonize()?;
        writeln!(stdout, "Success. Verify with ps ax").context(ErrorKind::Io)?;
        Ok(())
    }
}
