use crate::core::parser::ast::EXIT_NAME;
use crate::shell::builtins::{self, prelude::*};

pub struct Exit;

impl builtins::BuiltinCommand for Exit {
    const NAME: &'static str = EXIT_NAME;
    type Args = ();

    /// Exits with the status of the last command; remaining background jobs
    /// are terminated on the way out.
    fn run(shell: &mut Shell, _args: (), stdout: &mut dyn Write) -> Result<()> {
        stdout.flush().context(ErrorKind::Io)?;
        shell.exit(None);
    }
}
