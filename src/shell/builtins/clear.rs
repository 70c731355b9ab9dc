use crate::core::parser::ast::CLEAR_NAME;
use crate::shell::builtins::{self, prelude::*};

const CLEAR_SCREEN: &str = "\x1B[1;1H\x1B[2J";

pub struct Clear;

impl builtins::BuiltinCommand for Clear {
    const NAME: &'static str = CLEAR_NAME;
    type Args = ();

    fn run(_shell: &mut Shell, _args: (), stdout: &mut dyn Write) -> Result<()> {
        write!(stdout, "{}", CLEAR_SCREEN).context(ErrorKind::Io)?;
        stdout.flush().context(ErrorKind::Io)?;
        Ok(())
    }
}
