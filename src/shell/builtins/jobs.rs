use log::debug;
use nix::unistd::Pid;

use crate::core::parser::ast::{BG_NAME, FG_NAME, JOBS_NAME};
use crate::shell::builtins::{self, prelude::*};

pub struct Jobs;

impl builtins::BuiltinCommand for Jobs {
    const NAME: &'static str = JOBS_NAME;
    type Args = ();

    fn run(shell: &mut Shell, _args: (), stdout: &mut dyn Write) -> Result<()> {
        writeln!(stdout, "PGID\tStatus\tCommand").context(ErrorKind::Io)?;
        for job in shell.jobs().iter() {
            writeln!(stdout, "{}", job).context(ErrorKind::Io)?;
        }
        Ok(())
    }
}

pub struct Fg;

impl builtins::BuiltinCommand for Fg {
    const NAME: &'static str = FG_NAME;
    /// `None` if the parser found no matching job.
    type Args = Option<Pid>;

    fn run(shell: &mut Shell, pgid: Option<Pid>, _stdout: &mut dyn Write) -> Result<()> {
        debug!("{} {:?}", Self::NAME, pgid);
        let pgid = pgid.ok_or_else(|| Error::no_such_job(Self::NAME))?;
        shell.put_job_in_foreground(pgid)
    }
}

pub struct Bg;

impl builtins::BuiltinCommand for Bg {
    const NAME: &'static str = BG_NAME;
    type Args = Option<Pid>;

    fn run(shell: &mut Shell, pgid: Option<Pid>, _stdout: &mut dyn Write) -> Result<()> {
        debug!("{} {:?}", Self::NAME, pgid);
        let pgid = pgid.ok_or_else(|| Error::no_such_job(Self::NAME))?;
        shell.put_job_in_background(pgid)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use nix::sys::signal::{self, Signal};
    use tempdir::TempDir;

    use super::*;
    use crate::shell::builtins::BuiltinCommand;
    use crate::shell::ShellConfig;

    fn shell() -> Shell {
        Shell::new(ShellConfig::noninteractive()).unwrap()
    }

    /// Runs a script that stops itself, leaving it in the job table.
    fn run_self_stopping(shell: &mut Shell, dir: &TempDir, then: &str) -> Pid {
        let script = dir.path().join("stop.sh");
        fs::write(&script, format!("kill -STOP $$\n{}\n", then)).unwrap();
        shell
            .execute_command_string(&format!("sh {}", script.display()))
            .unwrap();
        assert_eq!(shell.jobs().len(), 1);
        shell.jobs().lookup(None).unwrap().pgid().unwrap()
    }

    #[test]
    fn test_jobs_lists_background_jobs() {
        let mut shell = shell();
        shell.execute_command_string("sleep 30 &").unwrap();
        let pgid = shell.jobs().lookup(None).unwrap().pgid().unwrap();

        let mut stdout = Vec::new();
        Jobs::run(&mut shell, (), &mut stdout).unwrap();
        assert_eq!(
            String::from_utf8(stdout).unwrap(),
            format!("PGID\tStatus\tCommand\n[{}]\tRunning\tsleep 30 &\n", pgid)
        );
        signal::killpg(pgid, Signal::SIGKILL).unwrap();
    }

    #[test]
    fn test_fg_and_bg_without_job() {
        let mut shell = shell();
        let mut stdout = Vec::new();

        let err = Fg::run(&mut shell, None, &mut stdout).unwrap_err();
        assert_eq!(err.to_string(), "fg: no such job");
        let err = Bg::run(&mut shell, None, &mut stdout).unwrap_err();
        assert_eq!(err.to_string(), "bg: no such job");
    }

    #[test]
    fn test_fg_waits_for_stopped_job() {
        let dir = TempDir::new("msh-fg").unwrap();
        let mut shell = shell();
        let pgid = run_self_stopping(&mut shell, &dir, "exit 7");

        let mut stdout = Vec::new();
        Fg::run(&mut shell, Some(pgid), &mut stdout).unwrap();
        assert!(shell.jobs().is_empty());
        assert_eq!(shell.last_exit_status().code(), Some(7));
    }

    #[test]
    fn test_bg_keeps_job_in_table() {
        let dir = TempDir::new("msh-bg").unwrap();
        let mut shell = shell();
        let pgid = run_self_stopping(&mut shell, &dir, "sleep 30");

        let mut stdout = Vec::new();
        Bg::run(&mut shell, Some(pgid), &mut stdout).unwrap();
        let job = shell.jobs().lookup(Some(pgid)).unwrap();
        assert!(job.is_background());
        assert!(!job.is_stopped());
        signal::killpg(pgid, Signal::SIGKILL).unwrap();
    }
}
