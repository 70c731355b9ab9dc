use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{self, Command, Stdio};

use tempdir::TempDir;

/// WorkDir represents a scratch directory in which tests are run. It also
/// serves as `HOME`, so history and log files stay out of the way.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    pub fn new(name: &str) -> WorkDir {
        WorkDir {
            dir: TempDir::new(name).expect("unable to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.dir.path().join(path)
    }

    /// Builds a new command to run in this working directory.
    pub fn command<I, S>(&self, args: I) -> process::Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_msh"));
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .stdin(Stdio::null())
            .args(args);
        cmd
    }

    /// Runs `msh -c <command>`.
    pub fn run(&self, command: &str) -> process::Output {
        self.command(&["-c", command]).output().unwrap()
    }

    /// Runs `msh` reading `input` from a pipe.
    pub fn run_with_stdin(&self, input: &str) -> process::Output {
        let mut cmd = self.command(Vec::<&str>::new());
        self.output_with_stdin(&mut cmd, input)
    }

    /// Builds a `/bin/sh -c` command that starts in this directory and can
    /// refer to the msh binary as `$MSH`.
    pub fn sh(&self, script: &str) -> process::Command {
        let mut cmd = Command::new("sh");
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("MSH", env!("CARGO_BIN_EXE_msh"))
            .args(&["-c", script]);
        cmd
    }

    /// Runs `cmd` with `input` written to its stdin.
    pub fn output_with_stdin(&self, cmd: &mut process::Command, input: &str) -> process::Output {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
        child.wait_with_output().unwrap()
    }

    /// Executes the command and collects its stdout.
    ///
    /// Panics if the command fails.
    pub fn stdout(&self, cmd: &mut process::Command) -> String {
        let o = self.output(cmd);
        String::from_utf8_lossy(&o.stdout).into_owned()
    }

    /// Executes the command and collects its output.
    ///
    /// Panic if the command fails.
    pub fn output(&self, cmd: &mut process::Command) -> process::Output {
        let o = cmd.output().unwrap();
        if !o.status.success() {
            panic!(
                "\n\n==========\n\
                 command failed but expected success!\
                 \n\ncommand: {:?}\
                 \ncwd: {}\
                 \n\nstatus: {}\
                 \n\nstdout: {}\
                 \n\nstderr: {}\
                 \n\n==========\n",
                cmd,
                self.path().display(),
                o.status,
                String::from_utf8_lossy(&o.stdout),
                String::from_utf8_lossy(&o.stderr)
            );
        }
        o
    }
}
