use std::fmt;

use nix::unistd::Pid;

use crate::core::{job::Job, process::Process};

pub const PIPE: &str = "|";
pub const QUEUE: &str = "##";
pub const SHARED_MEMORY: &str = "SS";
pub const SEPARATOR: &str = ",";
pub const REDIRECT_IN: &str = "<";
pub const REDIRECT_OUT: &str = ">";
pub const REDIRECT_APPEND: &str = ">>";
pub const BACKGROUND: &str = "&";

pub const EXIT_NAME: &str = "exit";
pub const CLEAR_NAME: &str = "clear";
pub const JOBS_NAME: &str = "jobs";
pub const FG_NAME: &str = "fg";
pub const BG_NAME: &str = "bg";
pub const DAEMONIZE_NAME: &str = "daemonize";

/// Tokens that end the current process's argument list. `,` is not one of
/// them: it only separates processes after `##` or `SS`.
pub fn is_operator(token: &str) -> bool {
    [
        PIPE,
        QUEUE,
        SHARED_MEMORY,
        REDIRECT_IN,
        REDIRECT_OUT,
        REDIRECT_APPEND,
        BACKGROUND,
    ]
    .contains(&token)
}

/// Result of parsing one input line.
#[derive(Debug)]
pub enum Outcome {
    Job(Job),
    DaemonProcess(Process),
    Builtin(Builtin),
    ParseError(ParseError),
    Empty,
}

/// Builtins are recognised by the parser. `fg` and `bg` carry the pgid of the
/// job they resolved to, `None` if there is no such job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Exit,
    Clear,
    Jobs,
    Fg(Option<Pid>),
    Bg(Option<Pid>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseStatus {
    Error,
    Empty,
    Job,
    BuiltinExit,
    BuiltinClear,
    BuiltinJobs,
    BuiltinFg,
    BuiltinBg,
    BuiltinDaemonize,
}

impl Outcome {
    pub fn status(&self) -> ParseStatus {
        match *self {
            Outcome::Job(_) => ParseStatus::Job,
            Outcome::DaemonProcess(_) => ParseStatus::BuiltinDaemonize,
            Outcome::Builtin(Builtin::Exit) => ParseStatus::BuiltinExit,
            Outcome::Builtin(Builtin::Clear) => ParseStatus::BuiltinClear,
            Outcome::Builtin(Builtin::Jobs) => ParseStatus::BuiltinJobs,
            Outcome::Builtin(Builtin::Fg(_)) => ParseStatus::BuiltinFg,
            Outcome::Builtin(Builtin::Bg(_)) => ParseStatus::BuiltinBg,
            Outcome::ParseError(_) => ParseStatus::Error,
            Outcome::Empty => ParseStatus::Empty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// An operator (or the end of the line) where a command name belongs.
    MissingCommand(String),
    /// `|` together with `##` or `SS`, or `##` together with `SS`.
    MixedMedium,
    /// A second `##` or `SS`.
    RepeatedMedium(String),
    /// Redirections are only allowed for single commands and `|` pipelines.
    RedirectInBroadcast(String),
    RepeatedRedirect(String),
    /// Both `>` and `>>`.
    ConflictingRedirect,
    MissingRedirectTarget(String),
    /// Anything after `&`, or a word after a redirection target.
    UnexpectedToken(String),
    InvalidPgid(String),
    MissingDaemonCommand,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::MissingCommand(ref near) => write!(f, "expected a command near '{}'", near),
            ParseError::MixedMedium => write!(f, "cannot mix '|', '##' and 'SS' in one job"),
            ParseError::RepeatedMedium(ref op) => write!(f, "'{}' may only appear once", op),
            ParseError::RedirectInBroadcast(ref op) => {
                write!(f, "'{}' is not allowed with '##' or 'SS'", op)
            }
            ParseError::RepeatedRedirect(ref op) => write!(f, "'{}' may only appear once", op),
            ParseError::ConflictingRedirect => write!(f, "cannot use both '>' and '>>'"),
            ParseError::MissingRedirectTarget(ref op) => write!(f, "no file to redirect after '{}'", op),
            ParseError::UnexpectedToken(ref token) => write!(f, "unexpected '{}'", token),
            ParseError::InvalidPgid(ref arg) => write!(f, "invalid pgid '{}'", arg),
            ParseError::MissingDaemonCommand => write!(f, "daemonize what?"),
        }
    }
}
