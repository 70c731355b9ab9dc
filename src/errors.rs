//! Error module. See the [failure](https://crates.io/crates/failure) crate for details.

use std::fmt;
use std::result;

use failure::{Backtrace, Context, Fail};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    ctx: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.ctx.get_context()
    }

    /// Terminal ownership could not be transferred; the shell cannot keep
    /// running without knowing which group owns the terminal.
    pub fn is_fatal(&self) -> bool {
        match *self.kind() {
            ErrorKind::Terminal(_) => true,
            _ => false,
        }
    }

    pub(crate) fn syntax<T: AsRef<str>>(reason: T) -> Error {
        Error::from(ErrorKind::Syntax(reason.as_ref().to_string()))
    }

    pub(crate) fn no_such_job<T: AsRef<str>>(job: T) -> Error {
        Error::from(ErrorKind::NoSuchJob(job.as_ref().to_string()))
    }

    pub(crate) fn terminal<T: AsRef<str>>(operation: T) -> Error {
        Error::from(ErrorKind::Terminal(operation.as_ref().to_string()))
    }

    pub(crate) fn capacity<T: AsRef<str>>(channel: T) -> Error {
        Error::from(ErrorKind::Capacity(channel.as_ref().to_string()))
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.ctx.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.ctx.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ctx.cause() {
            Some(cause) => write!(f, "{}: {}", self.ctx, cause),
            None => self.ctx.fmt(f),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Syntax(String),
    NoSuchJob(String),
    Terminal(String),
    Daemonize(String),
    Capacity(String),
    Redirect(String),
    Docopt,
    Io,
    Nix,
    Readline,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ErrorKind::Syntax(ref reason) => write!(f, "parse error: {}", reason),
            ErrorKind::NoSuchJob(ref job) => write!(f, "{}: no such job", job),
            ErrorKind::Terminal(ref operation) => {
                write!(f, "lost control of the terminal ({})", operation)
            }
            ErrorKind::Daemonize(ref command) => write!(f, "{}: failed to daemonize", command),
            ErrorKind::Capacity(ref channel) => {
                write!(f, "pipeline payload does not fit in the {}", channel)
            }
            ErrorKind::Redirect(ref path) => write!(f, "{}: cannot open for redirection", path),
            ErrorKind::Docopt => write!(f, "Docopt error occurred"),
            ErrorKind::Io => write!(f, "I/O error occurred"),
            ErrorKind::Nix => write!(f, "Nix error occurred"),
            ErrorKind::Readline => write!(f, "Readline error occurred"),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::from(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(ctx: Context<ErrorKind>) -> Error {
        Error { ctx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_terminal_errors_are_fatal() {
        assert!(Error::terminal("tcsetpgrp").is_fatal());
        assert!(!Error::no_such_job("42").is_fatal());
        assert!(!Error::from(ErrorKind::Io).is_fatal());
    }

    #[test]
    fn test_display_includes_cause() {
        let result: result::Result<(), nix::Error> = Err(nix::errno::Errno::ENOENT);
        let error: Error = failure::ResultExt::context(result, ErrorKind::Nix)
            .unwrap_err()
            .into();
        assert_eq!(*error.kind(), ErrorKind::Nix);
        assert!(error.to_string().starts_with("Nix error occurred: "));
    }

    #[test]
    fn test_no_such_job_message() {
        assert_eq!(Error::no_such_job("current").to_string(), "current: no such job");
    }
}
