//! Msh - a job-control shell
//!
//! Jobs are single commands or pipelines. Besides `|`, a job's first process
//! can broadcast its output to several others through a message queue (`##`)
//! or a shared-memory segment (`SS`).

#[macro_use]
mod util;

pub mod core;
pub mod editor;
pub mod errors;
pub mod shell;

pub use crate::shell::{Shell, ShellConfig};
pub use crate::util::MshExitStatusExt;
