use std::fmt;
use std::io;
use std::path::Path;

use failure::{Fail, ResultExt};
use rustyline::{
    self,
    completion::{Completer, FilenameCompleter, Pair},
    error::ReadlineError,
    highlight::Highlighter,
    hint::Hinter,
    validate::Validator,
    CompletionType, Config, Helper,
};

use crate::errors::{ErrorKind, Result};

struct EditorHelper(FilenameCompleter);

impl Completer for EditorHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &rustyline::Context<'_>,
    ) -> ::std::result::Result<(usize, Vec<Pair>), ReadlineError> {
        self.0.complete(line, pos, ctx)
    }
}

impl Hinter for EditorHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        None
    }
}

impl Highlighter for EditorHelper {}

impl Helper for EditorHelper {}

impl Validator for EditorHelper {}

/// Line editor with file name completion and a bounded history.
pub struct Editor {
    internal: rustyline::Editor<EditorHelper>,
    /// The total number of history items ever saved
    history_count: usize,
    history_capacity: usize,
}

impl Editor {
    pub fn with_capacity(history_capacity: usize) -> Editor {
        let config = Config::builder()
            .max_history_size(history_capacity)
            .history_ignore_space(true)
            .completion_type(CompletionType::Circular)
            .build();

        let mut internal = rustyline::Editor::with_config(config);
        internal.set_helper(Some(EditorHelper(FilenameCompleter::new())));

        Editor {
            internal,
            history_count: 0,
            history_capacity,
        }
    }

    /// Returns `None` at end of input. Ctrl-C discards the line and returns
    /// an empty one.
    pub fn readline(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.internal.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Eof) => Ok(None),
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(e) => Err(e.context(ErrorKind::Readline).into()),
        }
    }

    pub fn load_history<P: AsRef<Path> + ?Sized>(&mut self, path: &P) -> Result<()> {
        match self.internal.load_history(path) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let ReadlineError::Io(ref inner) = e {
                    if inner.kind() == io::ErrorKind::NotFound {
                        return Ok(());
                    }
                }

                Err(e.context(ErrorKind::Readline).into())
            }
        }
    }

    pub fn save_history<P: AsRef<Path> + ?Sized>(&mut self, path: &P) -> Result<()> {
        self.internal
            .save_history(path)
            .context(ErrorKind::Readline)?;
        Ok(())
    }

    pub fn add_history_entry(&mut self, line: &str) {
        if self.internal.add_history_entry(line) {
            self.history_count += 1;
        }
    }

    pub fn history_len(&self) -> usize {
        self.internal.history().len()
    }
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "count: {}", self.history_count)?;
        write!(f, "capacity: {}", self.history_capacity)
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn init_with_capacity() {
        let capacity = 10;
        let state = Editor::with_capacity(capacity);
        assert_eq!(state.history_len(), 0);
        assert_eq!(state.history_count, 0);
        assert_eq!(state.history_capacity, capacity);
    }

    #[test]
    fn add_history_entry_duplicate() {
        let mut state = Editor::with_capacity(2);

        let item = "dup";
        state.add_history_entry(item);
        assert_eq!(state.history_len(), 1);

        state.add_history_entry(item);
        assert_eq!(state.history_len(), 1);
        assert_eq!(state.history_count, 1);
    }

    #[test]
    fn add_history_entry_rollover() {
        let mut state = Editor::with_capacity(2);
        for i in 0..3 {
            state.add_history_entry(&format!("cmd{}", i));
        }
        assert_eq!(state.history_count, 3);
        assert_eq!(state.history_len(), 2);
    }

    #[test]
    fn missing_history_file_is_not_an_error() {
        let dir = TempDir::new("msh-editor").unwrap();
        let mut state = Editor::with_capacity(10);
        assert!(state.load_history(&dir.path().join("missing")).is_ok());
    }

    #[test]
    fn history_survives_save_and_load() {
        let dir = TempDir::new("msh-editor").unwrap();
        let path = dir.path().join("history");

        let mut state = Editor::with_capacity(10);
        state.add_history_entry("ls | wc");
        state.add_history_entry("jobs");
        state.save_history(&path).unwrap();

        let mut loaded = Editor::with_capacity(10);
        loaded.load_history(&path).unwrap();
        assert_eq!(loaded.history_len(), 2);
    }
}
