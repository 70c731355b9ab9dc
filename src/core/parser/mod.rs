//! MSH Parser
//!
//! A small state machine over whitespace-separated tokens. There is no
//! quoting, globbing or expansion: every token is taken literally.

use std::str::SplitWhitespace;

use log::debug;
use nix::unistd::Pid;

use self::ast::*;
use crate::core::job::{Job, Medium};
use crate::core::process::Process;

pub mod ast;

/// Resolves the target of `fg`/`bg`.
pub trait JobLookup {
    /// Returns the pgid of the job in process group `pgid`, or of the most
    /// recently added job if `pgid` is `None`.
    fn lookup_pgid(&self, pgid: Option<Pid>) -> Option<Pid>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    MedPipe,
    MedQueue,
    MedShdm,
    RedirIn,
    RedirOut,
    RedirApp,
    DoneForeground,
    DoneBackground,
    DoneError,
}

impl State {
    fn is_final(self) -> bool {
        match self {
            State::DoneForeground | State::DoneBackground | State::DoneError => true,
            _ => false,
        }
    }

    fn is_broadcast(self) -> bool {
        self == State::MedQueue || self == State::MedShdm
    }
}

struct Parser<'a> {
    tokens: SplitWhitespace<'a>,
    state: State,
}

/// Parses one input line.
pub fn parse<L: JobLookup + ?Sized>(input: &str, jobs: &L) -> Outcome {
    let mut tokens = input.split_whitespace();
    let first = match tokens.next() {
        Some(first) => first,
        None => return Outcome::Empty,
    };

    let mut parser = Parser {
        tokens,
        state: State::Start,
    };
    let outcome = match first {
        EXIT_NAME => Outcome::Builtin(Builtin::Exit),
        CLEAR_NAME => Outcome::Builtin(Builtin::Clear),
        JOBS_NAME => Outcome::Builtin(Builtin::Jobs),
        FG_NAME => parser.parse_job_target(jobs, Builtin::Fg),
        BG_NAME => parser.parse_job_target(jobs, Builtin::Bg),
        DAEMONIZE_NAME => parser.parse_daemonize(),
        _ => match parser.parse_job(input, first) {
            Ok(job) => Outcome::Job(job),
            Err(e) => Outcome::ParseError(e),
        },
    };

    debug!("parsed '{}': {:?}", input, outcome.status());
    outcome
}

impl<'a> Parser<'a> {
    fn fail<T>(&mut self, error: ParseError) -> Result<T, ParseError> {
        self.state = State::DoneError;
        Err(error)
    }

    /// `fg [pgid]` and `bg [pgid]`. A missing argument or `0` selects the
    /// most recent job.
    fn parse_job_target<L, F>(&mut self, jobs: &L, builtin: F) -> Outcome
    where
        L: JobLookup + ?Sized,
        F: Fn(Option<Pid>) -> Builtin,
    {
        let requested = match self.tokens.next() {
            None => None,
            Some(arg) => {
                let pgid = if arg.bytes().all(|b| b.is_ascii_digit()) {
                    arg.parse::<i32>().ok()
                } else {
                    None
                };
                match pgid {
                    Some(0) => None,
                    Some(pgid) => Some(Pid::from_raw(pgid)),
                    None => return Outcome::ParseError(ParseError::InvalidPgid(arg.to_string())),
                }
            }
        };

        Outcome::Builtin(builtin(jobs.lookup_pgid(requested)))
    }

    fn parse_daemonize(&mut self) -> Outcome {
        let program = match self.tokens.next() {
            Some(program) => program,
            None => return Outcome::ParseError(ParseError::MissingDaemonCommand),
        };

        let mut process = Process::new(program);
        for arg in &mut self.tokens {
            process.add_arg(arg);
        }
        Outcome::DaemonProcess(process)
    }

    fn parse_job(&mut self, input: &str, first: &'a str) -> Result<Job, ParseError> {
        let mut job = Job::new(input);
        let mut word = Some(first);

        while !self.state.is_final() {
            let program = match word {
                Some(w) if is_operator(w) || (w == SEPARATOR && self.state.is_broadcast()) => {
                    return self.fail(ParseError::MissingCommand(w.to_string()));
                }
                Some(w) => w,
                None => return self.fail(ParseError::MissingCommand("end of input".to_string())),
            };

            let process = self.parse_args(program)?;
            job.add_process(process);

            match self.state {
                State::MedPipe | State::MedQueue | State::MedShdm => {
                    // the first medium operator decides the job's medium
                    if job.medium() == Medium::None {
                        job.set_medium(match self.state {
                            State::MedPipe => Medium::Pipe,
                            State::MedQueue => Medium::Queue,
                            _ => Medium::SharedMemory,
                        });
                    }
                    word = self.tokens.next();
                }
                State::RedirIn | State::RedirOut | State::RedirApp => {
                    self.parse_redirects(&mut job)?;
                }
                _ => {}
            }
        }

        if self.state == State::DoneBackground {
            if let Some(token) = self.tokens.next() {
                return self.fail(ParseError::UnexpectedToken(token.to_string()));
            }
            job.make_background();
        }

        Ok(job)
    }

    /// Consumes arguments up to the next operator and moves to the state that
    /// operator selects.
    fn parse_args(&mut self, program: &str) -> Result<Process, ParseError> {
        let mut process = Process::new(program);

        loop {
            let token = match self.tokens.next() {
                Some(token) => token,
                None => {
                    self.state = State::DoneForeground;
                    break;
                }
            };

            let next = match token {
                BACKGROUND => State::DoneBackground,
                PIPE => match self.state {
                    State::Start | State::MedPipe => State::MedPipe,
                    _ => return self.fail(ParseError::MixedMedium),
                },
                QUEUE => match self.state {
                    State::Start => State::MedQueue,
                    State::MedQueue => return self.fail(ParseError::RepeatedMedium(QUEUE.to_string())),
                    _ => return self.fail(ParseError::MixedMedium),
                },
                SHARED_MEMORY => match self.state {
                    State::Start => State::MedShdm,
                    State::MedShdm => {
                        return self.fail(ParseError::RepeatedMedium(SHARED_MEMORY.to_string()))
                    }
                    _ => return self.fail(ParseError::MixedMedium),
                },
                SEPARATOR if self.state.is_broadcast() => self.state,
                REDIRECT_IN | REDIRECT_OUT | REDIRECT_APPEND => {
                    if self.state != State::Start && self.state != State::MedPipe {
                        return self.fail(ParseError::RedirectInBroadcast(token.to_string()));
                    }
                    match token {
                        REDIRECT_IN => State::RedirIn,
                        REDIRECT_OUT => State::RedirOut,
                        _ => State::RedirApp,
                    }
                }
                arg => {
                    process.add_arg(arg);
                    continue;
                }
            };

            self.state = next;
            break;
        }

        Ok(process)
    }

    /// Redirections close a job: only more redirections or `&` may follow.
    fn parse_redirects(&mut self, job: &mut Job) -> Result<(), ParseError> {
        let mut seen_in = false;
        let mut seen_out: Option<State> = None;

        while !self.state.is_final() {
            let (operator, state) = match self.state {
                State::RedirIn => (REDIRECT_IN, self.state),
                State::RedirOut => (REDIRECT_OUT, self.state),
                State::RedirApp => (REDIRECT_APPEND, self.state),
                _ => return self.fail(ParseError::MissingCommand(String::new())),
            };

            if state == State::RedirIn {
                if seen_in {
                    return self.fail(ParseError::RepeatedRedirect(operator.to_string()));
                }
                seen_in = true;
            } else {
                match seen_out {
                    Some(previous) if previous == state => {
                        return self.fail(ParseError::RepeatedRedirect(operator.to_string()));
                    }
                    Some(_) => return self.fail(ParseError::ConflictingRedirect),
                    None => seen_out = Some(state),
                }
            }

            let target = match self.tokens.next() {
                Some(target) if !is_operator(target) => target,
                _ => return self.fail(ParseError::MissingRedirectTarget(operator.to_string())),
            };
            match state {
                State::RedirIn => job.set_redirect_in(target),
                _ => job.set_redirect_out(target, state == State::RedirApp),
            }

            self.state = match self.tokens.next() {
                None => State::DoneForeground,
                Some(BACKGROUND) => State::DoneBackground,
                Some(REDIRECT_IN) => State::RedirIn,
                Some(REDIRECT_OUT) => State::RedirOut,
                Some(REDIRECT_APPEND) => State::RedirApp,
                Some(token) => return self.fail(ParseError::UnexpectedToken(token.to_string())),
            };
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    struct Table(Vec<i32>);

    impl JobLookup for Table {
        fn lookup_pgid(&self, pgid: Option<Pid>) -> Option<Pid> {
            match pgid {
                None => self.0.last().map(|&p| Pid::from_raw(p)),
                Some(pgid) => self
                    .0
                    .iter()
                    .find(|&&p| p == pgid.as_raw())
                    .map(|&p| Pid::from_raw(p)),
            }
        }
    }

    fn parse_job(input: &str) -> Job {
        match parse(input, &Table(vec![])) {
            Outcome::Job(job) => job,
            other => panic!("expected a job from '{}', got {:?}", input, other),
        }
    }

    fn parse_error(input: &str) -> ParseError {
        match parse(input, &Table(vec![])) {
            Outcome::ParseError(e) => e,
            other => panic!("expected an error from '{}', got {:?}", input, other),
        }
    }

    fn argvs(job: &Job) -> Vec<Vec<String>> {
        job.processes().iter().map(|p| p.argv().to_vec()).collect()
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(parse("", &Table(vec![])).status(), ParseStatus::Empty);
        assert_eq!(parse(" \t ", &Table(vec![])).status(), ParseStatus::Empty);
    }

    #[test]
    fn test_single_command() {
        let job = parse_job("ls  -l\t/tmp");
        assert_eq!(job.medium(), Medium::None);
        assert_eq!(argvs(&job), vec![vec!["ls", "-l", "/tmp"]]);
        assert!(!job.is_background());
        assert_eq!(job.input(), "ls  -l\t/tmp");
    }

    #[test]
    fn test_pipe_chain() {
        let job = parse_job("a | b | c");
        assert_eq!(job.processes().len(), 3);
        assert_eq!(job.medium(), Medium::Pipe);
        assert!(!job.is_background());
        assert!(job.redirect_in().is_none());
        assert!(job.redirect_out().is_none());
    }

    #[test]
    fn test_queue_broadcast_in_background() {
        let job = parse_job("a ## b , c &");
        assert_eq!(job.processes().len(), 3);
        assert_eq!(job.medium(), Medium::Queue);
        assert!(job.is_background());
        assert!(job.processes().iter().all(|p| p.is_background()));
    }

    #[test]
    fn test_shared_memory_broadcast() {
        let job = parse_job("ls -l SS wc -l , sort -r , cat");
        assert_eq!(job.medium(), Medium::SharedMemory);
        assert_eq!(
            argvs(&job),
            vec![
                vec!["ls", "-l"],
                vec!["wc", "-l"],
                vec!["sort", "-r"],
                vec!["cat"]
            ]
        );
    }

    #[test]
    fn test_comma_is_an_argument_outside_broadcast() {
        let job = parse_job("echo a , b | cat");
        assert_eq!(argvs(&job), vec![vec!["echo", "a", ",", "b"], vec!["cat"]]);
    }

    #[test]
    fn test_pipe_with_redirects() {
        let job = parse_job("a | b < in > out");
        assert_eq!(job.medium(), Medium::Pipe);
        assert_eq!(job.processes().len(), 2);
        assert_eq!(job.redirect_in(), Some(Path::new("in")));
        let out = job.redirect_out().unwrap();
        assert_eq!(out.path, Path::new("out"));
        assert!(!out.append);
    }

    #[test]
    fn test_append_redirect_in_background() {
        let job = parse_job("date >> log &");
        assert!(job.redirect_out().unwrap().append);
        assert!(job.is_background());
    }

    #[test]
    fn test_conflicting_output_redirects() {
        assert_eq!(parse_error("a > x >> y"), ParseError::ConflictingRedirect);
        assert_eq!(parse_error("a >> x > y"), ParseError::ConflictingRedirect);
        assert_eq!(
            parse_error("a > x > y"),
            ParseError::RepeatedRedirect(">".to_string())
        );
        assert_eq!(
            parse_error("a < x < y"),
            ParseError::RepeatedRedirect("<".to_string())
        );
    }

    #[test]
    fn test_mixed_mediums() {
        assert_eq!(parse_error("a | b ## c"), ParseError::MixedMedium);
        assert_eq!(parse_error("a ## b | c"), ParseError::MixedMedium);
        assert_eq!(parse_error("a SS b ## c"), ParseError::MixedMedium);
        assert_eq!(
            parse_error("a ## b ## c"),
            ParseError::RepeatedMedium("##".to_string())
        );
        assert_eq!(
            parse_error("a SS b SS c"),
            ParseError::RepeatedMedium("SS".to_string())
        );
    }

    #[test]
    fn test_redirect_not_allowed_in_broadcast() {
        assert_eq!(
            parse_error("a ## b > out"),
            ParseError::RedirectInBroadcast(">".to_string())
        );
    }

    #[test]
    fn test_background_must_be_last() {
        assert_eq!(
            parse_error("a & b"),
            ParseError::UnexpectedToken("b".to_string())
        );
        assert_eq!(
            parse_error("a > out & b"),
            ParseError::UnexpectedToken("b".to_string())
        );
    }

    #[test]
    fn test_redirect_must_end_job() {
        assert_eq!(
            parse_error("a < in | b"),
            ParseError::UnexpectedToken("|".to_string())
        );
        assert_eq!(
            parse_error("a > out extra"),
            ParseError::UnexpectedToken("extra".to_string())
        );
        assert_eq!(
            parse_error("a >"),
            ParseError::MissingRedirectTarget(">".to_string())
        );
        assert_eq!(
            parse_error("a < &"),
            ParseError::MissingRedirectTarget("<".to_string())
        );
    }

    #[test]
    fn test_missing_commands() {
        assert_eq!(
            parse_error("| a"),
            ParseError::MissingCommand("|".to_string())
        );
        assert_eq!(
            parse_error("a | | b"),
            ParseError::MissingCommand("|".to_string())
        );
        assert_eq!(
            parse_error("a |"),
            ParseError::MissingCommand("end of input".to_string())
        );
        assert_eq!(
            parse_error("a ## b , , c"),
            ParseError::MissingCommand(",".to_string())
        );
    }

    #[test]
    fn test_simple_builtins() {
        let jobs = Table(vec![]);
        assert_eq!(parse("exit", &jobs).status(), ParseStatus::BuiltinExit);
        assert_eq!(parse("clear", &jobs).status(), ParseStatus::BuiltinClear);
        assert_eq!(parse("jobs", &jobs).status(), ParseStatus::BuiltinJobs);
    }

    #[test]
    fn test_fg_without_jobs_finds_nothing() {
        match parse("fg", &Table(vec![])) {
            Outcome::Builtin(Builtin::Fg(None)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fg_and_bg_resolve_pgid() {
        let jobs = Table(vec![100, 200]);
        match parse("fg", &jobs) {
            Outcome::Builtin(Builtin::Fg(Some(pgid))) => assert_eq!(pgid.as_raw(), 200),
            other => panic!("unexpected {:?}", other),
        }
        match parse("bg 0", &jobs) {
            Outcome::Builtin(Builtin::Bg(Some(pgid))) => assert_eq!(pgid.as_raw(), 200),
            other => panic!("unexpected {:?}", other),
        }
        match parse("bg 100", &jobs) {
            Outcome::Builtin(Builtin::Bg(Some(pgid))) => assert_eq!(pgid.as_raw(), 100),
            other => panic!("unexpected {:?}", other),
        }
        match parse("fg 300", &jobs) {
            Outcome::Builtin(Builtin::Fg(None)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fg_rejects_non_numeric_pgid() {
        let jobs = Table(vec![100]);
        match parse("fg %1", &jobs) {
            Outcome::ParseError(ParseError::InvalidPgid(arg)) => assert_eq!(arg, "%1"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse("bg -5", &jobs).status(), ParseStatus::Error);
        assert_eq!(parse("bg 99999999999", &jobs).status(), ParseStatus::Error);
    }

    #[test]
    fn test_daemonize() {
        match parse("daemonize sleep 100", &Table(vec![])) {
            Outcome::DaemonProcess(process) => {
                assert_eq!(process.argv(), &["sleep".to_string(), "100".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse_error("daemonize"),
            ParseError::MissingDaemonCommand
        );
    }
}
