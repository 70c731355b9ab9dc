use std::fmt;
use std::slice;

use log::{debug, info};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};

use crate::core::{
    job::{Job, JobStatus},
    parser::JobLookup,
};

/// Background jobs, running or stopped, in the order they were added.
#[derive(Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn push(&mut self, job: Job) {
        debug!("adding job {} to the job table", job);
        self.jobs.push(job);
    }

    pub fn remove(&mut self, pgid: Pid) -> Option<Job> {
        let index = self.find_job(pgid)?;
        Some(self.jobs.remove(index))
    }

    /// Finds the job in process group `pgid`, or the most recent job if
    /// `pgid` is `None`.
    pub fn lookup(&self, pgid: Option<Pid>) -> Option<&Job> {
        match pgid {
            Some(pgid) => self.find_job(pgid).map(|i| &self.jobs[i]),
            None => self.jobs.last(),
        }
    }

    pub fn get_mut(&mut self, pgid: Pid) -> Option<&mut Job> {
        let index = self.find_job(pgid)?;
        Some(&mut self.jobs[index])
    }

    pub fn iter(&self) -> slice::Iter<'_, Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Polls every job without blocking and drops the ones that completed.
    pub fn update_all(&mut self) {
        for job in &mut self.jobs {
            let temp_result = job.update_status();
            log_if_err!(temp_result, "failed to poll job [{:?}]", job.pgid());
        }

        self.jobs.retain(|job| job.status() != JobStatus::Completed);
    }

    /// Asks every remaining job to terminate. Stopped jobs are continued so
    /// the signal is delivered. A group that cannot be signalled is logged
    /// and skipped.
    pub fn terminate_all(&mut self) {
        for job in self.jobs.drain(..) {
            let pgid = match job.pgid() {
                Some(pgid) => pgid,
                None => continue,
            };

            info!("terminating job {}", job);
            let temp_result = signal::killpg(pgid, Signal::SIGTERM);
            log_if_err!(temp_result, "failed to send SIGTERM to [{}]", pgid);
            if job.is_stopped() {
                let temp_result = signal::killpg(pgid, Signal::SIGCONT);
                log_if_err!(temp_result, "failed to send SIGCONT to [{}]", pgid);
            }
        }
    }

    fn find_job(&self, pgid: Pid) -> Option<usize> {
        self.jobs.iter().position(|job| job.pgid() == Some(pgid))
    }
}

impl JobLookup for JobTable {
    fn lookup_pgid(&self, pgid: Option<Pid>) -> Option<Pid> {
        self.lookup(pgid).and_then(Job::pgid)
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for job in &self.jobs {
            writeln!(f, "{}", job)?;
        }
        Ok(())
    }
}
