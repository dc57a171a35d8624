//! The dispatch loop: one `poll` over job input and every completion channel.

use super::{LoopState, Supervisor};
use crate::error::{PoolvisorError, Result};
use crate::input::{Entry, PairReader};
use crate::job::{Job, JobRejection};
use crate::worker::{CompletionRead, WorkRequest, WorkerId};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io::Read;
use std::os::unix::io::AsFd;
use tracing::{error, info, trace, warn};

/// What one readiness wait reported.
#[derive(Debug, Default)]
struct Readiness {
    /// An input entry can be taken.
    input: bool,
    /// Workers with something on their completion channel, type-major order.
    completions: Vec<WorkerId>,
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|r| {
        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL)
    })
}

impl Supervisor {
    /// Route one job to the next worker of its type.
    ///
    /// The write is fire-and-forget: a busy worker simply finds the job
    /// queued on its command channel. Rejections are logged and counted and
    /// leave every rotation cursor untouched, except `WorkerGone`, where the
    /// cursor has already moved past the dead worker.
    pub fn dispatch(&mut self, job: Job) -> std::result::Result<WorkerId, JobRejection> {
        let outcome = self.try_dispatch(job);
        match &outcome {
            Ok(worker) => {
                self.stats.jobs_dispatched += 1;
                info!(
                    job_type = job.worker_type,
                    duration = job.duration,
                    worker = %worker,
                    "Dispatched job type {} (duration: {}) to worker {}",
                    job.worker_type,
                    job.duration,
                    worker
                );
            }
            Err(rejection) => self.reject(rejection),
        }
        outcome
    }

    fn try_dispatch(&mut self, job: Job) -> std::result::Result<WorkerId, JobRejection> {
        job.validate(self.pool.limits())?;

        let group = self
            .pool
            .group_mut(job.worker_type)
            .ok_or(JobRejection::NoWorkers(job.worker_type))?;
        let worker = group.select();
        let id = worker.id();

        worker
            .proc_mut()
            .send(&WorkRequest::run(job.duration))
            .map_err(|e| JobRejection::WorkerGone {
                worker: id,
                reason: e.to_string(),
            })?;
        worker.jobs_dispatched += 1;
        Ok(id)
    }

    fn reject(&mut self, rejection: &JobRejection) {
        self.stats.jobs_rejected += 1;
        error!("{}", rejection);
    }

    /// Check one input entry and dispatch it.
    pub fn handle_entry(&mut self, entry: Entry) -> Option<WorkerId> {
        match Job::from_entry(entry, self.pool.limits()) {
            Ok(job) => self.dispatch(job).ok(),
            Err(rejection) => {
                self.reject(&rejection);
                None
            }
        }
    }

    /// Run the dispatch loop until the job input is exhausted.
    ///
    /// Each iteration blocks in a single `poll`, then services at most one
    /// job entry followed by every ready completion channel. Ends in
    /// `Draining`; a read error on the job input is returned as fatal.
    pub fn run<R: Read + AsFd>(&mut self, input: &mut PairReader<R>) -> Result<()> {
        while self.state == LoopState::Running && !input.is_drained() {
            let ready = self.wait_for_readiness(input)?;

            if ready.input {
                self.service_input(input)?;
            }
            for worker in ready.completions {
                self.drain_completions(worker);
            }
        }

        if self.state == LoopState::Running {
            self.state = LoopState::Draining;
            info!("End of job input received. Waiting for workers to finish...");
        }
        Ok(())
    }

    /// Block until the input or any open completion channel is ready.
    ///
    /// When input is already buffered the wait does not block, so queued
    /// jobs are never held behind an idle descriptor.
    fn wait_for_readiness<R: Read + AsFd>(&self, input: &PairReader<R>) -> Result<Readiness> {
        let buffered = input.has_entry();
        let watch_input = !buffered && !input.is_eof();

        let mut fds = Vec::with_capacity(self.pool.worker_count() + 1);
        let mut ids = Vec::with_capacity(self.pool.worker_count());
        if watch_input {
            fds.push(PollFd::new(input.as_fd(), PollFlags::POLLIN));
        }
        for worker in self.pool.workers() {
            if let Some(fd) = worker.proc().completion_fd() {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
                ids.push(worker.id());
            }
        }

        let timeout = if buffered {
            PollTimeout::ZERO
        } else {
            PollTimeout::NONE
        };
        loop {
            match poll(&mut fds, timeout) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PoolvisorError::Channel(format!("poll failed: {}", e))),
            }
        }

        let (input_ready, worker_fds) = if watch_input {
            (is_ready(&fds[0]), &fds[1..])
        } else {
            (buffered, &fds[..])
        };
        let completions = ids
            .into_iter()
            .zip(worker_fds)
            .filter(|(_, fd)| is_ready(fd))
            .map(|(id, _)| id)
            .collect();

        Ok(Readiness {
            input: input_ready,
            completions,
        })
    }

    /// Take one entry from the input, reading once if nothing is buffered.
    fn service_input<R: Read>(&mut self, input: &mut PairReader<R>) -> Result<()> {
        if !input.has_entry() {
            input.fill().map_err(PoolvisorError::Input)?;
        }
        if let Some(entry) = input.take_entry() {
            self.handle_entry(entry);
        }
        Ok(())
    }

    /// Read pending completion tokens from one worker.
    ///
    /// Tokens only feed the counters. EOF means the worker is gone; its
    /// channel is closed so it stops showing up as ready.
    fn drain_completions(&mut self, id: WorkerId) {
        let Some(worker) = self.pool.worker_mut(id) else {
            return;
        };

        match worker.proc_mut().read_completions() {
            Ok(CompletionRead::Tokens(n)) => {
                worker.jobs_completed += n;
                self.stats.jobs_completed += n;
                trace!(worker = %id, tokens = n, outstanding = worker.outstanding(), "Drained completions");
            }
            Ok(CompletionRead::Closed) => {
                warn!(
                    worker = %id,
                    outstanding = worker.outstanding(),
                    "Worker {} exited unexpectedly",
                    id
                );
                worker.proc_mut().close_completion();
            }
            Err(e) => {
                warn!(worker = %id, error = %e, "Worker {}: completion channel failed", id);
                worker.proc_mut().close_completion();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::pool::tests::{decl, echo_launcher};
    use crate::worker::WorkerLauncher;
    use crate::worker::ipc::PipeFd;
    use std::io::Write;

    fn supervisor(decls: &[crate::config::WorkerDecl]) -> Supervisor {
        Supervisor::start(decls, Limits::default(), &echo_launcher()).unwrap()
    }

    fn input_from(text: &str) -> PairReader<PipeFd> {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let mut writer = PipeFd::new(write_fd);
        writer.write_all(text.as_bytes()).unwrap();
        drop(writer);
        PairReader::new(PipeFd::new(read_fd))
    }

    fn job(worker_type: usize, duration: u32) -> Job {
        Job {
            worker_type,
            duration,
        }
    }

    #[test]
    fn test_round_robin_back_to_back() {
        let mut sup = supervisor(&[decl(1, 2)]);

        let routed: Vec<String> = (0..3)
            .map(|_| sup.dispatch(job(1, 1)).unwrap().to_string())
            .collect();

        assert_eq!(routed, vec!["1-0", "1-1", "1-0"]);
        assert_eq!(sup.stats().jobs_dispatched, 3);
        sup.shutdown();
    }

    #[test]
    fn test_round_robin_index_law() {
        let capacity = 4;
        let mut sup = supervisor(&[decl(3, capacity)]);

        let picks: Vec<usize> = (0..11).map(|_| sup.dispatch(job(3, 1)).unwrap().index).collect();
        let expected: Vec<usize> = (0..11).map(|k| k % capacity).collect();
        assert_eq!(picks, expected);

        let counts: Vec<usize> = sup
            .pool()
            .group(3)
            .unwrap()
            .workers()
            .iter()
            .map(|w| w.jobs_dispatched)
            .collect();
        assert_eq!(counts, vec![3, 3, 3, 2]);
        sup.shutdown();
    }

    #[test]
    fn test_types_rotate_independently() {
        let mut sup = supervisor(&[decl(1, 2), decl(2, 3)]);

        assert_eq!(sup.dispatch(job(1, 1)).unwrap().to_string(), "1-0");
        assert_eq!(sup.dispatch(job(2, 1)).unwrap().to_string(), "2-0");
        assert_eq!(sup.dispatch(job(2, 1)).unwrap().to_string(), "2-1");
        assert_eq!(sup.dispatch(job(1, 1)).unwrap().to_string(), "1-1");
        assert_eq!(sup.dispatch(job(2, 1)).unwrap().to_string(), "2-2");
        sup.shutdown();
    }

    #[test]
    fn test_zero_capacity_type_is_rejected() {
        let mut sup = supervisor(&[decl(1, 2)]);
        sup.dispatch(job(1, 1)).unwrap();

        let err = sup.dispatch(job(2, 3)).unwrap_err();
        assert_eq!(err, JobRejection::NoWorkers(2));
        assert_eq!(sup.stats().jobs_rejected, 1);
        assert_eq!(sup.pool().group(1).unwrap().next_index(), 1);
        assert!(sup.pool().group(2).is_none());
        sup.shutdown();
    }

    #[test]
    fn test_out_of_range_jobs_are_rejected() {
        let mut sup = supervisor(&[decl(1, 1), decl(2, 2)]);

        assert!(sup.handle_entry(Entry::Pair(6, 3)).is_none());
        assert!(sup.handle_entry(Entry::Pair(2, 11)).is_none());
        assert!(sup.handle_entry(Entry::Malformed("not".to_string())).is_none());
        assert!(matches!(
            sup.dispatch(job(2, 0)),
            Err(JobRejection::InvalidDuration { .. })
        ));

        assert_eq!(sup.stats().jobs_rejected, 4);
        assert_eq!(sup.stats().jobs_dispatched, 0);
        assert_eq!(sup.pool().group(2).unwrap().next_index(), 0);
        sup.shutdown();
    }

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        let mut sup = supervisor(&[decl(1, 1)]);
        let mut input = input_from("\n   \n# warm-up\n# 1 1\n");

        sup.run(&mut input).unwrap();
        assert_eq!(sup.stats(), Default::default());
        sup.shutdown();
    }

    #[test]
    fn test_jobs_span_line_breaks() {
        let mut sup = supervisor(&[decl(1, 2)]);
        let mut input = input_from("1 1 1 1\n1\n1\n");

        sup.run(&mut input).unwrap();
        assert_eq!(sup.stats().jobs_dispatched, 3);
        assert_eq!(sup.stats().jobs_rejected, 0);
        assert_eq!(sup.pool().group(1).unwrap().next_index(), 1);
        sup.shutdown();
    }

    #[test]
    fn test_overlong_line_dispatches_nothing() {
        let mut sup = supervisor(&[decl(1, 1)]);
        let mut input = input_from(&format!("{}1 1\n", "x".repeat(256)));

        sup.run(&mut input).unwrap();
        assert_eq!(sup.stats().jobs_dispatched, 0);
        assert_eq!(sup.stats().jobs_rejected, 1);
        assert_eq!(sup.pool().workers().next().unwrap().jobs_dispatched, 0);
        sup.shutdown();
    }

    #[test]
    fn test_run_dispatches_until_eof() {
        let mut sup = supervisor(&[decl(1, 2), decl(2, 1)]);
        let mut input = input_from("1 1\n1 1\n6 3\n2 11\n2 4\n1 1");

        sup.run(&mut input).unwrap();
        assert_eq!(sup.state(), LoopState::Draining);
        assert_eq!(sup.stats().jobs_dispatched, 4);
        assert_eq!(sup.stats().jobs_rejected, 2);

        let per_worker: Vec<(String, usize)> = sup
            .pool()
            .workers()
            .map(|w| (w.id().to_string(), w.jobs_dispatched))
            .collect();
        assert_eq!(
            per_worker,
            vec![
                ("1-0".to_string(), 2),
                ("1-1".to_string(), 1),
                ("2-0".to_string(), 1)
            ]
        );

        let report = sup.shutdown();
        assert_eq!(report.workers_reaped, 3);
        assert_eq!(sup.state(), LoopState::Terminated);
    }

    #[test]
    fn test_run_with_empty_input() {
        let mut sup = supervisor(&[decl(1, 1), decl(2, 1)]);
        let mut input = input_from("");

        sup.run(&mut input).unwrap();
        assert_eq!(sup.state(), LoopState::Draining);
        assert_eq!(sup.stats(), Default::default());
        sup.shutdown();
    }

    #[test]
    fn test_run_drains_completions() {
        let mut sup = supervisor(&[decl(1, 1)]);

        // Keep the input open until the completion has been observed
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let mut writer = PipeFd::new(write_fd);
        let mut input = PairReader::new(PipeFd::new(read_fd));

        writer.write_all(b"1 1\n").unwrap();
        let ready = sup.wait_for_readiness(&input).unwrap();
        assert!(ready.input);
        sup.service_input(&mut input).unwrap();
        assert_eq!(sup.stats().jobs_dispatched, 1);

        while sup.stats().jobs_completed == 0 {
            let ready = sup.wait_for_readiness(&input).unwrap();
            assert!(!ready.input);
            for id in ready.completions {
                sup.drain_completions(id);
            }
        }
        assert_eq!(sup.pool().workers().next().unwrap().outstanding(), 0);

        drop(writer);
        sup.run(&mut input).unwrap();
        sup.shutdown();
    }

    #[test]
    fn test_dead_worker_is_tolerated() {
        // Worker acknowledges one job, then exits
        let launcher = WorkerLauncher::command("/bin/sh", ["-c", "read -r line; printf done"]);
        let mut sup = Supervisor::start(&[decl(1, 1)], Limits::default(), &launcher).unwrap();
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let writer = PipeFd::new(write_fd);
        let input = PairReader::new(PipeFd::new(read_fd));

        sup.dispatch(job(1, 1)).unwrap();

        // Drain the token, then observe EOF; the channel must leave the poll set
        while sup.pool().workers().next().unwrap().proc().completion_fd().is_some() {
            let ready = sup.wait_for_readiness(&input).unwrap();
            for id in ready.completions {
                sup.drain_completions(id);
            }
        }
        assert_eq!(sup.stats().jobs_completed, 1);

        // Later jobs to the dead worker surface as rejections, not errors
        let mut gone = 0;
        for _ in 0..3 {
            if matches!(sup.dispatch(job(1, 1)), Err(JobRejection::WorkerGone { .. })) {
                gone += 1;
            }
        }
        assert!(gone >= 1);

        drop(writer);
        let report = sup.shutdown();
        assert_eq!(report.workers_reaped, 1);
    }
}
