use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Bounded worker pool shared by every generation channel.
pub struct JobSystem {
    pool: ThreadPool,
}

impl JobSystem {
    pub fn new(num_threads: Option<usize>) -> Result<Self, ThreadPoolBuildError> {
        let count = num_threads.unwrap_or_else(default_worker_threads).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(count)
            .thread_name(|index| format!("terrain-worker-{index}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(job);
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Leaves one core for the observer thread, within 2..=8 workers.
pub fn default_worker_threads() -> usize {
    let available = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(4);
    available.saturating_sub(1).clamp(2, 8)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::{default_worker_threads, JobSystem};

    #[test]
    fn pool_honours_requested_thread_count() {
        let jobs = JobSystem::new(Some(3)).expect("build pool");
        assert_eq!(jobs.num_threads(), 3);

        let zero = JobSystem::new(Some(0)).expect("build pool");
        assert_eq!(zero.num_threads(), 1);
    }

    #[test]
    fn default_thread_count_stays_in_range() {
        let count = default_worker_threads();
        assert!((2..=8).contains(&count));
    }

    #[test]
    fn spawned_jobs_run_off_the_calling_thread() {
        let jobs = JobSystem::new(Some(2)).expect("build pool");
        let (tx, rx) = mpsc::channel();
        let caller = std::thread::current().id();
        jobs.spawn(move || {
            let _ = tx.send(std::thread::current().id());
        });
        let worker = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("job should finish");
        assert_ne!(worker, caller);
    }
}
