//! [JobScheduler] implementations.
//!
//! [ThreadPoolScheduler] is what a real player wants: a handful of named worker threads fed through two channels, one
//! per [JobPriority], with high-priority work always taken first.  [InlineScheduler] runs each job on the dispatching
//! thread, which is occasionally useful for tools that load one file and exit.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::{error, trace};

use crate::*;

/// Run a job, keeping the worker alive if it panics.
fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Background job panicked");
    }
}

fn worker_loop(high: Receiver<Job>, background: Receiver<Job>) {
    loop {
        if let Ok(job) = high.try_recv() {
            run_job(job);
            continue;
        }

        let job = crossbeam_channel::select! {
            recv(high) -> job => job,
            recv(background) -> job => job,
        };
        match job {
            Ok(job) => run_job(job),
            Err(_) => break,
        }
    }

    // The senders are gone; finish whatever was already queued.
    for job in high.try_iter().chain(background.try_iter()) {
        run_job(job);
    }
}

struct Senders {
    high: Sender<Job>,
    background: Sender<Job>,
}

/// A fixed pool of worker threads.
///
/// Dropping the pool lets the workers drain their queues, then joins them.
pub struct ThreadPoolScheduler {
    senders: Option<Senders>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl ThreadPoolScheduler {
    pub fn new(num_threads: usize) -> std::io::Result<ThreadPoolScheduler> {
        let (high_tx, high_rx) = crossbeam_channel::unbounded();
        let (background_tx, background_rx) = crossbeam_channel::unbounded();

        let mut handles = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads.max(1) {
            let high = high_rx.clone();
            let background = background_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("song-loader-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    worker_loop(high, background);
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Song loader pool initialized: {} threads", handles.len());
        Ok(ThreadPoolScheduler {
            senders: Some(Senders {
                high: high_tx,
                background: background_tx,
            }),
            handles,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }
}

impl JobScheduler for ThreadPoolScheduler {
    fn dispatch(&self, priority: JobPriority, job: Job) {
        let senders = match &self.senders {
            Some(s) => s,
            None => return,
        };
        let sender = match priority {
            JobPriority::High => &senders.high,
            JobPriority::Background => &senders.background,
        };
        if sender.send(job).is_err() {
            error!("Song loader pool has no live workers; dropping a {:?} job", priority);
        }
    }
}

impl Drop for ThreadPoolScheduler {
    fn drop(&mut self) {
        trace!("Song loader pool shutting down ({} threads)", self.handles.len());
        self.senders = None;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Song loader thread panicked outside of a job");
            }
        }
    }
}

/// Runs every job immediately on the thread that dispatches it.
#[derive(Debug, Default)]
pub struct InlineScheduler;

impl JobScheduler for InlineScheduler {
    fn dispatch(&self, _priority: JobPriority, job: Job) {
        run_job(job);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};

    use super::*;

    #[test]
    fn test_pool_runs_everything_before_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPoolScheduler::new(3).unwrap();
            assert_eq!(pool.num_threads(), 3);
            for i in 0..100 {
                let counter = counter.clone();
                let priority = if i % 2 == 0 {
                    JobPriority::High
                } else {
                    JobPriority::Background
                };
                pool.dispatch(
                    priority,
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_high_priority_first() {
        let pool = ThreadPoolScheduler::new(1).unwrap();
        let order = Arc::new(Mutex::new(vec![]));

        // Park the only worker so that both queues fill up behind it.
        let barrier = Arc::new(Barrier::new(2));
        let worker_barrier = barrier.clone();
        pool.dispatch(
            JobPriority::Background,
            Box::new(move || {
                worker_barrier.wait();
            }),
        );

        for (priority, name) in [
            (JobPriority::Background, "background"),
            (JobPriority::High, "high"),
        ]
        .iter()
        .copied()
        {
            let order = order.clone();
            pool.dispatch(priority, Box::new(move || order.lock().unwrap().push(name)));
        }

        barrier.wait();
        std::mem::drop(pool);
        assert_eq!(*order.lock().unwrap(), vec!["high", "background"]);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPoolScheduler::new(1).unwrap();
            pool.dispatch(JobPriority::High, Box::new(|| panic!("boom")));
            let c = counter.clone();
            pool.dispatch(
                JobPriority::High,
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inline_runs_immediately() {
        let counter = AtomicUsize::new(0);
        let counter = Arc::new(counter);
        let c = counter.clone();
        InlineScheduler.dispatch(
            JobPriority::Background,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
