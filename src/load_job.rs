//! Getting a song from the backend into its record.
//!
//! There are two ways to do it.  [LoadTask::run_blocking] is the body of a scheduler job: it calls the backend's
//! blocking load until it gets a handle or an error it shouldn't retry.  [LoadTask::submit_async] hands the path to the
//! backend's own non-blocking loader with a callback.  Both finish the same way, by writing the outcome into the
//! record's shared slot.
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use crate::record::{lock_slot, SharedSlot, SongRecord};
use crate::*;

/// How a blocking load reacts to failures.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RetrySettings {
    pub(crate) unknown_error_policy: UnknownErrorPolicy,
    pub(crate) max_unknown_error_attempts: Option<u32>,
    pub(crate) retry_backoff: Duration,
}

pub(crate) struct LoadTask<BackendImpl: AudioBackend, ClockImpl: Clock> {
    backend: Arc<BackendImpl>,
    clock: Arc<ClockImpl>,
    id: SongId,
    path: String,
    slot: SharedSlot<BackendImpl::Handle>,
    finished: bool,
}

impl<BackendImpl: AudioBackend, ClockImpl: Clock> LoadTask<BackendImpl, ClockImpl> {
    pub(crate) fn new(
        backend: Arc<BackendImpl>,
        clock: Arc<ClockImpl>,
        record: &SongRecord<BackendImpl::Handle>,
    ) -> LoadTask<BackendImpl, ClockImpl> {
        LoadTask {
            backend,
            clock,
            id: record.id,
            path: record.path.clone(),
            slot: Arc::clone(&record.slot),
            finished: false,
        }
    }

    /// Decide whether a failed attempt should be retried.
    fn should_retry(
        &self,
        code: ErrorCode,
        kind: LoadErrorKind,
        settings: &RetrySettings,
    ) -> bool {
        match kind {
            LoadErrorKind::Transient => {
                debug!("{} is busy (code {}), retrying", self.path, code);
                true
            }
            LoadErrorKind::Fatal => {
                error!("Loading {} failed with fatal code {}", self.path, code);
                false
            }
            LoadErrorKind::Unknown => match settings.unknown_error_policy {
                UnknownErrorPolicy::Retry => {
                    warn!(
                        "Loading {} returned unexpected code {}, retrying",
                        self.path, code
                    );
                    true
                }
                UnknownErrorPolicy::Fatal => {
                    error!(
                        "Loading {} returned unexpected code {}, giving up",
                        self.path, code
                    );
                    false
                }
            },
        }
    }

    /// Load the song on the current thread, retrying as `settings` allow.
    ///
    /// Transient failures are retried for as long as they keep happening; only unknown codes count towards
    /// `max_unknown_error_attempts`.
    pub(crate) fn run_blocking(mut self, settings: RetrySettings) {
        let mut attempts = 0u32;
        let mut unknown_failures = 0u32;
        loop {
            attempts += 1;
            let code = match self.backend.load_sync(&self.path) {
                Ok(handle) => {
                    debug!(
                        "Loaded {} ({}) after {} attempt(s)",
                        self.path, self.id, attempts
                    );
                    self.finish(Ok(handle));
                    return;
                }
                Err(code) => code,
            };

            let kind = self.backend.classify_error(code);
            if !self.should_retry(code, kind, &settings) {
                self.finish(Err(code));
                return;
            }

            if kind == LoadErrorKind::Unknown {
                unknown_failures += 1;
                if settings
                    .max_unknown_error_attempts
                    .map_or(false, |max| unknown_failures >= max)
                {
                    error!(
                        "Giving up on {} after {} unexpected results, last code {}",
                        self.path, unknown_failures, code
                    );
                    self.finish(Err(code));
                    return;
                }
            }

            if settings.retry_backoff > Duration::from_millis(0) {
                std::thread::sleep(settings.retry_backoff);
            }
        }
    }

    /// Start a non-blocking load through the backend.  The backend's result is stored as-is; nothing is retried.
    pub(crate) fn submit_async(self) {
        let backend = Arc::clone(&self.backend);
        let path = self.path.clone();
        backend.load_async(
            &path,
            Box::new(move |result| {
                let mut task = self;
                if let Err(code) = &result {
                    error!("Loading {} failed with code {}", task.path, code);
                }
                task.finish(result);
            }),
        );
    }

    fn finish(&mut self, result: Result<BackendImpl::Handle, ErrorCode>) {
        self.finished = true;
        let now = self.clock.now_millis();
        let orphan = lock_slot(&self.slot).complete(result, now);
        if let Some(handle) = orphan {
            debug!(
                "Releasing a handle for {} which no record owns anymore",
                self.path
            );
            self.backend.release(handle);
        }
    }
}

/// A task which goes away without a result (its job panicked, was never run, or the backend dropped the callback)
/// still has to settle the slot, or the song would stay pending forever.
impl<BackendImpl: AudioBackend, ClockImpl: Clock> Drop for LoadTask<BackendImpl, ClockImpl> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        error!("Load of {} ({}) ended without a result", self.path, self.id);
        self.finish(Err(LOAD_ABANDONED));
    }
}
