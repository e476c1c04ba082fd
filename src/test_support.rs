//! Test doubles for the cache's collaborators.
use std::collections::{HashMap, VecDeque};
use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::*;

pub(crate) const BUSY: ErrorCode = 19;
pub(crate) const OUT_OF_MEMORY: ErrorCode = 43;

/// A decoded sound from the [FakeBackend].  `serial` tells apart repeated loads of the same path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FakeSound {
    pub(crate) path: String,
    pub(crate) serial: u32,
}

#[derive(Default)]
struct FakeBackendState {
    /// Codes to fail with, per path, before loads of it start succeeding.
    scripted: HashMap<String, VecDeque<ErrorCode>>,
    /// Blocking loads of these paths panic, this many times each.
    panics: HashMap<String, u32>,
    sync_loads: Vec<String>,
    async_loads: Vec<String>,
    pending: Vec<(String, LoadCallback<FakeSound>)>,
    released: Vec<FakeSound>,
    next_serial: u32,
}

impl FakeBackendState {
    fn next_result(&mut self, path: &str) -> Result<FakeSound, ErrorCode> {
        if let Some(code) = self.scripted.get_mut(path).and_then(|q| q.pop_front()) {
            return Err(code);
        }
        self.next_serial += 1;
        Ok(FakeSound {
            path: path.to_string(),
            serial: self.next_serial,
        })
    }
}

/// A backend whose loads always succeed unless scripted otherwise.
///
/// Non-blocking loads are parked until [FakeBackend::complete_async] unless the backend was built with
/// [FakeBackend::immediate].
#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeBackendState>,
    complete_immediately: bool,
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<FakeBackend> {
        Arc::new(FakeBackend::default())
    }

    pub(crate) fn immediate() -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            complete_immediately: true,
            ..Default::default()
        })
    }

    pub(crate) fn script_failures(&self, path: &str, codes: &[ErrorCode]) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(path.to_string())
            .or_default()
            .extend(codes.iter().copied());
    }

    pub(crate) fn script_panics(&self, path: &str, times: u32) {
        *self
            .state
            .lock()
            .unwrap()
            .panics
            .entry(path.to_string())
            .or_default() += times;
    }

    pub(crate) fn sync_loads(&self) -> Vec<String> {
        self.state.lock().unwrap().sync_loads.clone()
    }

    pub(crate) fn async_loads(&self) -> Vec<String> {
        self.state.lock().unwrap().async_loads.clone()
    }

    pub(crate) fn released(&self) -> Vec<FakeSound> {
        self.state.lock().unwrap().released.clone()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Finish every parked non-blocking load of `path`.
    pub(crate) fn complete_async(&self, path: &str) {
        let ready = {
            let mut state = self.state.lock().unwrap();
            let (ready, rest) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition::<Vec<_>, _>(|(p, _)| p == path);
            state.pending = rest;
            ready
                .into_iter()
                .map(|(p, cb)| (state.next_result(&p), cb))
                .collect::<Vec<_>>()
        };

        // Callbacks may call back into the backend, so they run without the lock.
        for (result, cb) in ready {
            cb(result);
        }
    }

    /// Throw away every parked callback without calling it.
    pub(crate) fn drop_pending(&self) {
        let pending = std::mem::take(&mut self.state.lock().unwrap().pending);
        drop(pending);
    }
}

impl AudioBackend for FakeBackend {
    type Handle = FakeSound;

    fn load_sync(&self, path: &str) -> Result<FakeSound, ErrorCode> {
        let mut state = self.state.lock().unwrap();
        state.sync_loads.push(path.to_string());
        if let Some(left) = state.panics.get_mut(path).filter(|left| **left > 0) {
            *left -= 1;
            drop(state);
            panic!("decoder crashed on {}", path);
        }
        state.next_result(path)
    }

    fn load_async(&self, path: &str, on_complete: LoadCallback<FakeSound>) {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.async_loads.push(path.to_string());
            if !self.complete_immediately {
                state.pending.push((path.to_string(), on_complete));
                return;
            }
            state.next_result(path)
        };
        on_complete(result);
    }

    fn release(&self, handle: FakeSound) {
        self.state.lock().unwrap().released.push(handle);
    }

    fn classify_error(&self, code: ErrorCode) -> LoadErrorKind {
        match code {
            BUSY => LoadErrorKind::Transient,
            OUT_OF_MEMORY => LoadErrorKind::Fatal,
            _ => LoadErrorKind::Unknown,
        }
    }
}

/// File sizes from a map; unknown paths are an error.
#[derive(Default)]
pub(crate) struct MapVfs(pub(crate) Mutex<HashMap<String, u64>>);

impl MapVfs {
    pub(crate) fn with_sizes(sizes: &[(&str, u64)]) -> MapVfs {
        MapVfs(Mutex::new(
            sizes.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        ))
    }
}

impl Vfs for MapVfs {
    fn file_size(&self, key: &str) -> Result<u64, Error> {
        self.0
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "no such file"))
    }
}

/// A clock which only moves when told to.
#[derive(Debug, Default)]
pub(crate) struct ManualClock(AtomicI64);

impl ManualClock {
    pub(crate) fn new(start: i64) -> Arc<ManualClock> {
        Arc::new(ManualClock(AtomicI64::new(start)))
    }

    pub(crate) fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Queues jobs until the test runs them.  Clones share the queue.
#[derive(Clone, Default)]
pub(crate) struct ManualScheduler(Arc<Mutex<Vec<(JobPriority, Job)>>>);

impl ManualScheduler {
    pub(crate) fn queued(&self) -> Vec<JobPriority> {
        self.0.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    pub(crate) fn run_all(&self) {
        let jobs = std::mem::take(&mut *self.0.lock().unwrap());
        for (_, job) in jobs {
            job();
        }
    }
}

impl JobScheduler for ManualScheduler {
    fn dispatch(&self, priority: JobPriority, job: Job) {
        self.0.lock().unwrap().push((priority, job));
    }
}
