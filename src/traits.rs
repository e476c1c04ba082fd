//! The collaborators the [SongCache](crate::SongCache) drives.
//!
//! The cache never decodes anything itself.  An [AudioBackend] turns paths into decoded handles and owns the memory
//! behind them, a [Vfs] reports how big the backing files are for budgeting purposes, a [Clock] orders accesses, and a
//! [JobScheduler] runs blocking loads somewhere other than the calling thread.
use std::io::Error;

/// A backend-specific load result code.  Zero means success.
pub type ErrorCode = i32;

/// Recorded when a load ends without the backend ever reporting a result, e.g. because the load panicked or its
/// callback was dropped.
pub const LOAD_ABANDONED: ErrorCode = i32::MIN;

/// Invoked by the backend when a non-blocking load finishes.
pub type LoadCallback<H> = Box<dyn FnOnce(Result<H, ErrorCode>) + Send + 'static>;

/// A unit of work for a [JobScheduler].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// What a failed load means for the job that saw it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadErrorKind {
    /// The file is busy or locked; trying again will probably work.
    Transient,
    /// Out of memory, corrupt file, and so on.  Retrying is pointless.
    Fatal,
    /// A code the backend doesn't know how to classify.
    Unknown,
}

/// A decoding backend, e.g. a wrapper over a native audio library.
pub trait AudioBackend: Send + Sync + 'static {
    /// A decoded sound.
    ///
    /// Cloning must be cheap and must not duplicate the decoded data: the cache hands clones to playback but releases
    /// its own copy exactly once via [AudioBackend::release].
    type Handle: Clone + Send + 'static;

    /// Load a file, blocking until it is decoded or the load fails.
    fn load_sync(&self, path: &str) -> Result<Self::Handle, ErrorCode>;

    /// Start loading a file and return immediately.  `on_complete` must be called exactly once, from any thread.
    fn load_async(&self, path: &str, on_complete: LoadCallback<Self::Handle>);

    /// Free the decoded data behind a handle.
    fn release(&self, handle: Self::Handle);

    fn classify_error(&self, code: ErrorCode) -> LoadErrorKind;
}

/// Answers questions about the files behind song paths.
pub trait Vfs: Send + Sync + 'static {
    /// Size in bytes of the file at `key`.
    fn file_size(&self, key: &str) -> Result<u64, Error>;
}

pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since some fixed point.  Must never go backwards.
    fn now_millis(&self) -> i64;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum JobPriority {
    /// The caller is waiting on this.
    High,
    Background,
}

/// Runs jobs asynchronously.  The cache never observes a job's result except through the state the job writes.
pub trait JobScheduler: Send + Sync + 'static {
    fn dispatch(&self, priority: JobPriority, job: Job);
}
