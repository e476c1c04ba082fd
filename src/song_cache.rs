//! The [SongCache] keeps decoded songs around under a memory budget, loading them in the background.
//!
//! Songs are keyed by [SongId], a hash of their path.  Each known song has a record which outlives its decoded data:
//! eviction releases the handle but keeps the path, size and timestamps so that the song can be reloaded without
//! being rediscovered.  Records only go away on [SongCache::flush].
//!
//! There are two ways to ask for a song:
//!
//! - [SongCache::request_song_load] is best-effort.  If the budget is already spent it hands back an id for a
//!   placeholder and loads nothing.
//! - [SongCache::ensure_song_load] always queues a load, evicting least recently used songs first until the budget is
//!   met or nothing else can go.  Songs flagged as playing are never evicted.
//!
//! The budget counts sizes of the files on disk, not decoded sizes, and is only enforced when a load is ensured.
//!
//! The cache is driven from one thread and takes `&mut self` for everything that changes its map.  Loads complete
//! elsewhere and only ever write to the record they were started for.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, log, warn, Level};

use crate::load_job::{LoadTask, RetrySettings};
use crate::record::{lock_slot, SongRecord, NEVER_ACCESSED};
use crate::*;

type CacheHashMap<V> = HashMap<SongId, V, ahash::RandomState>;

/// 1 GB.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 1_000_000_000;
pub const DEFAULT_MAX_UNKNOWN_ERROR_ATTEMPTS: u32 = 100;

/// How [SongCache::request_song_load] gets its loads done.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadRoute {
    /// The backend's own non-blocking load.  Failures are stored as reported, without retries.
    BackendCallback,
    /// A [JobPriority::Background] job on the scheduler, with the same retries as [SongCache::ensure_song_load].
    BackgroundJob,
}

impl Default for LoadRoute {
    fn default() -> Self {
        LoadRoute::BackendCallback
    }
}

/// What a blocking load does with codes the backend classifies as [LoadErrorKind::Unknown].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UnknownErrorPolicy {
    /// Log a warning and try again, up to [SongCacheConfig::max_unknown_error_attempts].
    Retry,
    /// Treat the code like an out of memory error.
    Fatal,
}

impl Default for UnknownErrorPolicy {
    fn default() -> Self {
        UnknownErrorPolicy::Retry
    }
}

#[derive(Clone, Debug, derive_builder::Builder)]
pub struct SongCacheConfig {
    /// Budget for the total size of the files behind loaded and loading songs, in bytes.
    #[builder(default = "DEFAULT_MAX_MEMORY_BYTES")]
    pub max_memory_bytes: u64,
    #[builder(default)]
    pub best_effort_route: LoadRoute,
    #[builder(default)]
    pub unknown_error_policy: UnknownErrorPolicy,
    /// How many unknown result codes a blocking load job tolerates before giving up.  `None` retries forever.
    ///
    /// Transient failures never count: a busy file is retried until it frees up or fails some other way.
    #[builder(default = "Some(DEFAULT_MAX_UNKNOWN_ERROR_ATTEMPTS)")]
    pub max_unknown_error_attempts: Option<u32>,
    /// Pause between blocking load attempts.
    #[builder(default = "Duration::from_millis(1)")]
    pub retry_backoff: Duration,
}

impl Default for SongCacheConfig {
    fn default() -> Self {
        SongCacheConfig {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            best_effort_route: LoadRoute::default(),
            unknown_error_policy: UnknownErrorPolicy::default(),
            max_unknown_error_attempts: Some(DEFAULT_MAX_UNKNOWN_ERROR_ATTEMPTS),
            retry_backoff: Duration::from_millis(1),
        }
    }
}

impl SongCacheConfig {
    fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            unknown_error_policy: self.unknown_error_policy,
            max_unknown_error_attempts: self.max_unknown_error_attempts,
            retry_backoff: self.retry_backoff,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SongCacheError {
    #[error("no song with id {0} is in the cache")]
    NotFound(SongId),
    #[error("{requested:?} hashes to id {id}, which already belongs to {existing:?}")]
    IdCollision {
        id: SongId,
        existing: String,
        requested: String,
    },
}

/// How badly the caller needs a load.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Urgency {
    BestEffort,
    Guaranteed,
}

fn console_level(code: ErrorCode) -> Level {
    if code == 0 {
        Level::Info
    } else {
        Level::Error
    }
}

pub struct SongCache<
    BackendImpl: AudioBackend,
    VfsImpl: Vfs,
    ClockImpl: Clock,
    SchedulerImpl: JobScheduler,
> {
    config: SongCacheConfig,
    records: CacheHashMap<SongRecord<BackendImpl::Handle>>,
    /// Sum of `file_size` over accounted records.
    tracked_bytes: u64,
    backend: Arc<BackendImpl>,
    vfs: VfsImpl,
    clock: Arc<ClockImpl>,
    scheduler: SchedulerImpl,
}

impl<BackendImpl: AudioBackend, VfsImpl: Vfs, ClockImpl: Clock, SchedulerImpl: JobScheduler>
    SongCache<BackendImpl, VfsImpl, ClockImpl, SchedulerImpl>
{
    pub fn new(
        backend: Arc<BackendImpl>,
        vfs: VfsImpl,
        clock: Arc<ClockImpl>,
        scheduler: SchedulerImpl,
        config: SongCacheConfig,
    ) -> SongCache<BackendImpl, VfsImpl, ClockImpl, SchedulerImpl> {
        info!(
            "Song cache created: budget={} MB, best-effort loads via {:?}",
            config.max_memory_bytes / 1_000_000,
            config.best_effort_route
        );
        SongCache {
            config,
            records: Default::default(),
            tracked_bytes: 0,
            backend,
            vfs,
            clock,
            scheduler,
        }
    }

    pub fn config(&self) -> &SongCacheConfig {
        &self.config
    }

    /// Change the budget.  Nothing is evicted until the next [SongCache::ensure_song_load].
    pub fn set_max_memory_bytes(&mut self, bytes: u64) {
        info!(
            "Song cache budget changed: {} MB -> {} MB",
            self.config.max_memory_bytes / 1_000_000,
            bytes / 1_000_000
        );
        self.config.max_memory_bytes = bytes;
    }

    /// Bytes currently counted against the budget.
    pub fn tracked_bytes(&self) -> u64 {
        self.tracked_bytes
    }

    /// Number of songs the cache knows about, loaded or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn status(&self, id: SongId) -> Option<SongStatus> {
        self.records.get(&id).map(|r| r.status())
    }

    /// Snapshots of every song, in no particular order.
    pub fn songs(&self) -> impl Iterator<Item = SongStatus> + '_ {
        self.records.values().map(|r| r.status())
    }

    fn over_budget(&self) -> bool {
        self.tracked_bytes >= self.config.max_memory_bytes && self.records.len() > 1
    }

    fn file_size_of(&self, path: &str) -> u64 {
        self.vfs.file_size(path).unwrap_or_else(|e| {
            warn!("Couldn't get the size of {}, counting it as 0 bytes: {}", path, e);
            0
        })
    }

    /// Find the record for a path, creating it if needed, and make sure its bytes are counted.
    fn find_or_create(&mut self, path: &str) -> Result<SongId, SongCacheError> {
        let id = calculate_song_id(path);
        if let Some(record) = self.records.get_mut(&id) {
            if record.path != path {
                warn!(
                    "Song id collision: {} and {} both hash to {}",
                    record.path, path, id
                );
                return Err(SongCacheError::IdCollision {
                    id,
                    existing: record.path.clone(),
                    requested: path.to_string(),
                });
            }

            // Evicted earlier; a reload is coming, so count it again.
            if !record.accounted {
                record.accounted = true;
                self.tracked_bytes += record.file_size;
            }
            return Ok(id);
        }

        let file_size = self.file_size_of(path);
        debug!("New song {} ({}, {} bytes)", path, id, file_size);
        self.records
            .insert(id, SongRecord::new(path.to_string(), id, file_size));
        self.tracked_bytes += file_size;
        Ok(id)
    }

    fn dispatch_load(&self, id: SongId, urgency: Urgency) {
        let record = match self.records.get(&id) {
            Some(r) => r,
            None => return,
        };
        {
            let mut slot = lock_slot(&record.slot);
            slot.in_flight = true;
            slot.error_code = 0;
        }

        let task = LoadTask::new(Arc::clone(&self.backend), Arc::clone(&self.clock), record);
        let settings = self.config.retry_settings();
        match (urgency, self.config.best_effort_route) {
            (Urgency::BestEffort, LoadRoute::BackendCallback) => {
                debug!("Loading {} through the backend", record.path);
                task.submit_async();
            }
            (Urgency::BestEffort, LoadRoute::BackgroundJob) => {
                debug!("Queueing a background load of {}", record.path);
                self.scheduler.dispatch(
                    JobPriority::Background,
                    Box::new(move || task.run_blocking(settings)),
                );
            }
            (Urgency::Guaranteed, _) => {
                debug!("Queueing a high priority load of {}", record.path);
                self.scheduler
                    .dispatch(JobPriority::High, Box::new(move || task.run_blocking(settings)));
            }
        }
    }

    /// Ask for a song to be loaded if there is room for it.
    ///
    /// Returns the song's id straight away.  If the song is loaded or already loading, nothing else happens.  If
    /// counting it puts the cache at or over budget (and it isn't the only song) the song is left as a placeholder;
    /// use [SongCache::ensure_song_load] to make room for it.
    pub fn request_song_load(&mut self, path: &str) -> Result<SongId, SongCacheError> {
        let id = self.find_or_create(path)?;
        if !self.records[&id].needs_load() {
            return Ok(id);
        }

        if self.over_budget() {
            debug!(
                "Deferring {}: {} tracked bytes against a budget of {}",
                path, self.tracked_bytes, self.config.max_memory_bytes
            );
            return Ok(id);
        }

        self.dispatch_load(id, Urgency::BestEffort);
        Ok(id)
    }

    /// Make sure a song is loaded or loading, evicting others to make room.
    pub fn ensure_song_load(&mut self, path: &str) -> Result<SongId, SongCacheError> {
        let id = self.find_or_create(path)?;
        if !self.records[&id].needs_load() {
            return Ok(id);
        }

        while self.over_budget() {
            match self.find_least_accessed_song() {
                Some(victim) => self.remove_from_cache(victim),
                None => {
                    warn!(
                        "Loading {} puts the cache at {} bytes against a budget of {}, but nothing can be evicted",
                        path, self.tracked_bytes, self.config.max_memory_bytes
                    );
                    break;
                }
            }
        }

        self.dispatch_load(id, Urgency::Guaranteed);
        Ok(id)
    }

    /// Get the decoded handle for a song, if it's loaded, and mark the song as just used.
    ///
    /// `None` means unknown, still loading, evicted, or failed; [SongCache::is_valid] tells the last apart.
    pub fn request_sound_handle(&self, id: SongId) -> Option<BackendImpl::Handle> {
        let record = self.records.get(&id)?;
        let mut slot = lock_slot(&record.slot);
        let handle = slot.handle.clone()?;
        slot.last_access_ms = self.clock.now_millis();
        Some(handle)
    }

    /// True if the song is known and its last load didn't fail.
    pub fn is_valid(&self, id: SongId) -> bool {
        self.records
            .get(&id)
            .map_or(false, |r| lock_slot(&r.slot).error_code == 0)
    }

    /// Log a song's load result code.  Returns the code, or `None` for unknown songs, which log nothing.
    ///
    /// Only failures are logged as errors; a zero code goes out at info.
    pub fn print_error_in_console(&self, id: SongId) -> Option<ErrorCode> {
        let record = self.records.get(&id)?;
        let code = lock_slot(&record.slot).error_code;
        log!(
            console_level(code),
            "AUDIO SYSTEM ERROR: Got error result code {} for {}",
            code,
            record.path
        );
        Some(code)
    }

    pub fn update_last_accessed_time(&self, id: SongId) -> Result<(), SongCacheError> {
        let record = self
            .records
            .get(&id)
            .ok_or(SongCacheError::NotFound(id))?;
        lock_slot(&record.slot).last_access_ms = self.clock.now_millis();
        Ok(())
    }

    /// Flip whether a song is playing.  Returns the new state, or `None` for unknown songs.
    pub fn toggle_playing_status(&mut self, id: SongId) -> Option<bool> {
        let record = self.records.get_mut(&id)?;
        record.is_playing = !record.is_playing;
        Some(record.is_playing)
    }

    /// Pick the loaded, non-playing song which was used longest ago.
    ///
    /// Songs which somehow loaded without a timestamp are only picked when no timestamped song qualifies.
    pub fn find_least_accessed_song(&self) -> Option<SongId> {
        let mut oldest: Option<(i64, SongId)> = None;
        let mut fallback = None;

        for record in self.records.values() {
            if record.is_playing {
                continue;
            }
            let slot = lock_slot(&record.slot);
            if slot.handle.is_none() {
                continue;
            }
            if slot.last_access_ms == NEVER_ACCESSED {
                fallback.get_or_insert(record.id);
                continue;
            }
            if oldest.map_or(true, |(t, _)| slot.last_access_ms < t) {
                oldest = Some((slot.last_access_ms, record.id));
            }
        }

        oldest.map(|(_, id)| id).or(fallback)
    }

    /// Release a loaded song's decoded data and stop counting it against the budget.
    ///
    /// The record stays, so requesting the path again reuses the id.  Unknown songs and songs which aren't loaded are
    /// left alone.
    pub fn remove_from_cache(&mut self, id: SongId) {
        let record = match self.records.get_mut(&id) {
            Some(r) => r,
            None => return,
        };
        let handle = match lock_slot(&record.slot).handle.take() {
            Some(h) => h,
            None => return,
        };

        if record.accounted {
            record.accounted = false;
            self.tracked_bytes = self.tracked_bytes.saturating_sub(record.file_size);
        }
        debug!(
            "Evicted {} ({} bytes), {} bytes still tracked",
            record.path, record.file_size, self.tracked_bytes
        );
        self.backend.release(handle);
    }

    /// Forget every song, releasing all decoded data.
    ///
    /// Loads still in flight release their results as soon as they finish.
    pub fn flush(&mut self) {
        let count = self.records.len();
        for (_, record) in self.records.drain() {
            let handle = {
                let mut slot = lock_slot(&record.slot);
                slot.detached = true;
                slot.handle.take()
            };
            if let Some(h) = handle {
                self.backend.release(h);
            }
        }
        self.tracked_bytes = 0;
        info!("Flushed {} songs from the cache", count);
    }
}

impl<BackendImpl: AudioBackend, VfsImpl: Vfs, ClockImpl: Clock, SchedulerImpl: JobScheduler> Drop
    for SongCache<BackendImpl, VfsImpl, ClockImpl, SchedulerImpl>
{
    fn drop(&mut self) {
        self.flush();
    }
}
