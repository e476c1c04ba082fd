//! Per-song bookkeeping.
//!
//! A [SongRecord] is owned by the cache's map and only ever touched by the thread driving the cache.  The fields a
//! finishing load writes live in a separate [LoadSlot] behind an `Arc<Mutex<_>>`, which the job or backend callback
//! captures when the load is dispatched.  The slot's address therefore stays valid however the map moves records
//! around, and completions never touch the map itself.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::*;

/// `last_access_ms` of a song which has never finished a load.
pub(crate) const NEVER_ACCESSED: i64 = -1;

pub(crate) struct LoadSlot<H> {
    pub(crate) handle: Option<H>,
    pub(crate) last_access_ms: i64,
    pub(crate) error_code: ErrorCode,
    /// A job or callback holds this slot and will complete it.
    pub(crate) in_flight: bool,
    /// The record has left the cache; whoever completes the load must release the handle themselves.
    pub(crate) detached: bool,
}

pub(crate) type SharedSlot<H> = Arc<Mutex<LoadSlot<H>>>;

/// Lock a slot.  Slots hold plain data, so a panic elsewhere never leaves one half-written.
pub(crate) fn lock_slot<H>(slot: &Mutex<LoadSlot<H>>) -> MutexGuard<'_, LoadSlot<H>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<H> LoadSlot<H> {
    fn new() -> LoadSlot<H> {
        LoadSlot {
            handle: None,
            last_access_ms: NEVER_ACCESSED,
            error_code: 0,
            in_flight: false,
            detached: false,
        }
    }

    /// Record the outcome of a load.
    ///
    /// Returns a handle the caller must release: either the new one, if the record was flushed in the meantime, or an
    /// old one this load replaced.
    pub(crate) fn complete(&mut self, result: Result<H, ErrorCode>, now_ms: i64) -> Option<H> {
        self.in_flight = false;
        self.last_access_ms = now_ms;
        match result {
            Ok(handle) => {
                self.error_code = 0;
                if self.detached {
                    Some(handle)
                } else {
                    self.handle.replace(handle)
                }
            }
            Err(code) => {
                self.error_code = code;
                None
            }
        }
    }
}

pub(crate) struct SongRecord<H> {
    pub(crate) path: String,
    pub(crate) id: SongId,
    pub(crate) file_size: u64,
    /// Whether `file_size` is currently counted in the cache's tracked bytes.
    pub(crate) accounted: bool,
    pub(crate) is_playing: bool,
    pub(crate) slot: SharedSlot<H>,
}

impl<H> SongRecord<H> {
    pub(crate) fn new(path: String, id: SongId, file_size: u64) -> SongRecord<H> {
        SongRecord {
            path,
            id,
            file_size,
            accounted: true,
            is_playing: false,
            slot: Arc::new(Mutex::new(LoadSlot::new())),
        }
    }

    /// Neither loaded nor loading.
    pub(crate) fn needs_load(&self) -> bool {
        let slot = lock_slot(&self.slot);
        slot.handle.is_none() && !slot.in_flight
    }

    pub(crate) fn status(&self) -> SongStatus {
        let slot = lock_slot(&self.slot);
        let state = if slot.handle.is_some() {
            LoadState::Loaded
        } else if slot.in_flight {
            LoadState::Pending
        } else if slot.error_code != 0 {
            LoadState::Failed(slot.error_code)
        } else if !self.accounted {
            LoadState::Evicted
        } else {
            LoadState::Placeholder
        };

        SongStatus {
            id: self.id,
            path: self.path.clone(),
            file_size: self.file_size,
            state,
            last_access_ms: Some(slot.last_access_ms).filter(|t| *t != NEVER_ACCESSED),
            is_playing: self.is_playing,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadState {
    /// Known to the cache, but no load has been started.  Deferred requests end up here.
    Placeholder,
    Pending,
    Loaded,
    /// Loaded once, then evicted to make room.  Requesting it again reloads it.
    Evicted,
    /// The last load failed with this code.
    Failed(ErrorCode),
}

/// A snapshot of what the cache knows about one song.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SongStatus {
    pub id: SongId,
    pub path: String,
    /// Size of the backing file, as counted against the memory budget.
    pub file_size: u64,
    pub state: LoadState,
    /// When a load last finished or the handle was last looked up.
    pub last_access_ms: Option<i64>,
    pub is_playing: bool,
}
