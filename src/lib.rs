//! A cache of decoded songs for audio players, with a memory budget and background loading.
//!
//! Decoding a song is slow and the result is large, so a player wants to decode ahead of time, keep what it decoded
//! around for as long as memory allows, and never throw away the song that's actually coming out of the speakers.
//! This crate provides that as [SongCache], which sits between a player and whatever library actually decodes audio:
//!
//! - The player asks for songs by path and gets back a [SongId] immediately.  The load happens elsewhere, either
//!   through the decoding library's own non-blocking API or as a job on a [JobScheduler] which retries while the file
//!   is busy.
//! - Later, the player polls [SongCache::request_sound_handle] for the decoded handle, and [SongCache::is_valid] to find
//!   out whether the load failed.
//! - The sizes of the files behind known songs are counted against a budget.  [SongCache::request_song_load] declines
//!   to load anything once the budget is spent; [SongCache::ensure_song_load] evicts the least recently used songs to
//!   make room.  Songs flagged with [SongCache::toggle_playing_status] are never evicted.
//!
//! To use this crate, implement [AudioBackend] over your decoder, pick or implement a [Vfs] (usually [FilesystemVfs]),
//! then construct a [SongCache] with a [MonotonicClock], a [ThreadPoolScheduler], and your chosen [SongCacheConfig].
//!
//! Diagnostics go through the `log` crate.
mod clock;
mod filesystem_vfs;
mod load_job;
mod record;
mod scheduler;
mod song_cache;
mod song_id;
mod traits;

#[cfg(test)]
mod test_support;

pub use clock::*;
pub use filesystem_vfs::*;
pub use record::{LoadState, SongStatus};
pub use scheduler::*;
pub use song_cache::*;
pub use song_id::*;
pub use traits::*;
