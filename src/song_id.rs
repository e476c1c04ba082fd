//! Songs are identified by a hash of their path.
//!
//! The hash is deterministic: the seeds are fixed, so the same path yields the same [SongId] for the whole run (and in
//! practice across runs, though nothing relies on that).  It is not collision free.  The cache detects two paths
//! landing on the same id and refuses the second one rather than silently aliasing them, see
//! [SongCacheError::IdCollision](crate::SongCacheError::IdCollision).
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

const ID_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Identifier of a song in the cache.
///
/// Never zero, so code talking to foreign interfaces may use zero as "no song".
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SongId(u64);

impl SongId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hash a path into its [SongId].
pub fn calculate_song_id(path: &str) -> SongId {
    let state = ahash::RandomState::with_seeds(ID_SEEDS[0], ID_SEEDS[1], ID_SEEDS[2], ID_SEEDS[3]);
    let mut hasher = state.build_hasher();
    path.hash(&mut hasher);
    SongId(hasher.finish().max(1))
}
