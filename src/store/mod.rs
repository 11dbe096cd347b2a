//! In-memory room cache: bounded, read-through to disk, with idle and size
//! eviction. This is the store a handler asks for a room; it never talks to
//! the network, only to the persistence layer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::persistence::{self, PersistError};
use crate::protocol::room::{now_ms, Room};
use crate::reservation;

struct CacheEntry {
    room: Room,
    last_access: i64,
    /// Set when the in-memory room has been mutated since its last flush to
    /// disk. In the current handler design every mutation is persisted
    /// before the per-room critical section releases, so this is always
    /// `false` by the time eviction looks at it; it exists so a future
    /// handler that batches writes has somewhere to record the obligation,
    /// and so eviction has an invariant to assert rather than assume.
    dirty: bool,
}

/// Bounded `roomId -> Room` cache with read-through to disk and a per-room
/// lock used to serialize mutations (see the concurrency model: all
/// mutations of a single room, plus its persistence, must be serialized).
pub struct Store {
    data_dir: PathBuf,
    cache: AsyncMutex<HashMap<String, CacheEntry>>,
    room_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    room_cache_max: usize,
    room_cache_idle_ms: u64,
}

impl Store {
    #[must_use]
    pub fn new(data_dir: PathBuf, room_cache_max: usize, room_cache_idle_ms: u64) -> Self {
        Self {
            data_dir,
            cache: AsyncMutex::new(HashMap::new()),
            room_locks: AsyncMutex::new(HashMap::new()),
            room_cache_max,
            room_cache_idle_ms,
        }
    }

    /// Returns the per-room lock, creating one if this is the first time the
    /// room has been touched. Callers hold the returned lock across the
    /// read-modify-write critical section for that room.
    pub async fn room_lock(&self, room_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.room_locks.lock().await;
        locks
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Reads a room, preferring the cache and falling back to disk on miss.
    /// Reservation expiry is swept on every read, per the reservation
    /// engine's contract that `sweep` runs on deserialization and at the
    /// start of any handler that inspects reservations.
    pub async fn get(&self, room_id: &str) -> Result<Option<Room>, PersistError> {
        let now = now_ms();
        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get_mut(room_id) {
                entry.last_access = now;
                reservation::sweep(&mut entry.room, now);
                return Ok(Some(entry.room.clone()));
            }
        }

        let Some(mut room) = persistence::load_room(&self.data_dir, room_id).await? else {
            return Ok(None);
        };
        room.normalize_phase();
        reservation::sweep(&mut room, now);

        let mut cache = self.cache.lock().await;
        cache.insert(
            room_id.to_string(),
            CacheEntry {
                room: room.clone(),
                last_access: now,
                dirty: false,
            },
        );
        Ok(Some(room))
    }

    /// Persists `room` and refreshes its cache entry. Callers must hold the
    /// room's lock (from [`Self::room_lock`]) across the mutation that
    /// produced this state.
    pub async fn put(&self, room: Room) -> Result<(), PersistError> {
        persistence::save_room(&self.data_dir, &room).await?;
        let now = now_ms();
        let mut cache = self.cache.lock().await;
        cache.insert(
            room.room_id.clone(),
            CacheEntry {
                room,
                last_access: now,
                dirty: false,
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub async fn cached_room_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Runs one eviction pass: drop entries idle longer than
    /// `room_cache_idle_ms`, then, if still over `room_cache_max`, drop the
    /// oldest-accessed entries until within bound. All surviving or evicted
    /// entries are already durable on disk (every `put` persists before
    /// updating the cache), so eviction never has to flush first. Returns the
    /// number of entries evicted.
    pub async fn run_eviction(&self) -> usize {
        let now = now_ms();
        let idle_cutoff = now.saturating_sub(i64::try_from(self.room_cache_idle_ms).unwrap_or(i64::MAX));
        let mut cache = self.cache.lock().await;
        let before = cache.len();

        cache.retain(|_, entry| !entry.dirty && entry.last_access >= idle_cutoff || entry.dirty);

        if cache.len() > self.room_cache_max {
            let mut by_access: Vec<(String, i64)> = cache
                .iter()
                .map(|(id, entry)| (id.clone(), entry.last_access))
                .collect();
            by_access.sort_by_key(|(_, last_access)| *last_access);
            let overflow = cache.len() - self.room_cache_max;
            for (room_id, _) in by_access.into_iter().take(overflow) {
                if cache.get(&room_id).map(|e| !e.dirty).unwrap_or(false) {
                    cache.remove(&room_id);
                }
            }
        }

        before - cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_reads_through_to_disk_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf(), 80, 300_000);
        let room = Room::new("ABC1234".to_string(), "theme".to_string(), now_ms());
        persistence::save_room(dir.path(), &room).await.unwrap();

        let loaded = store.get("ABC1234").await.unwrap().unwrap();
        assert_eq!(loaded.room_id, "ABC1234");
        assert_eq!(store.cached_room_count().await, 1);
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_room() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf(), 80, 300_000);
        assert!(store.get("NOPE000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_persists_and_populates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf(), 80, 300_000);
        let room = Room::new("XYZ9999".to_string(), "theme".to_string(), now_ms());
        store.put(room).await.unwrap();

        assert!(persistence::room_path(dir.path(), "XYZ9999").exists());
        let cached = store.get("XYZ9999").await.unwrap().unwrap();
        assert_eq!(cached.room_id, "XYZ9999");
    }

    #[tokio::test]
    async fn size_eviction_drops_oldest_entries_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf(), 1, 300_000);
        let room_a = Room::new("AAAA111".to_string(), "a".to_string(), now_ms());
        store.put(room_a).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        let room_b = Room::new("BBBB222".to_string(), "b".to_string(), now_ms());
        store.put(room_b).await.unwrap();

        store.run_eviction().await;
        assert_eq!(store.cached_room_count().await, 1);
    }

    #[tokio::test]
    async fn room_lock_returns_same_instance_for_same_room() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf(), 80, 300_000);
        let lock_a = store.room_lock("ABC1234").await;
        let lock_b = store.room_lock("ABC1234").await;
        assert!(Arc::ptr_eq(&lock_a, &lock_b));
    }
}
