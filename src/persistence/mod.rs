//! On-disk persistence: atomic per-room JSON writes, the room index, the
//! quarantine set, and incremental backup rotation.
//!
//! Layout under the configured data directory:
//! - `rooms/<ROOMID>.json` — one file per room.
//! - `rooms_index.json` — materialized view of rooms on disk.
//! - `quarantine.json` — persisted quarantine set.
//! - `backups/<timestamp>/` — incremental snapshots.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::room::Room;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Materialized index entry: enough to drive random/ID selection without
/// loading the full room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub theme: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub filled_count: usize,
    pub completed: bool,
}

impl IndexEntry {
    #[must_use]
    pub fn from_room(room: &Room) -> Self {
        Self {
            theme: room.theme.clone(),
            created_at: room.created_at,
            updated_at: room.updated_at,
            filled_count: room.filled_count(),
            completed: room.is_completed(),
        }
    }
}

pub type RoomIndex = HashMap<String, IndexEntry>;

#[must_use]
pub fn rooms_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("rooms")
}

#[must_use]
pub fn room_path(data_dir: &Path, room_id: &str) -> PathBuf {
    rooms_dir(data_dir).join(format!("{room_id}.json"))
}

#[must_use]
pub fn index_path(data_dir: &Path) -> PathBuf {
    data_dir.join("rooms_index.json")
}

#[must_use]
pub fn quarantine_path(data_dir: &Path) -> PathBuf {
    data_dir.join("quarantine.json")
}

#[must_use]
pub fn backups_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("backups")
}

/// Monotonic per-process nonce so two writes landing in the same millisecond
/// never mint the same tmp name.
static ATOMIC_WRITE_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Writes `bytes` to `path` via a `<path>.tmp_<pid>_<ts>_<n>` sibling file
/// followed by a rename, so readers never observe a partial target file. The
/// tmp name is derived from the *target* path, not just its parent directory
/// — two different rooms saved within the same millisecond must not collide
/// on the same tmp file.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| PersistError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("room");
    let nonce = ATOMIC_WRITE_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let tmp_path = parent.join(format!(
        "{file_name}.tmp_{}_{}_{}",
        std::process::id(),
        crate::protocol::room::now_ms(),
        nonce
    ));

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|source| PersistError::Io {
            path: tmp_path.clone(),
            source,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(())
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value = serde_json::from_slice(&bytes).map_err(|source| PersistError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &bytes).await
}

/// Loads a room from disk, rebuilding its reservation inverse-map and
/// normalizing phase as the store's read path requires. Returns `None` if
/// the file does not exist.
pub async fn load_room(data_dir: &Path, room_id: &str) -> Result<Option<Room>, PersistError> {
    let path = room_path(data_dir, room_id);
    let Some(mut room): Option<Room> = read_json(&path).await? else {
        return Ok(None);
    };
    room.rebuild_reserved_by_frame();
    Ok(Some(room))
}

/// Persists a room atomically. Does not touch the index; callers update it
/// separately (the store does this right after a successful save).
pub async fn save_room(data_dir: &Path, room: &Room) -> Result<(), PersistError> {
    write_json(&room_path(data_dir, &room.room_id), room).await
}

/// Loads the index, or `None` if the file is absent or fails to parse —
/// callers should fall back to [`rebuild_index`] in that case.
pub async fn load_index(data_dir: &Path) -> Option<RoomIndex> {
    read_json(&index_path(data_dir)).await.ok().flatten()
}

pub async fn save_index(data_dir: &Path, index: &RoomIndex) -> Result<(), PersistError> {
    write_json(&index_path(data_dir), index).await
}

/// Scans `rooms/*.json` and rebuilds the index from scratch. Used on startup
/// when `rooms_index.json` is missing or unparseable, and whenever a caller
/// needs an authoritative index regardless of the cached one.
pub async fn rebuild_index(data_dir: &Path) -> Result<RoomIndex, PersistError> {
    let dir = rooms_dir(data_dir);
    let mut index = RoomIndex::new();

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| PersistError::Io {
                    path: dir.clone(),
                    source,
                })?;
            return Ok(index);
        }
        Err(source) => {
            return Err(PersistError::Io {
                path: dir.clone(),
                source,
            })
        }
    };

    while let Some(entry) = entries.next_entry().await.map_err(|source| PersistError::Io {
        path: dir.clone(),
        source,
    })? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(room): Option<Room> = read_json(&path).await.ok().flatten() else {
            continue;
        };
        index.insert(room.room_id.clone(), IndexEntry::from_room(&room));
    }

    save_index(data_dir, &index).await?;
    Ok(index)
}

/// Loads the index, rebuilding it from `rooms/` if missing or corrupt, per
/// the crash-safe startup contract.
pub async fn load_or_rebuild_index(data_dir: &Path) -> Result<RoomIndex, PersistError> {
    if let Some(index) = load_index(data_dir).await {
        return Ok(index);
    }
    rebuild_index(data_dir).await
}

/// Counts `rooms/*.json` directly, independent of whatever `rooms_index.json`
/// currently claims. Used by `/health` so a stale or corrupt index is visible
/// as a divergence between `roomsIndexed` and `roomsOnDisk` rather than hidden.
pub async fn count_rooms_on_disk(data_dir: &Path) -> Result<u64, PersistError> {
    let dir = rooms_dir(data_dir);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(PersistError::Io {
                path: dir.clone(),
                source,
            })
        }
    };

    let mut count = 0u64;
    while let Some(entry) = entries.next_entry().await.map_err(|source| PersistError::Io {
        path: dir.clone(),
        source,
    })? {
        if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
            count += 1;
        }
    }
    Ok(count)
}

pub async fn load_quarantine(data_dir: &Path) -> Result<HashSet<String>, PersistError> {
    let set: Option<Vec<String>> = read_json(&quarantine_path(data_dir)).await?;
    Ok(set.map(|v| v.into_iter().collect()).unwrap_or_default())
}

pub async fn save_quarantine(
    data_dir: &Path,
    quarantine: &HashSet<String>,
) -> Result<(), PersistError> {
    let mut sorted: Vec<&String> = quarantine.iter().collect();
    sorted.sort();
    write_json(&quarantine_path(data_dir), &sorted).await
}

#[derive(Debug, Serialize)]
struct BackupManifest {
    created_at: i64,
    room_ids: Vec<String>,
}

/// Runs one incremental backup cycle if due: enough time has elapsed since
/// the last backup and the dirty set is non-empty. Returns whether a backup
/// actually ran.
pub async fn run_backup_if_due(
    data_dir: &Path,
    dirty: &mut HashSet<String>,
    last_backup_at: &mut i64,
    now: i64,
    backup_interval_ms: u64,
    backup_keep: usize,
) -> Result<bool, PersistError> {
    let interval = i64::try_from(backup_interval_ms).unwrap_or(i64::MAX);
    if now - *last_backup_at < interval || dirty.is_empty() {
        return Ok(false);
    }

    let timestamp = chrono::DateTime::from_timestamp_millis(now)
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y%m%dT%H%M%S%3fZ")
        .to_string();
    let snapshot_dir = backups_dir(data_dir).join(&timestamp);

    let index = load_or_rebuild_index(data_dir).await?;
    save_index(&snapshot_dir, &index).await?;

    let room_ids: Vec<String> = dirty.iter().cloned().collect();
    for room_id in &room_ids {
        if let Some(room) = load_room(data_dir, room_id).await? {
            write_json(&room_path(&snapshot_dir, room_id), &room).await?;
        }
    }

    write_json(
        &snapshot_dir.join("manifest.json"),
        &BackupManifest {
            created_at: now,
            room_ids: room_ids.clone(),
        },
    )
    .await?;

    dirty.clear();
    *last_backup_at = now;

    prune_old_backups(data_dir, backup_keep).await?;
    Ok(true)
}

/// Keeps only the `keep` most recent backup directories by lexical order
/// (timestamps are formatted so lexical order matches chronological order).
async fn prune_old_backups(data_dir: &Path, keep: usize) -> Result<(), PersistError> {
    let dir = backups_dir(data_dir);
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(PersistError::Io {
                path: dir.clone(),
                source,
            })
        }
    };
    while let Some(entry) = entries.next_entry().await.map_err(|source| PersistError::Io {
        path: dir.clone(),
        source,
    })? {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    if names.len() <= keep {
        return Ok(());
    }
    let remove_count = names.len() - keep;
    for name in &names[..remove_count] {
        let path = dir.join(name);
        if let Err(source) = tokio::fs::remove_dir_all(&path).await {
            return Err(PersistError::Io { path, source });
        }
    }
    Ok(())
}
