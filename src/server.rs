//! The coordination server: shared state plus the eight message-handler
//! operations. Every handler follows the same skeleton described by the
//! concurrency model: resolve the room (locking it for the duration), sweep
//! expired reservations, act, persist if mutated, then broadcast after the
//! per-room lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::persistence::{self, IndexEntry, PersistError, RoomIndex};
use crate::protocol::{
    self, mint_room_id, normalize_room_id, resolve_theme, validate_data_url, Envelope,
    HandlerError, Phase, Room, ServerMessage,
};
use crate::rate_limit::RateLimiter;
use crate::reservation::{self, ReservationFault};
use crate::store::Store;

/// One registered websocket connection: an outbound channel and, once
/// joined, the room it's attached to.
struct Connection {
    sender: mpsc::UnboundedSender<Arc<Envelope>>,
    room_id: Option<String>,
}

/// Tracks which connections are attached to which room, for broadcast
/// scoping. Adapted from the teacher's in-memory coordinator, keyed by room
/// rather than by player since Frameyard has no persistent player identity.
#[derive(Default)]
struct Broadcaster {
    connections: HashMap<u64, Connection>,
    rooms: HashMap<String, HashSet<u64>>,
}

impl Broadcaster {
    fn register(&mut self, conn_id: u64, sender: mpsc::UnboundedSender<Arc<Envelope>>) {
        self.connections.insert(
            conn_id,
            Connection {
                sender,
                room_id: None,
            },
        );
    }

    fn unregister(&mut self, conn_id: u64) {
        if let Some(conn) = self.connections.remove(&conn_id) {
            if let Some(room_id) = conn.room_id {
                if let Some(members) = self.rooms.get_mut(&room_id) {
                    members.remove(&conn_id);
                    if members.is_empty() {
                        self.rooms.remove(&room_id);
                    }
                }
            }
        }
    }

    fn attach(&mut self, conn_id: u64, room_id: &str) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            if let Some(prev) = conn.room_id.take() {
                if let Some(members) = self.rooms.get_mut(&prev) {
                    members.remove(&conn_id);
                }
            }
            conn.room_id = Some(room_id.to_string());
        }
        self.rooms.entry(room_id.to_string()).or_default().insert(conn_id);
    }

    fn broadcast_to_room(&self, room_id: &str, envelope: Arc<Envelope>) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        for conn_id in members {
            if let Some(conn) = self.connections.get(conn_id) {
                let _ = conn.sender.send(envelope.clone());
            }
        }
    }
}

/// The last internal error observed by the process, surfaced through
/// `/health` (§4.H). Updated wherever an `InternalError` is logged and
/// counted (§7).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub ts: i64,
    pub code: String,
    pub message: String,
}

/// All process-wide shared state. One instance, wrapped in `Arc`, held by
/// every connection task and every background task.
pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub metrics: Metrics,
    pub rate_limiter: RateLimiter,
    index: RwLock<RoomIndex>,
    quarantine: RwLock<HashSet<String>>,
    dirty: tokio::sync::Mutex<HashSet<String>>,
    last_backup_at: tokio::sync::Mutex<i64>,
    broadcaster: RwLock<Broadcaster>,
    next_conn_id: std::sync::atomic::AtomicU64,
    started_at: i64,
    last_error: RwLock<Option<LastError>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, PersistError> {
        let data_dir = std::path::PathBuf::from(&config.persistence.data_dir);
        let index = persistence::load_or_rebuild_index(&data_dir).await?;
        let quarantine = persistence::load_quarantine(&data_dir).await?;

        let store = Arc::new(Store::new(
            data_dir,
            config.store.room_cache_max,
            config.store.room_cache_idle_ms,
        ));
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());

        Ok(Arc::new(Self {
            store,
            metrics: Metrics::new(),
            rate_limiter,
            index: RwLock::new(index),
            quarantine: RwLock::new(quarantine),
            dirty: tokio::sync::Mutex::new(HashSet::new()),
            last_backup_at: tokio::sync::Mutex::new(protocol::now_ms()),
            broadcaster: RwLock::new(Broadcaster::default()),
            next_conn_id: std::sync::atomic::AtomicU64::new(1),
            started_at: protocol::now_ms(),
            last_error: RwLock::new(None),
            config,
        }))
    }

    /// Records an internal error for `/health` to surface. Called from every
    /// site that counts an `InternalError` (§7): persistence failures and
    /// backup-cycle failures.
    pub(crate) async fn record_internal_error(&self, code: &str, message: impl Into<String>) {
        *self.last_error.write().await = Some(LastError {
            ts: protocol::now_ms(),
            code: code.to_string(),
            message: message.into(),
        });
    }

    pub async fn last_error(&self) -> Option<LastError> {
        self.last_error.read().await.clone()
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register_connection(&self, conn_id: u64, sender: mpsc::UnboundedSender<Arc<Envelope>>) {
        self.broadcaster.write().await.register(conn_id, sender);
        self.metrics.connection_opened();
    }

    pub async fn unregister_connection(&self, conn_id: u64) {
        self.broadcaster.write().await.unregister(conn_id);
        self.metrics.connection_closed();
    }

    async fn broadcast(&self, room_id: &str, message: ServerMessage) {
        let envelope = Arc::new(Envelope::new(message));
        self.broadcaster.read().await.broadcast_to_room(room_id, envelope);
    }

    async fn attach(&self, conn_id: u64, room_id: &str) {
        self.broadcaster.write().await.attach(conn_id, room_id);
    }

    async fn mark_dirty(&self, room_id: &str) {
        self.dirty.lock().await.insert(room_id.to_string());
    }

    async fn update_index(&self, room: &Room) {
        self.index
            .write()
            .await
            .insert(room.room_id.clone(), IndexEntry::from_room(room));
        let snapshot = self.index.read().await.clone();
        let _ = persistence::save_index(self.store.data_dir(), &snapshot).await;
    }

    pub async fn is_quarantined(&self, room_id: &str) -> bool {
        self.quarantine.read().await.contains(room_id)
    }

    pub async fn set_quarantine(&self, room_id: &str, on: bool) -> Result<bool, PersistError> {
        let mut set = self.quarantine.write().await;
        let changed = if on { set.insert(room_id.to_string()) } else { set.remove(room_id) };
        persistence::save_quarantine(self.store.data_dir(), &set).await?;
        Ok(changed)
    }

    pub async fn index_len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn quarantine_len(&self) -> usize {
        self.quarantine.read().await.len()
    }

    pub async fn dirty_len(&self) -> usize {
        self.dirty.lock().await.len()
    }

    #[must_use]
    pub const fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Runs one backup tick if due. Intended to be called from a periodic
    /// background task.
    pub async fn maybe_run_backup(&self) {
        let now = protocol::now_ms();
        let mut dirty = self.dirty.lock().await;
        let mut last_backup_at = self.last_backup_at.lock().await;
        match persistence::run_backup_if_due(
            self.store.data_dir(),
            &mut dirty,
            &mut last_backup_at,
            now,
            self.config.persistence.backup_interval_ms,
            self.config.persistence.backup_keep,
        )
        .await
        {
            Ok(true) => {
                self.metrics.backups_run.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::error!(event = "backup_failed", error = %err, "incremental backup cycle failed");
                self.metrics.persistence_errors.fetch_add(1, Ordering::Relaxed);
                self.record_internal_error("BACKUP_FAILED", err.to_string()).await;
            }
        }
    }

    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(state.config.store.eviction_interval_secs));
            loop {
                interval.tick().await;
                let evicted = state.store.run_eviction().await;
                if evicted > 0 {
                    state
                        .metrics
                        .evictions
                        .fetch_add(evicted as u64, Ordering::Relaxed);
                }
            }
        });

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                state.config.persistence.backup_tick_secs,
            ));
            loop {
                interval.tick().await;
                state.maybe_run_backup().await;
            }
        });

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                state.rate_limiter.cleanup(protocol::now_ms(), 60_000);
            }
        });
    }

    // -- handlers -----------------------------------------------------

    #[must_use]
    pub fn hello(&self) -> ServerMessage {
        ServerMessage::Welcome {
            protocol: 1,
            server_time: protocol::now_ms(),
        }
    }

    pub async fn create_public_and_submit(
        &self,
        conn_id: u64,
        theme: Option<&str>,
        data_url: &str,
    ) -> Result<ServerMessage, HandlerError> {
        if !validate_data_url(data_url, self.config.protocol.max_data_url_bytes) {
            return Err(HandlerError::Validation("dataUrl が不正/大きすぎる".to_string()));
        }

        let now = protocol::now_ms();

        // Room-id space is large relative to expected concurrency, but a
        // collision is still possible; detect it against the index under a
        // bounded retry loop rather than trusting a single draw.
        let mut room_id = mint_room_id();
        let mut attempts = 0u8;
        while self.index.read().await.contains_key(&room_id) {
            attempts += 1;
            self.metrics.room_id_collisions.fetch_add(1, Ordering::Relaxed);
            if attempts >= 16 {
                return Err(HandlerError::Internal(anyhow::anyhow!(
                    "failed to mint a unique roomId after {attempts} attempts"
                )));
            }
            room_id = mint_room_id();
        }
        let theme = resolve_theme(theme, &self.config.protocol.fallback_themes);
        let mut room = Room::new(room_id.clone(), theme, now);

        room.frames[0] = Some(data_url.to_string());
        room.committed[0] = true;
        room.updated_at = now;
        room.normalize_phase();

        if let Err(e) = self.store.put(room.clone()).await {
            tracing::error!(event = "room_save_failed", room_id = %room_id, error = %e, "failed to persist new room");
            self.metrics.persistence_errors.fetch_add(1, Ordering::Relaxed);
            self.record_internal_error("ROOM_SAVE_FAILED", e.to_string()).await;
            return Err(HandlerError::Internal(e.into()));
        }
        self.update_index(&room).await;
        self.mark_dirty(&room_id).await;
        self.metrics.rooms_created.fetch_add(1, Ordering::Relaxed);
        self.metrics.frames_committed.fetch_add(1, Ordering::Relaxed);

        self.attach(conn_id, &room_id).await;
        self.broadcast(&room_id, ServerMessage::FrameCommitted { room_id: room_id.clone(), frame_index: 0 })
            .await;

        Ok(ServerMessage::created_public(&room))
    }

    /// Selects uniformly at random from the index entries that are neither
    /// completed nor quarantined. `None` means the pool is empty.
    async fn pick_random_joinable(&self) -> Option<String> {
        let index = self.index.read().await;
        let quarantine = self.quarantine.read().await;
        let candidates: Vec<&String> = index
            .iter()
            .filter(|(id, entry)| !entry.completed && !quarantine.contains(id.as_str()))
            .map(|(id, _)| id)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        use rand::RngExt;
        let mut rng = rand::rng();
        let pick = rng.random_range(0..candidates.len());
        // SAFETY: pick is produced by random_range(0..len), always in bounds.
        #[allow(clippy::indexing_slicing)]
        Some(candidates[pick].clone())
    }

    pub async fn join_random(&self, conn_id: u64) -> Result<ServerMessage, HandlerError> {
        let Some(room_id) = self.pick_random_joinable().await else {
            return Err(HandlerError::NotFound);
        };
        self.join_for_editing(conn_id, &room_id).await
    }

    pub async fn join_by_id(&self, conn_id: u64, room_id: &str) -> Result<ServerMessage, HandlerError> {
        let Some(room_id) = normalize_room_id(room_id) else {
            return Err(HandlerError::Validation("invalid roomId".to_string()));
        };
        self.join_for_editing(conn_id, &room_id).await
    }

    /// Shared body for `join_random`/`join_by_id`: resolve a room, verify it
    /// is editable (not quarantined, not absent, not completed), mint a
    /// reservation for its first free frame, and attach the connection.
    /// Quarantined, absent, and completed rooms all report the same "room
    /// not found" message so none of the three is distinguishable to a caller.
    async fn join_for_editing(&self, conn_id: u64, room_id: &str) -> Result<ServerMessage, HandlerError> {
        if self.is_quarantined(room_id).await {
            return Err(HandlerError::NotFound);
        }

        let lock = self.store.room_lock(room_id).await;
        let _guard = lock.lock().await;

        let room = self.store.get(room_id).await.map_err(|e| HandlerError::Internal(e.into()))?;
        let Some(mut room) = room else {
            // Stale index entry: the file backing it is gone. Drop the entry
            // so future random/ID joins stop offering it, and ask the caller
            // to retry rather than silently substituting another room.
            self.index.write().await.remove(room_id);
            let snapshot = self.index.read().await.clone();
            let _ = persistence::save_index(self.store.data_dir(), &snapshot).await;
            return Err(HandlerError::Validation(
                "room listing was stale, please retry".to_string(),
            ));
        };

        room.normalize_phase();
        let now = protocol::now_ms();
        reservation::sweep(&mut room, now);

        if room.phase != Phase::Drawing {
            return Err(HandlerError::NotFound);
        }

        match reservation::reserve_any(&mut room, now, self.config.store.reservation_ms) {
            Ok((token, frame_index, expires_at)) => {
                room.updated_at = now;
                self.store.put(room.clone()).await.map_err(|e| HandlerError::Internal(e.into()))?;
                self.update_index(&room).await;
                self.mark_dirty(room_id).await;
                self.attach(conn_id, room_id).await;
                Ok(ServerMessage::RoomJoined {
                    room_id: room.room_id.clone(),
                    theme: room.theme.clone(),
                    assigned_frame: frame_index,
                    reservation_token: token,
                    reservation_expires_at: expires_at,
                    filled: room.filled().to_vec(),
                })
            }
            Err(ReservationFault::NoEmptyFrame) => Err(HandlerError::Validation("no empty frame".to_string())),
            Err(_) => Err(HandlerError::Internal(anyhow::anyhow!("unexpected reservation fault"))),
        }
    }

    /// `join_room`: attaches a connection for streaming without minting a new
    /// reservation. `view` bypasses the phase/token check entirely (used to
    /// review completed rooms); otherwise the caller must already hold a live
    /// reservation on the room.
    pub async fn join_room(
        &self,
        conn_id: u64,
        room_id: &str,
        view: bool,
        reservation_token: Option<&str>,
    ) -> Result<ServerMessage, HandlerError> {
        let Some(room_id) = normalize_room_id(room_id) else {
            return Err(HandlerError::Validation("invalid roomId".to_string()));
        };
        if self.is_quarantined(&room_id).await {
            return Err(HandlerError::NotFound);
        }

        let Some(mut room) = self
            .store
            .get(&room_id)
            .await
            .map_err(|e| HandlerError::Internal(e.into()))?
        else {
            return Err(HandlerError::NotFound);
        };

        if view {
            self.attach(conn_id, &room_id).await;
            return Ok(ServerMessage::room_state(&room));
        }

        let now = protocol::now_ms();
        reservation::sweep(&mut room, now);
        let holds_live_reservation = reservation_token.is_some_and(|token| {
            room.reservations
                .iter()
                .any(|(tok, r)| tok == token && r.expires_at > now && !room.committed[r.frame_index])
        });

        if room.phase != Phase::Drawing || !holds_live_reservation {
            return Err(HandlerError::Reservation(
                "room is not accepting joins without a live reservation".to_string(),
            ));
        }

        self.attach(conn_id, &room_id).await;
        Ok(ServerMessage::room_state(&room))
    }

    /// Not-yet-committed frames are silently dropped: clients poll for a
    /// frame only after observing its `frame_committed` broadcast, so a miss
    /// here means the client asked too early rather than that something
    /// failed.
    pub async fn get_frame(&self, room_id: &str, frame_index: i64) -> Result<Option<ServerMessage>, HandlerError> {
        let Some(room_id) = normalize_room_id(room_id) else {
            return Err(HandlerError::Validation("invalid roomId".to_string()));
        };
        if self.is_quarantined(&room_id).await {
            return Err(HandlerError::NotFound);
        }
        let Ok(idx) = usize::try_from(frame_index) else {
            return Err(HandlerError::Validation("frameIndex out of range".to_string()));
        };
        if idx >= protocol::FRAME_COUNT {
            return Err(HandlerError::Validation("frameIndex out of range".to_string()));
        }

        let Some(room) = self
            .store
            .get(&room_id)
            .await
            .map_err(|e| HandlerError::Internal(e.into()))?
        else {
            return Err(HandlerError::NotFound);
        };

        let Some(data_url) = room.frames.get(idx).cloned().flatten() else {
            return Ok(None);
        };

        Ok(Some(ServerMessage::FrameData {
            room_id,
            frame_index: idx,
            data_url,
        }))
    }

    pub async fn resync(&self, conn_id: u64, room_id: Option<&str>) -> Result<ServerMessage, HandlerError> {
        let Some(room_id) = room_id.and_then(normalize_room_id) else {
            return Err(HandlerError::Validation("resync requires a known roomId".to_string()));
        };
        if self.is_quarantined(&room_id).await {
            return Err(HandlerError::NotFound);
        }
        let Some(room) = self
            .store
            .get(&room_id)
            .await
            .map_err(|e| HandlerError::Internal(e.into()))?
        else {
            return Err(HandlerError::NotFound);
        };
        self.attach(conn_id, &room_id).await;
        Ok(ServerMessage::room_state(&room))
    }

    pub async fn submit_frame(
        &self,
        room_id: &str,
        frame_index: i64,
        reservation_token: &str,
        data_url: &str,
    ) -> Result<(), HandlerError> {
        let Some(room_id) = normalize_room_id(room_id) else {
            return Err(HandlerError::Validation("invalid roomId".to_string()));
        };
        if self.is_quarantined(&room_id).await {
            return Err(HandlerError::NotFound);
        }
        let Ok(frame_index) = usize::try_from(frame_index) else {
            return Err(HandlerError::Validation("frameIndex out of range".to_string()));
        };
        if frame_index >= protocol::FRAME_COUNT {
            return Err(HandlerError::Validation("frameIndex out of range".to_string()));
        }
        if !validate_data_url(data_url, self.config.protocol.max_data_url_bytes) {
            return Err(HandlerError::Validation("invalid dataUrl".to_string()));
        }

        let lock = self.store.room_lock(&room_id).await;
        let _guard = lock.lock().await;

        let Some(mut room) = self
            .store
            .get(&room_id)
            .await
            .map_err(|e| HandlerError::Internal(e.into()))?
        else {
            return Err(HandlerError::NotFound);
        };

        room.normalize_phase();
        if room.phase == Phase::Playback {
            return Err(HandlerError::Phase);
        }
        if reservation_token.is_empty() {
            return Err(HandlerError::Reservation(
                "予約(reservation) token is required".to_string(),
            ));
        }

        let now = protocol::now_ms();
        reservation::sweep(&mut room, now);

        // Reservation validity (steps 6-7: missing/expired token, frame
        // mismatch) is checked before "already submitted" (step 8), so a
        // stale-token resubmit against a completed frame reports a
        // reservation error rather than masquerading as a conflict.
        reservation::validate(&room, reservation_token, frame_index, now).map_err(|fault| match fault {
            ReservationFault::NotFound => {
                HandlerError::Reservation("no such 予約(reservation)".to_string())
            }
            ReservationFault::Expired => {
                HandlerError::Reservation("予約(reservation)の有効期限が切れています".to_string())
            }
            ReservationFault::FrameMismatch => {
                HandlerError::Reservation("予約(reservation) is for a different frame".to_string())
            }
            ReservationFault::NoEmptyFrame => {
                HandlerError::Internal(anyhow::anyhow!("unexpected reservation fault"))
            }
        })?;

        if room.committed[frame_index] {
            return Err(HandlerError::Conflict);
        }

        reservation::remove(&mut room, reservation_token, frame_index);

        room.frames[frame_index] = Some(data_url.to_string());
        room.committed[frame_index] = true;
        room.updated_at = now;
        room.normalize_phase();
        let just_completed = room.phase == Phase::Playback;

        if let Err(e) = self.store.put(room.clone()).await {
            tracing::error!(event = "room_save_failed", room_id = %room_id, error = %e, "failed to persist submitted frame");
            self.metrics.persistence_errors.fetch_add(1, Ordering::Relaxed);
            self.record_internal_error("ROOM_SAVE_FAILED", e.to_string()).await;
            return Err(HandlerError::Internal(e.into()));
        }
        self.update_index(&room).await;
        self.mark_dirty(&room_id).await;
        self.metrics.frames_committed.fetch_add(1, Ordering::Relaxed);

        self.broadcast(
            &room_id,
            ServerMessage::FrameCommitted {
                room_id: room_id.clone(),
                frame_index,
            },
        )
        .await;

        if just_completed {
            self.metrics.rooms_completed.fetch_add(1, Ordering::Relaxed);
            self.broadcast(&room_id, ServerMessage::StartPlayback { room_id: room_id.clone() })
                .await;
            self.broadcast(&room_id, ServerMessage::room_state(&room)).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.persistence.data_dir = dir.path().to_string_lossy().to_string();
        let state = AppState::new(config).await.unwrap();
        (state, dir)
    }

    #[tokio::test]
    async fn create_public_and_submit_fills_frame_zero() {
        let (state, _dir) = test_state().await;
        let msg = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        match msg {
            ServerMessage::CreatedPublic(payload) => {
                assert_eq!(payload.filled[0], true);
                assert_eq!(payload.theme, "theme");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_by_id_grants_a_reservation_for_an_incomplete_room() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        let joined = state.join_by_id(1, &room_id).await.unwrap();
        match joined {
            ServerMessage::RoomJoined { assigned_frame, .. } => assert_eq!(assigned_frame, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_room_without_a_live_reservation_is_rejected() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        let result = state.join_room(1, &room_id, false, None).await;
        assert!(matches!(result, Err(HandlerError::Reservation(_))));
    }

    #[tokio::test]
    async fn join_room_view_bypasses_phase_and_reservation_checks() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        let viewed = state.join_room(1, &room_id, true, None).await.unwrap();
        assert!(matches!(viewed, ServerMessage::RoomState(_)));
    }

    #[tokio::test]
    async fn join_room_with_a_live_reservation_succeeds() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };
        let joined = state.join_by_id(1, &room_id).await.unwrap();
        let ServerMessage::RoomJoined { reservation_token, .. } = joined else {
            unreachable!()
        };

        let resumed = state.join_room(1, &room_id, false, Some(&reservation_token)).await.unwrap();
        assert!(matches!(resumed, ServerMessage::RoomState(_)));
    }

    #[tokio::test]
    async fn submit_frame_rejects_unknown_reservation_token() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        let result = state.submit_frame(&room_id, 1, "bogus-token", "data:image/png;base64,BBBB").await;
        assert!(matches!(result, Err(HandlerError::Reservation(_))));
    }

    /// A reservation token for frame 1 replayed against frame 0 (already
    /// committed at room creation) must surface a reservation error, not
    /// "already submitted" -- the reservation's own validity is checked
    /// before the frame's commit state.
    #[tokio::test]
    async fn submit_frame_reports_frame_mismatch_ahead_of_already_submitted() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        let joined = state.join_by_id(1, &room_id).await.unwrap();
        let ServerMessage::RoomJoined {
            reservation_token,
            assigned_frame,
            ..
        } = joined
        else {
            unreachable!()
        };
        assert_eq!(assigned_frame, 1);

        let result = state
            .submit_frame(&room_id, 0, &reservation_token, "data:image/png;base64,CCCC")
            .await;
        assert!(matches!(result, Err(HandlerError::Reservation(_))));
    }

    #[tokio::test]
    async fn quarantined_room_is_not_found() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        state.set_quarantine(&room_id, true).await.unwrap();
        let result = state.join_by_id(1, &room_id).await;
        assert!(matches!(result, Err(HandlerError::NotFound)));
    }

    #[tokio::test]
    async fn completed_room_is_not_found_for_join_by_id_but_viewable() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        for frame_index in 1..60 {
            let joined = state.join_by_id(1, &room_id).await.unwrap();
            let ServerMessage::RoomJoined { reservation_token, assigned_frame, .. } = joined else {
                unreachable!()
            };
            assert_eq!(assigned_frame, frame_index);
            state
                .submit_frame(&room_id, frame_index as i64, &reservation_token, "data:image/png;base64,ZZZZ")
                .await
                .unwrap();
        }

        let result = state.join_by_id(1, &room_id).await;
        assert!(matches!(result, Err(HandlerError::NotFound)));

        let viewed = state.join_room(1, &room_id, true, None).await.unwrap();
        match viewed {
            ServerMessage::RoomState(payload) => assert!(payload.completed),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_frame_silently_drops_for_uncommitted_frame() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let room_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        let result = state.get_frame(&room_id, 1).await.unwrap();
        assert!(result.is_none());

        let result = state.get_frame(&room_id, 0).await.unwrap();
        assert!(matches!(result, Some(ServerMessage::FrameData { frame_index: 0, .. })));
    }

    #[tokio::test]
    async fn create_public_and_submit_retries_on_room_id_collision() {
        let (state, _dir) = test_state().await;
        let created = state
            .create_public_and_submit(1, Some("theme"), "data:image/png;base64,AAAA")
            .await
            .unwrap();
        let first_id = match created {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };

        let second = state
            .create_public_and_submit(2, Some("theme"), "data:image/png;base64,BBBB")
            .await
            .unwrap();
        let second_id = match second {
            ServerMessage::CreatedPublic(p) => p.room_id,
            _ => unreachable!(),
        };
        assert_ne!(first_id, second_id);
    }
}
