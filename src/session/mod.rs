//! Session lifecycle: creation, lookup, idle sweeping, and the bounded per-session
//! response queue the SSE writer drains.
//!
//! An `Arc<RwLock<HashMap<..>>>` registry with a background sweeper spawned alongside
//! the router. Live delivery uses a bounded `tokio::sync::mpsc` channel rather than a
//! broadcast channel, since each session has exactly one writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// Coding-agent client kind announced at `init_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    ClaudeCode,
    Opencode,
    Cursor,
    Other,
}

impl AgentKind {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "claude-code" => Self::ClaudeCode,
            "opencode" => Self::Opencode,
            "cursor" => Self::Cursor,
            _ => Self::Other,
        }
    }
}

/// A single connected client. Owns the sender half of its response queue; the SSE
/// writer task owns the receiver half and is the only task permitted to remove this
/// session from the registry when it exits.
///
/// `sender` is `None` for sessions that were never bound to an SSE stream (e.g. one
/// created by the `init_session` tool outside of a `GET /mcp/v1/sse` connection) —
/// those run in pure request/response mode, and the message endpoint inlines their
/// responses instead of trying to enqueue them.
pub struct Session {
    pub id: String,
    pub project_slug: Option<String>,
    pub agent_kind: AgentKind,
    pub client_version: Option<String>,
    pub created_at: Instant,
    last_activity: std::sync::atomic::AtomicU64,
    started_at_epoch_ms: u64,
    sender: Option<mpsc::Sender<String>>,
}

impl Session {
    fn elapsed_idle(&self) -> Duration {
        let now_ms = self.started_at_epoch_ms + self.created_at.elapsed().as_millis() as u64;
        let last_ms = self.last_activity.load(std::sync::atomic::Ordering::Relaxed);
        Duration::from_millis(now_ms.saturating_sub(last_ms))
    }

    fn touch(&self) {
        let now_ms = self.started_at_epoch_ms + self.created_at.elapsed().as_millis() as u64;
        self.last_activity.store(now_ms, std::sync::atomic::Ordering::Relaxed);
    }

    /// Whether this session has a bound SSE stream draining its response queue.
    #[must_use]
    pub fn has_stream(&self) -> bool {
        self.sender.is_some()
    }

    /// Enqueue a serialized JSON-RPC response for delivery on this session's SSE
    /// stream. Blocks for at most `timeout`; returns `Err` if the queue is full
    /// (`EnqueueError::Busy`) or the receiver has gone away (`EnqueueError::Closed`).
    /// Callers should check [`Session::has_stream`] first — this is only meaningful
    /// for sessions that were bound to a stream at creation.
    pub async fn enqueue(&self, payload: String, timeout: Duration) -> Result<(), EnqueueError> {
        let Some(sender) = &self.sender else {
            return Err(EnqueueError::Closed);
        };
        match tokio::time::timeout(timeout, sender.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EnqueueError::Closed),
            Err(_) => Err(EnqueueError::Busy),
        }
    }
}

/// Why a response could not be delivered to a session's SSE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The bounded queue is full; the client isn't draining fast enough.
    Busy,
    /// The session's SSE writer has already exited.
    Closed,
}

/// Registry of live sessions, protected by a reader/writer lock. Reads (lookups,
/// sweeper scans) never block each other; mutations (create, remove) take the write
/// half only for the instant they need it.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    idle_ttl: Duration,
    queue_capacity: usize,
}

impl SessionManager {
    #[must_use]
    pub fn new(idle_ttl: Duration, queue_capacity: usize) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), idle_ttl, queue_capacity }
    }

    /// Create a new session and its response queue, returning the session plus the
    /// receiver half the SSE writer should drain.
    pub async fn create(
        &self,
        project_slug: Option<String>,
        agent_kind: AgentKind,
        client_version: Option<String>,
    ) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let session = self.insert(project_slug, agent_kind, client_version, Some(tx)).await;
        (session, rx)
    }

    /// Create a new session with no bound SSE stream — used by tools (e.g.
    /// `init_session`) that mint a session outside of a `GET /mcp/v1/sse` connection.
    /// The message endpoint inlines responses for these rather than enqueuing, since
    /// there is no writer to drain a queue.
    pub async fn create_detached(
        &self,
        project_slug: Option<String>,
        agent_kind: AgentKind,
        client_version: Option<String>,
    ) -> Arc<Session> {
        self.insert(project_slug, agent_kind, client_version, None).await
    }

    async fn insert(
        &self,
        project_slug: Option<String>,
        agent_kind: AgentKind,
        client_version: Option<String>,
        sender: Option<mpsc::Sender<String>>,
    ) -> Arc<Session> {
        let id = generate_session_id();
        let now_ms = epoch_millis();
        let session = Arc::new(Session {
            id: id.clone(),
            project_slug,
            agent_kind,
            client_version,
            created_at: Instant::now(),
            last_activity: std::sync::atomic::AtomicU64::new(now_ms),
            started_at_epoch_ms: now_ms,
            sender,
        });
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned();
        if let Some(ref session) = session {
            session.touch();
        }
        session
    }

    pub async fn touch(&self, id: &str) {
        if let Some(session) = self.sessions.read().await.get(id) {
            session.touch();
        }
    }

    /// Remove a session only if the registry still points at the same object — guards
    /// against a new connection that reused the same id racing the old writer's exit.
    pub async fn end(&self, id: &str, expected: &Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(id) {
            if Arc::ptr_eq(current, expected) {
                sessions.remove(id);
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// The idle TTL sessions are swept after, for callers that need to report an
    /// expiry estimate (e.g. `init_session`'s `expires_at`).
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Scan under a read lock for sessions idle past the TTL, then delete them in a
    /// single write-lock batch. Returns the number reaped.
    async fn sweep_once(&self) -> usize {
        let stale: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, session)| session.elapsed_idle() > self.idle_ttl)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if stale.is_empty() {
            return 0;
        }
        let mut sessions = self.sessions.write().await;
        for id in &stale {
            sessions.remove(id);
        }
        stale.len()
    }

    /// Spawn the background sweeper. Panics inside a sweep are caught by the enclosing
    /// supervisor loop, logged, and the loop resumes after a short backoff rather than
    /// taking the whole process down.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let manager = Arc::clone(&manager);
                let result = tokio::spawn(async move {
                    let reaped = manager.sweep_once().await;
                    if reaped > 0 {
                        tracing::info!(reaped, "session sweeper reclaimed idle sessions");
                    }
                })
                .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "session sweeper task panicked, restarting after backoff");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        });
    }
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a `sess_`-prefixed, 128-bit hex session identifier using the platform
/// CSPRNG. Falls back to a timestamp-derived id if the RNG is unavailable, which
/// should never happen in practice but must not be allowed to crash the server.
pub fn generate_session_id() -> String {
    match std::panic::catch_unwind(uuid::Uuid::new_v4) {
        Ok(uuid) => format!("sess_{}", uuid.simple()),
        Err(_) => {
            tracing::error!("CSPRNG unavailable, falling back to timestamp-derived session id");
            format!("sess_fallback_{}", epoch_millis())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_lookup_round_trips() {
        let manager = SessionManager::new(Duration::from_secs(60), 100);
        let (session, _rx) = manager.create(Some("demo".into()), AgentKind::ClaudeCode, None).await;
        let found = manager.lookup(&session.id).await;
        assert!(found.is_some());
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn sweep_reaps_idle_sessions_only() {
        let manager = SessionManager::new(Duration::from_millis(5), 100);
        let (_session, _rx) = manager.create(None, AgentKind::Other, None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reaped = manager.sweep_once().await;
        assert_eq!(reaped, 1);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn enqueue_fails_busy_when_queue_is_full() {
        let manager = SessionManager::new(Duration::from_secs(60), 1);
        let (session, _rx) = manager.create(None, AgentKind::Other, None).await;
        session.enqueue("first".into(), Duration::from_millis(50)).await.unwrap();
        let result = session.enqueue("second".into(), Duration::from_millis(50)).await;
        assert_eq!(result, Err(EnqueueError::Busy));
    }

    #[tokio::test]
    async fn enqueue_fails_closed_after_receiver_drops() {
        let manager = SessionManager::new(Duration::from_secs(60), 1);
        let (session, rx) = manager.create(None, AgentKind::Other, None).await;
        drop(rx);
        let result = session.enqueue("x".into(), Duration::from_millis(50)).await;
        assert_eq!(result, Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn create_detached_session_has_no_stream() {
        let manager = SessionManager::new(Duration::from_secs(60), 1);
        let session = manager.create_detached(None, AgentKind::Other, None).await;
        assert!(!session.has_stream());
        let result = session.enqueue("x".into(), Duration::from_millis(50)).await;
        assert_eq!(result, Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn create_with_stream_reports_has_stream() {
        let manager = SessionManager::new(Duration::from_secs(60), 1);
        let (session, _rx) = manager.create(None, AgentKind::Other, None).await;
        assert!(session.has_stream());
    }

    #[test]
    fn session_ids_have_expected_shape() {
        let id = generate_session_id();
        assert!(id.starts_with("sess_"));
    }

    #[test]
    fn agent_kind_parses_known_values_and_defaults_to_other() {
        assert_eq!(AgentKind::parse("cursor"), AgentKind::Cursor);
        assert_eq!(AgentKind::parse("something-else"), AgentKind::Other);
    }
}
