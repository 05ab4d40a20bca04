//! HTTP session bookkeeping.
//!
//! A session is reachable two ways: by the id handed out in `Mcp-Session-Id`, and through the
//! TCP connection that created or last used it. Clients that never echo the header are served
//! by the session their connection owns.
//!
//! The store stays bounded: a header-less `initialize` replaces the session its connection
//! created earlier unless some request has since named that session by id, sessions idle past
//! the timeout are dropped, and beyond capacity the least recently used session goes first.

use crate::app::ServerContext;
use crate::config::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE_TIMEOUT_SECS};
use crate::session::ProtocolSession;
use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

pub type SharedSession = Arc<tokio::sync::Mutex<ProtocolSession>>;

/// Identity of one accepted TCP connection, attached to every request it carries.
///
/// The server holds a clone for as long as the connection is open. The store only keeps a weak
/// handle, which is how it notices closed connections.
#[derive(Debug, Clone)]
pub struct ConnectionId {
    id: u64,
    peer: SocketAddr,
    alive: Arc<()>,
}

impl ConnectionId {
    #[must_use]
    pub fn new(peer: SocketAddr) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            peer,
            alive: Arc::new(()),
        }
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn handle(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for ConnectionId {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        Self::new(*stream.remote_addr())
    }
}

struct Entry {
    session: SharedSession,
    last_seen: Instant,
    /// Set once a request names the session by id; from then on it outlives re-initialization.
    claimed: bool,
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<String, Entry>,
    by_connection: HashMap<u64, (String, Weak<()>)>,
}

impl Sessions {
    fn evict_idle(&mut self, now: Instant, idle_timeout: Duration) {
        self.by_id.retain(|id, entry| {
            let keep = now.duration_since(entry.last_seen) <= idle_timeout;
            if !keep {
                tracing::debug!(session = %id, "evicting idle HTTP session");
            }
            keep
        });
        self.prune_connections();
    }

    fn enforce_capacity(&mut self, capacity: usize, keep: &str) {
        while self.by_id.len() > capacity {
            let Some(oldest) = self
                .by_id
                .iter()
                .filter(|(id, _)| id.as_str() != keep)
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            tracing::debug!(session = %oldest, "evicting least recently used HTTP session");
            self.by_id.remove(&oldest);
        }
        self.prune_connections();
    }

    fn prune_connections(&mut self) {
        let by_id = &self.by_id;
        self.by_connection
            .retain(|_, (id, conn)| conn.strong_count() > 0 && by_id.contains_key(id));
    }
}

/// Live HTTP sessions.
pub struct SessionStore {
    sessions: Mutex<Sessions>,
    idle_timeout: Duration,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS),
            DEFAULT_MAX_SESSIONS,
        )
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(idle_timeout: Duration, capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            idle_timeout,
            capacity: capacity.max(1),
        }
    }

    /// The session named by `header`, or without a header the one `conn` owns.
    ///
    /// A header naming no live session resolves to nothing, even when the connection owns one.
    pub fn lookup(&self, header: Option<&str>, conn: &ConnectionId) -> Option<SharedSession> {
        let mut guard = self.sessions.lock();
        let sessions = &mut *guard;
        let now = Instant::now();
        sessions.evict_idle(now, self.idle_timeout);

        let id = match header {
            Some(id) => id.to_string(),
            None => sessions.by_connection.get(&conn.id)?.0.clone(),
        };
        let entry = sessions.by_id.get_mut(&id)?;
        entry.last_seen = now;
        entry.claimed |= header.is_some();
        let session = entry.session.clone();
        sessions.by_connection.insert(conn.id, (id, conn.handle()));
        Some(session)
    }

    /// Open a new session owned by `conn`.
    pub fn create(&self, ctx: &Arc<ServerContext>, conn: &ConnectionId) -> (String, SharedSession) {
        let mut guard = self.sessions.lock();
        let sessions = &mut *guard;
        let now = Instant::now();
        sessions.evict_idle(now, self.idle_timeout);

        if let Some((previous, _)) = sessions.by_connection.get(&conn.id)
            && sessions.by_id.get(previous).is_some_and(|e| !e.claimed)
        {
            tracing::debug!(session = %previous, peer = %conn.peer, "replacing unclaimed HTTP session");
            sessions.by_id.remove(previous);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(tokio::sync::Mutex::new(ProtocolSession::new(ctx.clone())));
        sessions.by_id.insert(
            id.clone(),
            Entry {
                session: session.clone(),
                last_seen: now,
                claimed: false,
            },
        );
        sessions
            .by_connection
            .insert(conn.id, (id.clone(), conn.handle()));
        sessions.enforce_capacity(self.capacity, &id);
        (id, session)
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let removed = sessions.by_id.remove(id).is_some();
        sessions.prune_connections();
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().by_id.is_empty()
    }
}
