use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::controller::ViewController;

pub const SESSION_COOKIE: &str = "basirat_session";

struct Session {
    controller: ViewController,
    last_seen: Instant,
}

/// Page sessions keyed by cookie id. Each holds its own `ViewController`.
/// The lock is only held for synchronous controller calls.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Session>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the id of an existing live session, or creates a new one.
    /// The bool is true when a session was created.
    pub fn resolve(&self, id: Option<Uuid>) -> (Uuid, bool) {
        let mut sessions = self.lock();
        let now = Instant::now();

        if let Some(id) = id {
            if let Some(session) = sessions.get_mut(&id) {
                session.last_seen = now;
                return (id, false);
            }
        }

        let ttl = self.ttl;
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.last_seen) < ttl);
        if sessions.len() != before {
            debug!("pruned {} idle sessions", before - sessions.len());
        }

        let id = Uuid::new_v4();
        sessions.insert(
            id,
            Session {
                controller: ViewController::new(),
                last_seen: now,
            },
        );
        (id, true)
    }

    /// Runs `f` against the session's controller. `None` if the session is gone.
    pub fn with<R>(&self, id: Uuid, f: impl FnOnce(&mut ViewController) -> R) -> Option<R> {
        let mut sessions = self.lock();
        sessions.get_mut(&id).map(|s| f(&mut s.controller))
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Pulls the session id out of a `Cookie` header value.
pub fn session_id_from_cookie(header: &str) -> Option<Uuid> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

pub fn session_cookie(id: Uuid) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}

pub fn expired_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}
