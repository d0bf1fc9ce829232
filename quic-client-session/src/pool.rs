//! A pool of client sessions, keyed by server
// (c) 2025 Ross Younger

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::NetError;
use crate::session::{ClientSession, SessionInfo, SessionOwner};
use crate::types::{HostPortPair, ServerKey};

#[derive(Debug)]
struct PooledSession {
    session: Rc<ClientSession>,
    aliases: BTreeSet<HostPortPair>,
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Sessions that can take new streams, by every key they may serve
    active: BTreeMap<ServerKey, Rc<ClientSession>>,
    /// Every session not yet closed, including those going away
    all: Vec<PooledSession>,
}

/// Keeps track of the sessions a client has open.
///
/// The pool is the [`SessionOwner`] of the sessions it holds. Sessions leave
/// the active map when they start going away, so no new requests are routed to
/// them, and are forgotten entirely when they close.
#[derive(Debug, Default)]
pub struct SessionPool {
    inner: RefCell<PoolInner>,
}

impl SessionPool {
    /// Constructor
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::default()
    }

    /// Adds a session, which must have been built with this pool as its owner
    pub fn activate(&self, session: Rc<ClientSession>) {
        let key = session.server_key().clone();
        debug!("activating session for {key}");
        let mut inner = self.inner.borrow_mut();
        let _ = inner.active.insert(key.clone(), Rc::clone(&session));
        inner.all.push(PooledSession {
            session,
            aliases: BTreeSet::from([key.host_port_pair]),
        });
    }

    /// The active session for exactly this key
    #[must_use]
    pub fn get(&self, key: &ServerKey) -> Option<Rc<ClientSession>> {
        self.inner.borrow().active.get(key).cloned()
    }

    /// Finds an active session that can serve `key`.
    ///
    /// Failing an exact match, any active session for the same port and scheme
    /// whose certificate covers the host will do; `key` then becomes an alias for it.
    #[must_use]
    pub fn find_poolable(&self, key: &ServerKey) -> Option<Rc<ClientSession>> {
        if let Some(session) = self.get(key) {
            return Some(session);
        }
        let candidates: Vec<Rc<ClientSession>> = self.inner.borrow().active.values().cloned().collect();
        let found = candidates.into_iter().find(|s| {
            let theirs = s.server_key();
            theirs.is_https == key.is_https
                && theirs.host_port_pair.port == key.host_port_pair.port
                && s.can_pool(key.host())
        })?;
        debug!("pooling {key} onto {}", found.server_key());
        let mut inner = self.inner.borrow_mut();
        let _ = inner.active.insert(key.clone(), Rc::clone(&found));
        if let Some(entry) = inner
            .all
            .iter_mut()
            .find(|p| Rc::ptr_eq(&p.session, &found))
        {
            let _ = entry.aliases.insert(key.host_port_pair.clone());
        }
        Some(found)
    }

    /// Sessions that can take new streams
    #[must_use]
    pub fn num_active(&self) -> usize {
        let inner = self.inner.borrow();
        let mut seen: Vec<&Rc<ClientSession>> = Vec::new();
        for s in inner.active.values() {
            if !seen.iter().any(|o| Rc::ptr_eq(o, s)) {
                seen.push(s);
            }
        }
        seen.len()
    }

    /// Sessions not yet closed
    #[must_use]
    pub fn num_sessions(&self) -> usize {
        self.inner.borrow().all.len()
    }

    /// Closes every session with `error`
    pub fn close_all(&self, error: NetError) {
        let sessions: Vec<Rc<ClientSession>> = self
            .inner
            .borrow()
            .all
            .iter()
            .map(|p| Rc::clone(&p.session))
            .collect();
        for session in sessions {
            session.close_session_on_error(error);
        }
    }

    /// Diagnostic snapshot of every session
    #[must_use]
    pub fn info(&self) -> Vec<SessionInfo> {
        let entries: Vec<(Rc<ClientSession>, BTreeSet<HostPortPair>)> = self
            .inner
            .borrow()
            .all
            .iter()
            .map(|p| (Rc::clone(&p.session), p.aliases.clone()))
            .collect();
        entries
            .iter()
            .map(|(session, aliases)| session.info(aliases))
            .collect()
    }

    fn deactivate(inner: &mut PoolInner, session: &ClientSession) {
        inner
            .active
            .retain(|_, s| !std::ptr::eq(Rc::as_ptr(s), session));
    }
}

impl SessionOwner for SessionPool {
    fn on_session_going_away(&self, session: &ClientSession) {
        trace!("session for {} going away", session.server_key());
        Self::deactivate(&mut self.inner.borrow_mut(), session);
    }

    fn on_idle_session(&self, session: &ClientSession) {
        trace!("session for {} is idle", session.server_key());
    }

    fn on_session_closed(&self, session: &ClientSession) {
        trace!("session for {} closed", session.server_key());
        let removed = {
            let mut inner = self.inner.borrow_mut();
            Self::deactivate(&mut inner, session);
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.all)
                .into_iter()
                .partition(|p| std::ptr::eq(Rc::as_ptr(&p.session), session));
            inner.all = kept;
            gone
        };
        // the session may be dropped here, so not while the pool is borrowed
        drop(removed);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::SessionPool;
    use crate::cert::{CertVerifyResult, Certificate};
    use crate::error::{NetError, QuicErrorCode};
    use crate::metrics::RecordingMetrics;
    use crate::session::ClientSession;
    use crate::testing::{FakeConnection, FakeCryptoStream, FakeSocket};
    use crate::types::{HostPortPair, ServerKey};
    use crate::util::LocalTaskQueue;

    fn key(host: &str) -> ServerKey {
        ServerKey::new(HostPortPair::new(host, 443), true)
    }

    fn session(
        pool: &Rc<SessionPool>,
        tasks: &Rc<LocalTaskQueue>,
        host: &str,
    ) -> (Rc<ClientSession>, FakeConnection) {
        let connection = FakeConnection::default();
        let crypto = FakeCryptoStream::default();
        crypto.confirm();
        let s = ClientSession::builder(
            Box::new(connection.clone()),
            Box::new(FakeSocket::default()),
            Box::new(crypto),
            key(host),
        )
        .owner(pool)
        .metrics(RecordingMetrics::new())
        .task_runner(Rc::clone(tasks))
        .build();
        (s, connection)
    }

    #[test]
    fn going_away_then_closed() {
        let pool = SessionPool::new();
        let tasks = Rc::new(LocalTaskQueue::new());
        let (s, connection) = session(&pool, &tasks, "www.example.org");
        pool.activate(Rc::clone(&s));
        assert_eq!(pool.num_active(), 1);
        let weak = Rc::downgrade(&s);
        drop(s);

        connection.0.borrow_mut().connected = false;
        weak.upgrade()
            .unwrap()
            .on_connection_closed(QuicErrorCode::PeerGoingAway, true);
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_sessions(), 1);
        assert!(pool.get(&key("www.example.org")).is_none());

        let _ = tasks.run_until_idle();
        assert_eq!(pool.num_sessions(), 0);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn pools_by_certificate() {
        let pool = SessionPool::new();
        let tasks = Rc::new(LocalTaskQueue::new());
        let (s, _) = session(&pool, &tasks, "www.example.org");
        s.on_proof_verify_details_available(&CertVerifyResult {
            verified_cert: Some(Certificate {
                dns_names: vec!["*.example.org".into()],
            }),
            ..Default::default()
        });
        pool.activate(Rc::clone(&s));

        let found = pool.find_poolable(&key("mail.example.org")).unwrap();
        assert!(Rc::ptr_eq(&found, &s));
        assert!(pool.find_poolable(&key("www.example.com")).is_none());
        assert!(
            pool.find_poolable(&ServerKey::new(HostPortPair::new("ftp.example.org", 8443), true))
                .is_none()
        );
        assert_eq!(pool.num_active(), 1);

        let info = pool.info();
        assert_eq!(info.len(), 1);
        assert_eq!(
            info[0].aliases,
            vec!["mail.example.org:443", "www.example.org:443"]
        );
        assert_eq!(info[0].host_port_pair, "mail.example.org:443");
        assert!(info[0].secure);
        pool.close_all(NetError::Unexpected);
        assert_eq!(pool.num_sessions(), 0);
    }

    #[test]
    fn close_all_forgets_everything() {
        let pool = SessionPool::new();
        let tasks = Rc::new(LocalTaskQueue::new());
        let (a, _) = session(&pool, &tasks, "a.example.org");
        let (b, _) = session(&pool, &tasks, "b.example.org");
        pool.activate(a);
        pool.activate(b);
        assert_eq!(pool.num_sessions(), 2);

        pool.close_all(NetError::ConnectionClosed);
        assert_eq!(pool.num_sessions(), 0);
        assert_eq!(pool.num_active(), 0);
        // deferred notifications find nothing left to do
        let _ = tasks.run_until_idle();
        assert!(pool.info().is_empty());
    }
}
