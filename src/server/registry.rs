use std::{
    collections::HashMap,
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::debug;
use uuid::Uuid;

use crate::protocol::ProtocolError;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Stop signal shared between the control plane and one session worker.
///
/// The worker may be parked in `accept` or in a read, so stopping it either
/// shuts its accepted stream down or, before a client has arrived, connects
/// to its listener once to wake the `accept`.
#[derive(Debug)]
pub struct SessionControl {
    listen_addr: SocketAddr,
    stopped: AtomicBool,
    stream: Mutex<Option<TcpStream>>,
}

impl SessionControl {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            stopped: AtomicBool::new(false),
            stream: Mutex::new(None),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Called by the worker with a clone of the stream it accepted.
    pub(crate) fn attach(&self, stream: TcpStream) {
        *self.slot() = Some(stream);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        let slot = self.slot();
        match slot.as_ref() {
            Some(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            None => {
                if let Err(e) = TcpStream::connect_timeout(&self.listen_addr, WAKE_TIMEOUT) {
                    debug!("waking listener {}: {e}", self.listen_addr);
                }
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live sessions, keyed by session id.
///
/// Owned by the control plane; workers never touch it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<SessionControl>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<SessionControl>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: Uuid, control: Arc<SessionControl>) {
        self.sessions().insert(id, control);
    }

    /// Remove a session for teardown.
    pub fn remove(&self, id: Uuid) -> Result<Arc<SessionControl>, ProtocolError> {
        self.sessions()
            .remove(&id)
            .ok_or(ProtocolError::UnknownSession(id))
    }

    /// Remove a session that may already be gone, reporting whether it was
    /// still registered.
    pub fn discard(&self, id: Uuid) -> bool {
        self.sessions().remove(&id).is_some()
    }

    /// Remove every session.
    pub fn drain(&self) -> Vec<(Uuid, Arc<SessionControl>)> {
        self.sessions().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn second_removal_is_unknown() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let control = Arc::new(SessionControl::new("127.0.0.1:9".parse().unwrap()));

        registry.insert(id, control);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id).is_ok());
        assert_eq!(registry.remove(id).unwrap_err(), ProtocolError::UnknownSession(id));
        assert!(!registry.discard(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn stop_wakes_a_pending_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let control = Arc::new(SessionControl::new(listener.local_addr().unwrap()));

        let waiter = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || {
                let _ = listener.accept().unwrap();
                control.is_stopped()
            })
        };

        control.stop();
        assert!(waiter.join().unwrap());
    }
}
