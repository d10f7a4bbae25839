// client_registry.rs — the set of live client connections and the
// shutdown drain: close every read half, then wait until the last service
// thread has unregistered itself.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

pub type ClientId = u64;

pub struct ClientRegistry {
    state: Mutex<RegistryState>,
    drained: Condvar,
}

struct RegistryState {
    handles: HashMap<ClientId, TcpStream>,
    next_id: ClientId,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry {
            state: Mutex::new(RegistryState {
                handles: HashMap::new(),
                next_id: 0,
            }),
            drained: Condvar::new(),
        }
    }

    /// Track a connection. Returns the id to unregister with, or `None`
    /// when the handle could not be duplicated (the session is then not
    /// part of the drain protocol and should end itself).
    pub fn register(&self, stream: &TcpStream) -> Option<ClientId> {
        let handle = stream.try_clone().ok()?;
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.handles.insert(id, handle);
        debug!(id, clients = state.handles.len(), "client registered");
        Some(id)
    }

    /// Stop tracking a connection. The drain waiter is signalled when the
    /// set becomes empty.
    pub fn unregister(&self, id: ClientId) {
        let mut state = self.state.lock();
        state.handles.remove(&id);
        debug!(id, clients = state.handles.len(), "client unregistered");
        if state.handles.is_empty() {
            self.drained.notify_one();
        }
    }

    /// Read-half shutdown on every tracked connection, so each blocked
    /// service loop observes EOF and terminates on its own.
    pub fn shutdown_all(&self) {
        let state = self.state.lock();
        for handle in state.handles.values() {
            let _ = handle.shutdown(Shutdown::Read);
        }
    }

    /// Block until the set is empty. Single-waiter, for the supervisor at
    /// teardown; returns immediately if nothing is registered.
    pub fn wait_for_empty(&self) {
        let mut state = self.state.lock();
        while !state.handles.is_empty() {
            self.drained.wait(&mut state);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn connection() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_register_unregister() {
        let registry = ClientRegistry::new();
        let (_c1, s1) = connection();
        let (_c2, s2) = connection();
        let id1 = registry.register(&s1).unwrap();
        let id2 = registry.register(&s2).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(registry.len(), 2);
        registry.unregister(id1);
        registry.unregister(id2);
        assert!(registry.is_empty());
        // unregistering an unknown id is harmless
        registry.unregister(id1);
    }

    #[test]
    fn test_wait_for_empty_returns_immediately_when_empty() {
        let registry = ClientRegistry::new();
        registry.wait_for_empty();
    }

    #[test]
    fn test_wait_for_empty_blocks_until_drained() {
        let registry = Arc::new(ClientRegistry::new());
        let (_c1, s1) = connection();
        let id = registry.register(&s1).unwrap();

        let worker = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                registry.unregister(id);
            })
        };
        registry.wait_for_empty();
        assert!(registry.is_empty());
        worker.join().unwrap();
    }

    #[test]
    fn test_shutdown_all_forces_eof() {
        let registry = ClientRegistry::new();
        let (_c1, mut s1) = connection();
        registry.register(&s1).unwrap();
        registry.shutdown_all();
        // the read half is gone: a blocked read observes EOF
        let mut buf = [0u8; 8];
        assert_eq!(s1.read(&mut buf).unwrap(), 0);
    }
}
