// server.rs — the engine singletons and the listener/supervisor: accept
// connections, spawn a service thread each, and on shutdown drain every
// session before letting the shared modules go.

use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::client_registry::ClientRegistry;
use crate::maze::Maze;
use crate::player::PlayerTable;
use crate::service;

/// How often the accept loop re-checks the shutdown flag when no
/// connection is pending.
const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// The process-wide game state, handed to every service thread.
pub struct Engine {
    pub registry: ClientRegistry,
    pub maze: Maze,
    pub players: PlayerTable,
}

impl Engine {
    pub fn new(maze: Maze) -> Engine {
        Engine {
            registry: ClientRegistry::new(),
            maze,
            players: PlayerTable::new(),
        }
    }
}

/// Accept connections until the shutdown flag is raised, then drain.
///
/// The listener runs non-blocking and polls the flag, so a signal arriving
/// at any moment stops the loop within one poll interval. A failing accept
/// is fatal to the supervisor and triggers the same orderly drain.
pub fn run(engine: Arc<Engine>, listener: TcpListener, shutdown: Arc<AtomicBool>) -> io::Result<()> {
    listener.set_nonblocking(true)?;

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "client connected");
                let engine = Arc::clone(&engine);
                let spawned = thread::Builder::new()
                    .name(format!("client-{peer}"))
                    .spawn(move || service::client_service(engine, stream));
                if let Err(err) = spawned {
                    error!(%err, "could not spawn service thread");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_TIMEOUT);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                error!(%err, "accept failed, shutting down");
                drain(&engine);
                return Err(err);
            }
        }
    }

    drain(&engine);
    Ok(())
}

/// The shutdown protocol: force EOF on every session, then wait until the
/// last service thread has unregistered itself.
fn drain(engine: &Engine) {
    info!("shutting down, draining client sessions");
    engine.registry.shutdown_all();
    engine.registry.wait_for_empty();
    info!("all client sessions drained");
}
