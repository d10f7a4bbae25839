// service.rs — one service loop per connection: login handshake, request
// dispatch, and pending-hit processing between packets.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use mazewar_common::proto::{self, PacketHeader, PacketType, RecvError};
use tracing::debug;

use crate::player::Player;
use crate::server::Engine;

/// Poll interval for blocked reads. A read that has not seen the start of
/// a frame surfaces `Interrupted` at this cadence, which bounds how long a
/// pending laser hit can sit unobserved while the client is silent.
pub const READ_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Drive one client connection from accept to close.
pub fn client_service(engine: Arc<Engine>, stream: TcpStream) {
    // The listener hands out whatever blocking mode it was in; reads here
    // must block with a poll deadline.
    if stream.set_nonblocking(false).is_err()
        || stream.set_read_timeout(Some(READ_POLL_TIMEOUT)).is_err()
    {
        return;
    }
    let Some(registration) = engine.registry.register(&stream) else {
        return;
    };

    let mut reader = stream;
    let mut player: Option<Arc<Player>> = None;

    loop {
        // A laser hit is handled before blocking again, whether the read
        // below ends in a packet, a timeout, or EOF.
        if let Some(p) = &player {
            engine.players.check_for_laser_hit(&engine.maze, p);
        }

        let (header, payload) = match proto::recv_packet(&mut reader) {
            Ok(packet) => packet,
            Err(RecvError::Interrupted) => continue,
            Err(RecvError::Eof) => break,
            Err(RecvError::Io(err)) => {
                debug!(%err, "session read failed");
                break;
            }
        };

        match &player {
            None => {
                // Not logged in yet: everything but LOGIN is discarded.
                if header.packet_type() == Some(PacketType::Login) {
                    let name = payload.as_deref().unwrap_or_default();
                    match engine.players.login(&reader, header.param1, name) {
                        Some(p) => {
                            let _ = p.send(PacketHeader::new(PacketType::Ready), None);
                            engine.players.reset(&engine.maze, &p);
                            player = Some(p);
                        }
                        None => {
                            let mut reply = PacketHeader::new(PacketType::Inuse);
                            (reply.timestamp_sec, reply.timestamp_nsec) =
                                proto::monotonic_timestamp();
                            let _ = proto::send_packet(&mut &reader, &reply, None);
                        }
                    }
                }
            }
            Some(p) => {
                match header.packet_type() {
                    Some(PacketType::Move) => {
                        engine.players.move_player(&engine.maze, p, header.param1 as i8)
                    }
                    Some(PacketType::Turn) => {
                        engine.players.rotate(&engine.maze, p, header.param1 as i8)
                    }
                    Some(PacketType::Fire) => engine.players.fire_laser(&engine.maze, p),
                    Some(PacketType::Refresh) => {
                        p.invalidate_view();
                        engine.players.update_view(&engine.maze, p);
                    }
                    Some(PacketType::Send) => engine
                        .players
                        .send_chat(p, payload.as_deref().unwrap_or_default()),
                    // anything else after login is silently ignored
                    _ => {}
                }
                engine.maze.trace_dump();
            }
        }
    }

    if let Some(p) = player {
        engine.players.logout(&engine.maze, &p);
    }
    engine.registry.unregister(registration);
    // dropping the reader closes the connection
}
