// player.rs — the 26-slot player table and every per-player game
// operation: login, placement, movement, firing, hit processing, chat, and
// the per-client view differ.
//
// Records are shared as `Arc<Player>`: the table holds one reference, the
// owning service thread another, and any thread broadcasting to the player
// clones its own. A record therefore stays valid for every thread that
// observed it until that thread lets go.
//
// Lock order within this module: player table lock, then a player's state
// lock, then its writer lock, then the maze lock. Broadcasts snapshot the
// table and send after the table lock is released.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mazewar_common::defs::{is_avatar, Direction, View, VIEW_DEPTH, VIEW_WIDTH};
use mazewar_common::proto::{self, PacketHeader, PacketType};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::maze::Maze;

pub const NUM_AVATARS: usize = 26;

/// Substituted for an empty login name.
const ANONYMOUS: &[u8] = b"Anonymous";

/// How long a hit player is frozen before being placed back on the maze.
const HIT_PAUSE: Duration = Duration::from_secs(3);

pub struct Player {
    avatar: u8,
    name: Vec<u8>,
    /// Write half of the connection. Held for the duration of one packet
    /// send, so frames from concurrent senders never interleave.
    writer: Mutex<TcpStream>,
    /// Game state written by the owning service thread, read by anyone.
    state: Mutex<PlayerState>,
    /// Set by a shooter's thread, test-and-cleared by the owning thread at
    /// its next read boundary.
    hit_pending: AtomicBool,
}

struct PlayerState {
    pos: Option<(usize, usize)>,
    gaze: Direction,
    score: i32,
    prev_view: Option<View>,
}

impl Player {
    pub fn avatar(&self) -> u8 {
        self.avatar
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn position(&self) -> Option<(usize, usize)> {
        self.state.lock().pos
    }

    pub fn gaze(&self) -> Direction {
        self.state.lock().gaze
    }

    pub fn score(&self) -> i32 {
        self.state.lock().score
    }

    /// One-shot hit notification from a shooter's thread.
    pub fn mark_hit(&self) {
        self.hit_pending.store(true, Ordering::SeqCst);
    }

    fn take_hit(&self) -> bool {
        self.hit_pending.swap(false, Ordering::SeqCst)
    }

    /// Drop the cached view so the next update is a full CLEAR + resend.
    pub fn invalidate_view(&self) {
        self.state.lock().prev_view = None;
    }

    /// Stamp the header with a monotonic timestamp and write the frame
    /// under the writer lock.
    pub fn send(&self, mut header: PacketHeader, payload: Option<&[u8]>) -> io::Result<()> {
        (header.timestamp_sec, header.timestamp_nsec) = proto::monotonic_timestamp();
        let writer = self.writer.lock();
        proto::send_packet(&mut &*writer, &header, payload)
    }

    /// Read-half shutdown: the owning service loop observes EOF at its next
    /// read and tears the session down.
    fn shutdown_read(&self) {
        let _ = self.writer.lock().shutdown(Shutdown::Read);
    }
}

fn slot(avatar: u8) -> usize {
    (avatar - b'A') as usize
}

pub struct PlayerTable {
    slots: Mutex<[Option<Arc<Player>>; NUM_AVATARS]>,
}

impl Default for PlayerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerTable {
    pub fn new() -> PlayerTable {
        PlayerTable {
            slots: Mutex::new(std::array::from_fn(|_| None)),
        }
    }

    /// Create and publish a record for a new session.
    ///
    /// Name policy: empty becomes "Anonymous"; otherwise the first byte
    /// must be an uppercase letter. Avatar policy, first available wins:
    /// the requested letter (case folded), then the name's initial, then
    /// the first free slot scanning 'A'..'Z'. A requested avatar that is
    /// neither 0 nor a letter is rejected outright.
    ///
    /// The record starts with gaze EAST, score 0, no cached view, no
    /// pending hit, and no maze placement.
    pub fn login(
        &self,
        stream: &TcpStream,
        requested_avatar: u8,
        name: &[u8],
    ) -> Option<Arc<Player>> {
        let real_name: Vec<u8> = if name.is_empty() {
            ANONYMOUS.to_vec()
        } else if name[0].is_ascii_uppercase() {
            name.to_vec()
        } else {
            return None;
        };
        if requested_avatar != 0 && !requested_avatar.is_ascii_alphabetic() {
            return None;
        }
        let requested = requested_avatar.to_ascii_uppercase();
        let writer = stream.try_clone().ok()?;

        let mut slots = self.slots.lock();
        let avatar = if is_avatar(requested) && slots[slot(requested)].is_none() {
            requested
        } else {
            let initial = if name.is_empty() { 0 } else { real_name[0] };
            if is_avatar(initial) && slots[slot(initial)].is_none() {
                initial
            } else {
                (b'A'..=b'Z').find(|&a| slots[slot(a)].is_none())?
            }
        };

        let player = Arc::new(Player {
            avatar,
            name: real_name,
            writer: Mutex::new(writer),
            state: Mutex::new(PlayerState {
                pos: None,
                gaze: Direction::East,
                score: 0,
                prev_view: None,
            }),
            hit_pending: AtomicBool::new(false),
        });
        slots[slot(avatar)] = Some(Arc::clone(&player));
        drop(slots);

        info!(
            avatar = %(avatar as char),
            name = %player.name_lossy(),
            "player logged in"
        );
        Some(player)
    }

    /// Look up a published record by avatar.
    pub fn get(&self, avatar: u8) -> Option<Arc<Player>> {
        if !is_avatar(avatar) {
            return None;
        }
        self.slots.lock()[slot(avatar)].clone()
    }

    /// Remove the slot entry. The record itself lives on in whatever
    /// references are still held.
    pub fn unpublish(&self, avatar: u8) {
        self.slots.lock()[slot(avatar)] = None;
    }

    /// Snapshot of every published record, taken under the table lock so a
    /// broadcast can send without holding it.
    pub fn published(&self) -> Vec<Arc<Player>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    /// Place (or re-place) the player at a random empty cell, refresh every
    /// view, and resend the scoreboard. If the maze has no space left the
    /// session is torn down via read-half shutdown instead.
    pub fn reset(&self, maze: &Maze, player: &Arc<Player>) {
        if let Some((row, col)) = player.position() {
            maze.remove(player.avatar, row, col);
        }
        let Some((row, col)) = maze.place_random(player.avatar) else {
            debug!(avatar = %(player.avatar as char), "maze full, dropping session");
            player.shutdown_read();
            return;
        };
        player.state.lock().pos = Some((row, col));

        // Everyone gets a full view refresh: the world changed under them.
        for p in self.published() {
            p.invalidate_view();
            self.update_view(maze, &p);
        }

        // The whole board to the player who just (re)appeared...
        for p in self.published() {
            let mut header = PacketHeader::new(PacketType::Score);
            header.param1 = p.avatar;
            header.param2 = p.score() as u8;
            header.size = p.name.len() as u16;
            let _ = player.send(header, Some(&p.name));
        }
        // ...and this player's line to everyone else.
        let mut header = PacketHeader::new(PacketType::Score);
        header.param1 = player.avatar;
        header.param2 = player.score() as u8;
        header.size = player.name.len() as u16;
        for p in self.published() {
            if !Arc::ptr_eq(&p, player) {
                let _ = p.send(header, Some(&player.name));
            }
        }
    }

    /// Move one cell along the gaze (sign +1) or away from it (sign -1).
    /// A successful move refreshes every player's view incrementally.
    pub fn move_player(&self, maze: &Maze, player: &Arc<Player>, sign: i8) {
        let Some((row, col)) = player.position() else {
            return;
        };
        let gaze = player.gaze();
        let direction = if sign == 1 { gaze } else { gaze.reverse() };
        if !maze.step(row, col, direction) {
            return;
        }
        let (dr, dc) = direction.delta();
        player.state.lock().pos = Some(((row as i64 + dr) as usize, (col as i64 + dc) as usize));
        for p in self.published() {
            self.update_view(maze, &p);
        }
    }

    /// Rotate the gaze 90° counterclockwise (sign +1) or clockwise
    /// (sign -1). Only this player's view changes, and it changes shape, so
    /// it is resent in full.
    pub fn rotate(&self, maze: &Maze, player: &Arc<Player>, sign: i8) {
        {
            let mut state = player.state.lock();
            state.gaze = if sign == 1 {
                state.gaze.turn_left()
            } else {
                state.gaze.turn_right()
            };
            state.prev_view = None;
        }
        self.update_view(maze, player);
    }

    /// Fire along the gaze. A hit marks the victim (observed by its own
    /// service thread at the next read boundary), bumps the shooter's
    /// score, and broadcasts the new score.
    pub fn fire_laser(&self, maze: &Maze, player: &Arc<Player>) {
        let Some((row, col)) = player.position() else {
            return;
        };
        let Some(target) = maze.find_target(row, col, player.gaze()) else {
            return;
        };
        if let Some(victim) = self.get(target) {
            victim.mark_hit();
        }
        let score = {
            let mut state = player.state.lock();
            state.score += 1;
            state.score
        };
        let mut header = PacketHeader::new(PacketType::Score);
        header.param1 = player.avatar;
        header.param2 = score as u8;
        for p in self.published() {
            let _ = p.send(header, None);
        }
    }

    /// Process a pending laser hit, if any: vanish from the maze, alert the
    /// player, freeze for the penalty pause, then reset. Called by the
    /// owning service thread between packets.
    pub fn check_for_laser_hit(&self, maze: &Maze, player: &Arc<Player>) {
        if !player.take_hit() {
            return;
        }
        debug!(avatar = %(player.avatar as char), "laser hit");
        if let Some((row, col)) = player.position() {
            maze.remove(player.avatar, row, col);
            player.state.lock().pos = None;
            for p in self.published() {
                self.update_view(maze, &p);
            }
        }
        let _ = player.send(PacketHeader::new(PacketType::Alert), None);
        thread::sleep(HIT_PAUSE);
        self.reset(maze, player);
    }

    /// Broadcast `name + "[" + avatar + "] " + message` to every published
    /// player, the sender included.
    pub fn send_chat(&self, player: &Arc<Player>, message: &[u8]) {
        let mut line = Vec::with_capacity(player.name.len() + 4 + message.len());
        line.extend_from_slice(&player.name);
        line.push(b'[');
        line.push(player.avatar);
        line.extend_from_slice(b"] ");
        line.extend_from_slice(message);

        let mut header = PacketHeader::new(PacketType::Chat);
        header.size = line.len() as u16;
        for p in self.published() {
            let _ = p.send(header, Some(&line));
        }
    }

    /// Recompute this player's view and push the difference: a CLEAR plus
    /// the whole grid when there is no cached view or the depth changed,
    /// otherwise SHOW packets for changed cells only.
    pub fn update_view(&self, maze: &Maze, player: &Arc<Player>) {
        let new_view = match player.position() {
            Some((row, col)) => maze.view(row, col, player.gaze(), VIEW_DEPTH),
            // off the maze (mid-hit): nothing to see
            None => View::new(),
        };

        let mut state = player.state.lock();
        let full = state
            .prev_view
            .as_ref()
            .map_or(true, |prev| prev.len() != new_view.len());
        if full {
            let _ = player.send(PacketHeader::new(PacketType::Clear), None);
            for (depth, view_row) in new_view.iter().enumerate() {
                for column in 0..VIEW_WIDTH {
                    let _ = player.send(show_packet(view_row[column], column, depth), None);
                }
            }
        } else if let Some(prev) = &state.prev_view {
            for (depth, view_row) in new_view.iter().enumerate() {
                for column in 0..VIEW_WIDTH {
                    if view_row[column] != prev[depth][column] {
                        let _ = player.send(show_packet(view_row[column], column, depth), None);
                    }
                }
            }
        }
        state.prev_view = Some(new_view);
    }

    /// End a session: vacate the maze, tell the others the player left
    /// (SCORE of -1), and unpublish the slot.
    pub fn logout(&self, maze: &Maze, player: &Arc<Player>) {
        if let Some((row, col)) = player.position() {
            maze.remove(player.avatar, row, col);
            for p in self.published() {
                self.update_view(maze, &p);
            }
        }
        let mut header = PacketHeader::new(PacketType::Score);
        header.param1 = player.avatar;
        header.param2 = (-1i8) as u8;
        for p in self.published() {
            if !Arc::ptr_eq(&p, player) {
                let _ = p.send(header, None);
            }
        }
        self.unpublish(player.avatar);
        info!(
            avatar = %(player.avatar as char),
            name = %player.name_lossy(),
            score = player.score(),
            "player logged out"
        );
    }
}

fn show_packet(cell: u8, column: usize, depth: usize) -> PacketHeader {
    let mut header = PacketHeader::new(PacketType::Show);
    header.param1 = cell;
    header.param2 = column as u8;
    header.param3 = depth as u8;
    header
}
