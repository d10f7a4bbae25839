// mazewar-server — the concurrent game-state engine of the MazeWar server:
// one service thread per client, a shared maze, a 26-slot player table, and
// a registry that drains every session before teardown.

pub mod client_registry;
pub mod maze;
pub mod player;
pub mod server;
pub mod service;
