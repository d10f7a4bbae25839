// mazewar-common — definitions shared by the server and any client:
// the framed binary wire protocol and the game's primitive types.

pub mod defs;
pub mod proto;
