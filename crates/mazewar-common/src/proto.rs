// proto.rs — the framed binary wire protocol.
//
// Every packet is a fixed 16-byte big-endian header followed by `size`
// payload bytes. Reads are not auto-restarted when they are interrupted
// before a frame has begun: interruption is a first-class outcome that the
// service loop consumes to look for pending laser hits.

use std::io::{self, Read, Write};
use std::sync::OnceLock;
use std::time::Instant;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Serialized header size. The field widths sum to 14; bytes 6..8 are
/// padding so both timestamps sit at 4-byte offsets.
pub const HEADER_SIZE: usize = 16;

/// Packet types, in wire order. 0 is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// client→server: param1 = requested avatar (letter or 0), payload = name
    Login = 1,
    /// server→client: login accepted
    Ready = 2,
    /// server→client: login rejected
    Inuse = 3,
    /// client→server: param1 = +1 forward, -1 backward
    Move = 4,
    /// client→server: param1 = +1 counterclockwise, -1 clockwise
    Turn = 5,
    /// client→server: fire laser along the current gaze
    Fire = 6,
    /// client→server: request a full view resend
    Refresh = 7,
    /// client→server: payload = chat text
    Send = 8,
    /// server→client: clear the local view
    Clear = 9,
    /// server→client: param1 = cell, param2 = view column, param3 = depth
    Show = 10,
    /// server→client: param1 = avatar, param2 = score (-1 ⇒ departed),
    /// optional payload = name
    Score = 11,
    /// server→client: you were hit
    Alert = 12,
    /// server→client: payload = formatted chat line
    Chat = 13,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<PacketType> {
        Some(match value {
            1 => PacketType::Login,
            2 => PacketType::Ready,
            3 => PacketType::Inuse,
            4 => PacketType::Move,
            5 => PacketType::Turn,
            6 => PacketType::Fire,
            7 => PacketType::Refresh,
            8 => PacketType::Send,
            9 => PacketType::Clear,
            10 => PacketType::Show,
            11 => PacketType::Score,
            12 => PacketType::Alert,
            13 => PacketType::Chat,
            _ => return None,
        })
    }
}

/// The 16-byte packet header. Params carrying signed quantities (MOVE and
/// TURN signs, SCORE values) are cast through `i8`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub ptype: u8,
    pub param1: u8,
    pub param2: u8,
    pub param3: u8,
    pub size: u16,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
}

impl PacketHeader {
    pub fn new(ptype: PacketType) -> PacketHeader {
        PacketHeader {
            ptype: ptype as u8,
            ..PacketHeader::default()
        }
    }

    /// The decoded packet type, if the type byte is one we know.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.ptype)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.ptype;
        buf[1] = self.param1;
        buf[2] = self.param2;
        buf[3] = self.param3;
        BigEndian::write_u16(&mut buf[4..6], self.size);
        BigEndian::write_u32(&mut buf[8..12], self.timestamp_sec);
        BigEndian::write_u32(&mut buf[12..16], self.timestamp_nsec);
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> PacketHeader {
        PacketHeader {
            ptype: buf[0],
            param1: buf[1],
            param2: buf[2],
            param3: buf[3],
            size: BigEndian::read_u16(&buf[4..6]),
            timestamp_sec: BigEndian::read_u32(&buf[8..12]),
            timestamp_nsec: BigEndian::read_u32(&buf[12..16]),
        }
    }
}

/// Receive outcomes. `Interrupted` is not an error in the usual sense: it
/// reports that the read was interrupted (or timed out) before any header
/// byte arrived, so the caller can run its between-packets work and try
/// again.
#[derive(Debug, Error)]
pub enum RecvError {
    #[error("connection closed")]
    Eof,
    #[error("read interrupted before a frame began")]
    Interrupted,
    #[error("wire i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// A (seconds, nanoseconds) reading of a process-wide monotonic clock,
/// suitable for the header timestamp fields.
pub fn monotonic_timestamp() -> (u32, u32) {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let elapsed = ANCHOR.get_or_init(Instant::now).elapsed();
    (elapsed.as_secs() as u32, elapsed.subsec_nanos())
}

/// Serialise the header and exactly `header.size` payload bytes.
/// Any short write or I/O error fails the whole send.
pub fn send_packet<W: Write>(
    writer: &mut W,
    header: &PacketHeader,
    payload: Option<&[u8]>,
) -> io::Result<()> {
    debug_assert_eq!(
        header.size as usize,
        payload.map_or(0, <[u8]>::len),
        "header size must match payload length"
    );
    writer.write_all(&header.to_bytes())?;
    if header.size > 0 {
        if let Some(data) = payload {
            writer.write_all(&data[..header.size as usize])?;
        }
    }
    writer.flush()
}

/// Read one packet. Returns `Eof` if the stream ended cleanly before any
/// header byte, `Interrupted` if the read was interrupted or timed out
/// before any header byte, and `Io` for everything else (including a stream
/// that ends mid-frame). Once a frame has begun it is read to completion
/// through any number of timeouts.
pub fn recv_packet<R: Read>(reader: &mut R) -> Result<(PacketHeader, Option<Vec<u8>>), RecvError> {
    let mut buf = [0u8; HEADER_SIZE];
    read_frame(reader, &mut buf, true)?;
    let header = PacketHeader::from_bytes(&buf);

    let payload = if header.size > 0 {
        let mut data = vec![0u8; header.size as usize];
        read_frame(reader, &mut data, false)?;
        Some(data)
    } else {
        None
    };
    Ok((header, payload))
}

/// Fill `buf` completely. `at_boundary` is true only for the start of the
/// header: that is the one point where EOF and interruption are reportable
/// as such rather than as frame corruption.
fn read_frame<R: Read>(reader: &mut R, buf: &mut [u8], at_boundary: bool) -> Result<(), RecvError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(if filled == 0 && at_boundary {
                    RecvError::Eof
                } else {
                    RecvError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended mid-frame",
                    ))
                });
            }
            Ok(n) => filled += n,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                ) =>
            {
                if filled == 0 && at_boundary {
                    return Err(RecvError::Interrupted);
                }
                // A frame has begun; abandoning it now would desynchronise
                // the stream. Keep reading.
            }
            Err(err) => return Err(RecvError::Io(err)),
        }
    }
    Ok(())
}
