//! Binary control-wire codec.
//!
//! Every request/response on the wire starts with a fixed 10-byte header
//! `{cmd: u8, status: u8, pkg_len: u64 BE}` followed by `pkg_len` bytes of
//! body. This module only encodes/decodes bytes; it never touches a
//! socket (see `tracker-core`'s callers for the I/O side).

use crate::{GROUP_NAME_MAX_LEN, IP_PORT_SIZE, STORAGE_ID_MAX_SIZE, TRUNK_RECORD_SIZE};

pub const HEADER_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    GetTrackerStatus = 0x01,
    NotifyNextLeader = 0x02,
    CommitNextLeader = 0x03,
    PingLeader = 0x04,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::GetTrackerStatus),
            0x02 => Some(Self::NotifyNextLeader),
            0x03 => Some(Self::CommitNextLeader),
            0x04 => Some(Self::PingLeader),
            _ => None,
        }
    }
}

/// Wire-level status codes. `Accepted` is the only "success" value; every
/// other value is surfaced to callers as `TransportError::ProtocolRejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Accepted = 0x00,
    Rejected = 0x01,
    /// The peer doesn't recognize the requested resource (e.g. a status
    /// query for a tracker it has no record of yet). Distinguished from
    /// `Rejected` because callers treat it as "skip, don't abort".
    NotFound = 0x02,
}

impl Status {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Accepted),
            0x01 => Some(Self::Rejected),
            0x02 => Some(Self::NotFound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub cmd: u8,
    pub status: u8,
    pub pkg_len: u64,
}

impl Header {
    pub fn new(cmd: Command, status: Status, pkg_len: u64) -> Self {
        Self {
            cmd: cmd as u8,
            status: status as u8,
            pkg_len,
        }
    }

    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.cmd;
        buf[1] = self.status;
        buf[2..10].copy_from_slice(&self.pkg_len.to_be_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            cmd: data[0],
            status: data[1],
            pkg_len: u64::from_be_bytes(data[2..10].try_into().ok()?),
        })
    }

    pub fn is_accepted(&self) -> bool {
        self.status == Status::Accepted as u8
    }
}

// -- GET_TRACKER_STATUS response body (7 bytes) --

#[derive(Debug, Clone, Copy)]
pub struct TrackerStatusBody {
    pub if_leader: bool,
    pub running_time: i32,
    pub restart_interval: i32,
}

impl TrackerStatusBody {
    pub const SIZE: usize = 9;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.if_leader as u8;
        buf[1..5].copy_from_slice(&self.running_time.to_be_bytes());
        buf[5..9].copy_from_slice(&self.restart_interval.to_be_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            if_leader: data[0] != 0,
            running_time: i32::from_be_bytes(data[1..5].try_into().ok()?),
            restart_interval: i32::from_be_bytes(data[5..9].try_into().ok()?),
        })
    }
}

// -- NOTIFY_NEXT_LEADER / COMMIT_NEXT_LEADER request body --

/// `"ip:port"` ASCII, null-padded to `IP_PORT_SIZE`.
pub fn encode_ip_port(ip: &str, port: u16) -> [u8; IP_PORT_SIZE] {
    let mut buf = [0u8; IP_PORT_SIZE];
    let text = format!("{}:{}", ip, port);
    let bytes = text.as_bytes();
    let n = bytes.len().min(IP_PORT_SIZE);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

pub fn decode_ip_port(data: &[u8]) -> Option<(String, u16)> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let text = std::str::from_utf8(&data[..end]).ok()?;
    let (ip, port) = text.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((ip.to_string(), port))
}

// -- PING_LEADER response records --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrunkRecord {
    pub group_name: String,
    pub trunk_server_id: String,
}

impl TrunkRecord {
    pub fn serialize(&self) -> [u8; TRUNK_RECORD_SIZE] {
        let mut buf = [0u8; TRUNK_RECORD_SIZE];
        let name = self.group_name.as_bytes();
        let n = name.len().min(GROUP_NAME_MAX_LEN);
        buf[..n].copy_from_slice(&name[..n]);

        let id = self.trunk_server_id.as_bytes();
        let m = id.len().min(STORAGE_ID_MAX_SIZE);
        buf[GROUP_NAME_MAX_LEN..GROUP_NAME_MAX_LEN + m].copy_from_slice(&id[..m]);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < TRUNK_RECORD_SIZE {
            return None;
        }
        let group_name = decode_padded(&data[..GROUP_NAME_MAX_LEN]);
        let trunk_server_id = decode_padded(&data[GROUP_NAME_MAX_LEN..TRUNK_RECORD_SIZE]);
        Some(Self {
            group_name,
            trunk_server_id,
        })
    }
}

fn decode_padded(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

/// Parse a `PING_LEADER` response body into zero or more trunk records.
/// Returns `None` if the body length is not a multiple of
/// `TRUNK_RECORD_SIZE` (the caller maps that to
/// `TransportError::ProtocolMalformed`).
pub fn decode_trunk_records(body: &[u8]) -> Option<Vec<TrunkRecord>> {
    if body.len() % TRUNK_RECORD_SIZE != 0 {
        return None;
    }
    let mut records = Vec::with_capacity(body.len() / TRUNK_RECORD_SIZE);
    for chunk in body.chunks_exact(TRUNK_RECORD_SIZE) {
        records.push(TrunkRecord::deserialize(chunk)?);
    }
    Some(records)
}

pub fn encode_trunk_records(records: &[TrunkRecord]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * TRUNK_RECORD_SIZE);
    for r in records {
        buf.extend_from_slice(&r.serialize());
    }
    buf
}
