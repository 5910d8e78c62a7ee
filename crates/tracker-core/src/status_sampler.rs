//! Contacts a single peer tracker once and returns its self-reported
//! running status. Opens a fresh connection per call; the caller never
//! manages the socket.

use std::time::Duration;

use tracker_protocol::error::TransportError;
use tracker_protocol::wire::{Command, Header, Status, TrackerStatusBody};

use crate::net;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub network: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RunningStatus {
    pub if_leader: bool,
    pub running_time: i64,
    pub restart_interval: i64,
}

#[derive(Debug)]
pub enum SampleError {
    /// The peer is unreachable or has no opinion yet — skip it, don't
    /// abort the election round.
    NotFound,
    Transport(TransportError),
}

impl From<TransportError> for SampleError {
    fn from(e: TransportError) -> Self {
        SampleError::Transport(e)
    }
}

pub async fn sample(ip: &str, port: u16, timeouts: Timeouts) -> Result<RunningStatus, SampleError> {
    let mut stream = net::connect(ip, port, timeouts.connect).await?;

    let header = Header::new(Command::GetTrackerStatus, Status::Accepted, 0);
    net::write_frame(&mut stream, header, &[], timeouts.network).await?;

    let (reply_header, body) = net::read_frame(&mut stream, timeouts.network).await?;

    match Status::from_u8(reply_header.status) {
        Some(Status::Accepted) => {}
        Some(Status::NotFound) => return Err(SampleError::NotFound),
        Some(Status::Rejected) | None => {
            return Err(SampleError::Transport(TransportError::ProtocolRejected))
        }
    }

    let parsed = TrackerStatusBody::deserialize(&body)
        .ok_or(SampleError::Transport(TransportError::ProtocolMalformed))?;

    Ok(RunningStatus {
        if_leader: parsed.if_leader,
        running_time: parsed.running_time as i64,
        restart_interval: parsed.restart_interval as i64,
    })
}
