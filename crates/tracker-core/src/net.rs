//! Timeout-bounded framed I/O over a `TcpStream`, shared by the status
//! sampler and the election loop. Neither caller owns retry logic here —
//! a single send/receive failure is always surfaced to the caller.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use tracker_protocol::error::TransportError;
use tracker_protocol::wire::{Header, HEADER_SIZE};

pub async fn connect(ip: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream, TransportError> {
    match timeout(connect_timeout, TcpStream::connect((ip, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Err(_) => Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        ))),
    }
}

pub async fn write_frame(
    stream: &mut TcpStream,
    header: Header,
    body: &[u8],
    network_timeout: Duration,
) -> Result<(), TransportError> {
    let send = async {
        stream.write_all(&header.serialize()).await?;
        if !body.is_empty() {
            stream.write_all(body).await?;
        }
        stream.flush().await
    };
    match timeout(network_timeout, send).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Err(_) => Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "send timed out",
        ))),
    }
}

pub async fn read_frame(
    stream: &mut TcpStream,
    network_timeout: Duration,
) -> Result<(Header, Vec<u8>), TransportError> {
    let recv = async {
        let mut header_buf = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header_buf).await?;
        let header = Header::deserialize(&header_buf)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "short header"))?;

        let mut body = vec![0u8; header.pkg_len as usize];
        if !body.is_empty() {
            stream.read_exact(&mut body).await?;
        }
        Ok::<_, std::io::Error>((header, body))
    };
    match timeout(network_timeout, recv).await {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Err(_) => Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "receive timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tracker_protocol::wire::{Command, Status};

    #[tokio::test]
    async fn frame_round_trips_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, body) = read_frame(&mut stream, Duration::from_secs(1)).await.unwrap();
            assert_eq!(body, b"hello");
            write_frame(&mut stream, header, b"world", Duration::from_secs(1))
                .await
                .unwrap();
        });

        let mut client = connect("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
        let header = Header::new(Command::GetTrackerStatus, Status::Accepted, 5);
        write_frame(&mut client, header, b"hello", Duration::from_secs(1))
            .await
            .unwrap();
        let (_reply_header, reply_body) = read_frame(&mut client, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply_body, b"world");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_times_out_against_an_unreachable_address() {
        // TEST-NET-1 (RFC 5737), reserved for documentation/testing and
        // never routable, reliably produces a connect timeout rather
        // than an immediate refusal.
        let result = connect("192.0.2.1", 65535, Duration::from_millis(200)).await;
        assert!(result.is_err());
    }
}
