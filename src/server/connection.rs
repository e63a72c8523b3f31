//! Per-connection protocol state machine
//!
//! Each accepted connection validates the handshake, opens one storage
//! session, and serves upload/download requests in order until the peer
//! goes away, the idle deadline passes, an error occurs, or shutdown is
//! requested. All socket I/O runs under short rolling deadlines; timeouts
//! inside a request are retried, timeouts between requests are the polling
//! ticks that keep idle tracking and shutdown responsive.

use super::is_timeout;
use crate::protocol::{self, RequestHeader, HEADER_SIZE, MAX_BLOB_SIZE};
use crate::shutdown::ShutdownFlag;
use crate::storage::{Database, Session};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Rolling deadline for reads and writes inside a single request.
const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Overall deadline for the handshake after connect.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection that completes no request header within this window is
/// dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Initial capacity of the per-connection transfer buffer (10 MiB).
const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Serve one connection to completion. Never panics the caller; every
/// outcome is logged here.
pub(super) fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    database: Arc<dyn Database>,
    shutdown: ShutdownFlag,
) {
    // The listener is non-blocking for its polling tick; the per-stream
    // deadlines below need a blocking socket.
    if let Err(e) = stream.set_nonblocking(false) {
        log::warn!("failed to configure socket for {}: {}", peer, e);
        return;
    }

    match handle_client(stream, peer, database, shutdown) {
        Ok(()) => log::info!("closing connection to {}", peer),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            log::info!("{} disconnected", peer)
        }
        Err(e) => log::warn!("closing connection to {}: {}", peer, e),
    }
}

fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    database: Arc<dyn Database>,
    shutdown: ShutdownFlag,
) -> io::Result<()> {
    if !read_handshake(&mut stream)? {
        log::warn!("could not validate protocol used by {}", peer);
        return Ok(());
    }
    log::info!("connection established to {}", peer);

    let mut session = database.open().map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("failed to open storage session: {}", e),
        )
    })?;

    // The session drops on every exit path below, releasing its backend
    // resources exactly once.
    serve_requests(&mut stream, session.as_mut(), &shutdown)
}

/// Read and validate the magic header. `Ok(false)` means the peer sent
/// something else or went silent; the connection is dropped either way.
fn read_handshake(stream: &mut TcpStream) -> io::Result<bool> {
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut buf = vec![0u8; protocol::HANDSHAKE_LEN];
    let mut read = 0;

    while read < buf.len() {
        match stream.read(&mut buf[read..]) {
            Ok(0) => return Ok(false),
            Ok(n) => read += n,
            Err(e) if is_timeout(&e) => {
                if Instant::now() >= deadline {
                    return Ok(false);
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(protocol::is_valid_handshake(&buf))
}

fn serve_requests(
    stream: &mut TcpStream,
    session: &mut dyn Session,
    shutdown: &ShutdownFlag,
) -> io::Result<()> {
    let mut buffer: Vec<u8> = Vec::with_capacity(DEFAULT_BUFFER_SIZE);

    while shutdown.is_running() {
        let header = match read_request_header(stream, shutdown)? {
            Some(header) => header,
            // Shutdown observed or idle deadline passed.
            None => break,
        };

        if header.size > 0 {
            upload(stream, session, &mut buffer, header)?;
        } else {
            download(stream, session, &mut buffer, header)?;
        }
    }

    Ok(())
}

/// Wait for the next request header. One-second read timeouts act as the
/// polling tick: each tick re-checks the shutdown flag, and a connection
/// with no header bytes at all for the whole idle window is given up on.
fn read_request_header(
    stream: &mut TcpStream,
    shutdown: &ShutdownFlag,
) -> io::Result<Option<RequestHeader>> {
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    let idle_start = Instant::now();
    let mut buf = [0u8; HEADER_SIZE];
    let mut read = 0;

    while read < HEADER_SIZE {
        match stream.read(&mut buf[read..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => read += n,
            Err(e) if is_timeout(&e) => {
                if !shutdown.is_running() {
                    return Ok(None);
                }
                if read == 0 && idle_start.elapsed() >= IDLE_TIMEOUT {
                    log::info!("dropping idle connection");
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Some(RequestHeader::decode(&buf)))
}

/// Receive `header.size` blob bytes and store them under `header.key`.
fn upload(
    stream: &mut TcpStream,
    session: &mut dyn Session,
    buffer: &mut Vec<u8>,
    header: RequestHeader,
) -> io::Result<()> {
    if header.size > MAX_BLOB_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("abnormal file size, {} MB", header.size / 1024 / 1024),
        ));
    }

    let size = header.size as usize;
    protocol::grow(buffer, size);
    buffer.resize(size, 0);
    read_full(stream, &mut buffer[..size])?;

    session
        .store(header.key, &buffer[..size])
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// Look up `header.key` and answer with `(key, result_size)` + payload.
/// A missing key answers with a zero result size and no payload bytes.
fn download(
    stream: &mut TcpStream,
    session: &mut dyn Session,
    buffer: &mut Vec<u8>,
    header: RequestHeader,
) -> io::Result<()> {
    session
        .load(header.key, buffer)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    let response = RequestHeader {
        key: header.key,
        size: buffer.len() as u64,
    };

    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    write_full(stream, &response.encode())?;
    write_full(stream, buffer)
}

/// Read exactly `buf.len()` bytes under the rolling deadline, retrying on
/// timeout until complete. Any other error aborts the connection.
fn read_full(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<()> {
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    let mut read = 0;
    while read < buf.len() {
        match stream.read(&mut buf[read..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => read += n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Write all of `buf` under the rolling deadline, retrying on timeout.
fn write_full(stream: &mut TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
