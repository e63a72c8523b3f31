//! UDP discovery responder
//!
//! Clients that don't know the server's address broadcast the protocol
//! handshake on the broadcast port. Each matching probe is answered from a
//! short-lived thread that dials a fresh socket back to the sender's IP on
//! the info port, so one slow or unreachable peer never stalls discovery
//! for everyone else.

use super::is_timeout;
use crate::protocol;
use crate::shutdown::ShutdownFlag;
use std::io;
use std::net::{IpAddr, UdpSocket};
use std::thread;
use std::time::Duration;

/// Receive timeout; doubles as the shutdown polling tick.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub(super) fn respond_to_broadcasts(socket: UdpSocket, info_port: u16, shutdown: ShutdownFlag) {
    if let Err(e) = socket.set_read_timeout(Some(RECV_TIMEOUT)) {
        log::error!("failed to configure discovery socket: {}", e);
        return;
    }

    let mut buf = [0u8; protocol::HANDSHAKE_LEN];
    while shutdown.is_running() {
        match socket.recv_from(&mut buf) {
            Ok((size, remote)) => {
                if protocol::is_valid_handshake(&buf[..size]) {
                    let ip = remote.ip();
                    thread::spawn(move || {
                        if let Err(e) = send_reply(ip, info_port) {
                            log::warn!("discovery reply to {} failed: {}", ip, e);
                        }
                    });
                } else {
                    log::warn!("{} sent an invalid discovery probe", remote);
                }
            }
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                log::error!("broadcast receive error: {}", e);
                thread::sleep(RECV_TIMEOUT);
            }
        }
    }
}

/// Answer one probe with the handshake on the requester's info port.
fn send_reply(ip: IpAddr, info_port: u16) -> io::Result<()> {
    log::info!("replying to broadcast from {} on port {}", ip, info_port);
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_write_timeout(Some(RECV_TIMEOUT))?;
    socket.send_to(&protocol::handshake_bytes(), (ip, info_port))?;
    Ok(())
}
