//! Cache server
//!
//! Owns the TCP data listener and the UDP discovery socket, spawns one
//! thread per accepted connection, and polls the shutdown flag so both
//! loops drain cooperatively.

mod connection;
mod discovery;

use crate::config::Config;
use crate::shutdown::ShutdownFlag;
use crate::storage::Database;
use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often the accept loop wakes to poll the shutdown flag.
const ACCEPT_TICK: Duration = Duration::from_millis(200);

/// The std equivalents of a timed-out socket deadline.
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// The cache server with its listeners bound.
pub struct CacheServer {
    listener: TcpListener,
    udp: UdpSocket,
    database: Arc<dyn Database>,
    shutdown: ShutdownFlag,
    broadcast: bool,
    info_port: u16,
}

impl CacheServer {
    /// Bind both listeners. A bind failure here is startup-fatal; nothing
    /// has been served yet.
    pub fn bind(
        config: &Config,
        database: Arc<dyn Database>,
        shutdown: ShutdownFlag,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.server.data_port))?;
        listener.set_nonblocking(true)?;
        log::info!("listening for connections on {}", listener.local_addr()?);

        let udp = UdpSocket::bind(("0.0.0.0", config.server.broadcast_port))?;
        log::info!("listening for broadcasts on {}", udp.local_addr()?);

        Ok(Self {
            listener,
            udp,
            database,
            shutdown,
            broadcast: config.server.broadcast,
            info_port: config.server.info_port,
        })
    }

    /// Address of the TCP data listener.
    pub fn data_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address of the UDP discovery socket.
    pub fn discovery_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Serve until the shutdown flag flips.
    ///
    /// Each accepted connection runs on its own thread and handles its
    /// requests strictly in order; connections are fully independent of
    /// each other. Returns once the accept loop has drained; connection
    /// threads wind down on their own polling ticks.
    pub fn run(self) -> io::Result<()> {
        let discovery = if self.broadcast {
            let socket = self.udp.try_clone()?;
            let shutdown = self.shutdown.clone();
            let info_port = self.info_port;
            Some(thread::spawn(move || {
                discovery::respond_to_broadcasts(socket, info_port, shutdown)
            }))
        } else {
            None
        };

        while self.shutdown.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let database = Arc::clone(&self.database);
                    let shutdown = self.shutdown.clone();
                    thread::spawn(move || connection::serve(stream, peer, database, shutdown));
                }
                Err(e) if is_timeout(&e) => {
                    thread::sleep(ACCEPT_TICK);
                }
                Err(e) => {
                    log::error!("accept error: {}", e);
                    thread::sleep(ACCEPT_TICK);
                }
            }
        }

        log::info!("shutting down listeners");
        if let Some(handle) = discovery {
            let _ = handle.join();
        }
        Ok(())
    }
}
