//! TCP command channel.
//!
//! A one-shot text protocol for driving the control loop remotely. Each
//! accepted connection is read once, matched by prefix, answered once, and
//! closed; connections are handled one at a time on the accept thread.
//!
//! | Request prefix | Action         | Reply          |
//! |----------------|----------------|----------------|
//! | `START`        | start the loop | `OK`           |
//! | `STOP`         | stop the loop  | `OK`           |
//! | `STATUS`       | none           | `STATE?`       |
//! | anything else  | none           | `ERR:unknown`  |
//!
//! The control loop's own operations are the synchronization boundary, so
//! dispatching from the accept thread while the worker runs is safe.

use crate::control::ControlLoop;
use crate::error::SpindleResult;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Single receive buffer per connection; longer requests are truncated.
const RECV_BUFFER_SIZE: usize = 1024;

/// The network-facing command relay.
///
/// Binding spawns the accept thread; dropping the server shuts it down.
pub struct CommandServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CommandServer {
    /// Bind the listener and start accepting commands for `control`.
    ///
    /// Transport setup failure (bind) is fatal and surfaced to the caller;
    /// per-connection failures later are logged and skipped.
    pub fn bind(addr: impl ToSocketAddrs, control: Arc<ControlLoop>) -> SpindleResult<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("spindle-command".into())
            .spawn(move || accept_loop(listener, control, accept_shutdown))?;

        Ok(Self {
            local_addr,
            shutdown,
            accept_thread: Mutex::new(Some(handle)),
        })
    }

    /// Address the server is listening on. Useful when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and join the accept thread. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Wake the blocked accept call; the flag check discards the poke.
        let mut poke_addr = self.local_addr;
        if poke_addr.ip().is_unspecified() {
            poke_addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        let _ = TcpStream::connect_timeout(&poke_addr, Duration::from_millis(200));

        if let Some(handle) = self
            .accept_thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept connections until shutdown, handling each one synchronously.
fn accept_loop(listener: TcpListener, control: Arc<ControlLoop>, shutdown: Arc<AtomicBool>) {
    loop {
        let (mut stream, peer) = match listener.accept() {
            Ok(connection) => connection,
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                warn!("accept failed: {e}");
                continue;
            }
        };
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        debug!(%peer, "command connection");
        handle_connection(&mut stream, &control);
        // Dropping the stream closes the connection.
    }
    debug!("command channel closed");
}

/// One-shot exchange: single read, single reply.
fn handle_connection(stream: &mut TcpStream, control: &ControlLoop) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let received = match stream.read(&mut buf) {
        Ok(0) => {
            debug!("peer closed without sending");
            return;
        }
        Ok(received) => received,
        Err(e) => {
            warn!("command read failed: {e}");
            return;
        }
    };

    let reply = dispatch(&buf[..received], control);
    if let Err(e) = stream.write_all(reply.as_bytes()) {
        warn!("command reply failed: {e}");
    }
}

/// Map a raw request to exactly one control operation and its reply.
fn dispatch(request: &[u8], control: &ControlLoop) -> &'static str {
    if request.starts_with(b"START") {
        control.start();
        "OK\n"
    } else if request.starts_with(b"STOP") {
        control.stop();
        "OK\n"
    } else if request.starts_with(b"STATUS") {
        // State is not reported synchronously; the status stream carries it.
        "STATE?\n"
    } else {
        debug!(
            request = %String::from_utf8_lossy(request).trim_end(),
            "unknown command"
        );
        "ERR:unknown\n"
    }
}
