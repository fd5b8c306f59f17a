//! The concrete Unix-domain-socket implementation of `nsm_core`'s
//! [`ClientTransport`] seam (§1 "the IPC/RPC transport ... is deliberately
//! out of scope"; this crate supplies one so the daemon is runnable).
//!
//! One OS thread per connection reads length-prefixed requests and drives
//! the shared [`RequestSurface`]; the same connection's write half is
//! registered under the client's id so the dispatcher can push unsolicited
//! notifications back to it later. This mirrors the teacher's
//! `Connection`/read-write-buffer shape (`kimberlite_server::connection`)
//! without pulling in `mio`, since the daemon's connection count and message
//! rate do not need a poll-based event loop.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;

use nsm_core::{ClientId, ClientTransport, RequestSurface, ShutdownKind};

use crate::error::DaemonError;
use crate::protocol::{self, Reply, Request};

/// Tracks the write half of each registered client's connection so that
/// [`ClientTransport::send_notification`] can reach it. Populated as clients
/// register over a connection; entries are removed when that connection
/// closes.
#[derive(Default)]
pub struct UnixSocketTransport {
    connections: Mutex<HashMap<ClientId, Arc<Mutex<UnixStream>>>>,
}

impl UnixSocketTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(UnixSocketTransport::default())
    }

    fn bind(&self, client: ClientId, stream: &UnixStream) -> std::io::Result<()> {
        let handle = Arc::new(Mutex::new(stream.try_clone()?));
        self.connections.lock().unwrap().insert(client, handle);
        Ok(())
    }

    fn unbind(&self, client: ClientId) {
        self.connections.lock().unwrap().remove(&client);
    }

    fn unbind_all(&self, clients: &[ClientId]) {
        let mut map = self.connections.lock().unwrap();
        for client in clients {
            map.remove(client);
        }
    }
}

impl ClientTransport for UnixSocketTransport {
    fn send_notification(&self, client: ClientId, kind: ShutdownKind) {
        let Some(handle) = self.connections.lock().unwrap().get(&client).cloned() else {
            tracing::debug!(client = %client, "no live connection for notification; dropping");
            return;
        };
        let mut frame = BytesMut::new();
        protocol::encode_reply(Reply::Notify(kind), &mut frame);
        let mut stream = handle.lock().unwrap();
        if let Err(err) = stream.write_all(&frame) {
            tracing::warn!(client = %client, %err, "failed to deliver notification");
        }
    }
}

/// Binds the listening socket, removing any stale socket file left behind
/// by a previous, uncleanly-terminated run.
pub fn bind(path: &Path) -> Result<UnixListener, DaemonError> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| DaemonError::BindFailed {
            path: path.to_path_buf(),
            source,
        })?;
    }
    UnixListener::bind(path).map_err(|source| DaemonError::BindFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Accepts connections until `shutdown` is observed. Polls rather than
/// blocking indefinitely in `accept()` so the signal-driven shutdown flag is
/// noticed promptly (§9 "wakes the main wait").
pub fn accept_loop(
    listener: &UnixListener,
    surface: Arc<RequestSurface>,
    transport: Arc<UnixSocketTransport>,
    shutdown: &Arc<AtomicBool>,
) -> Result<(), DaemonError> {
    listener.set_nonblocking(true)?;
    let mut handles = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let surface = Arc::clone(&surface);
                let transport = Arc::clone(&transport);
                let shutdown = Arc::clone(shutdown);
                handles.push(std::thread::spawn(move || {
                    serve_connection(stream, &surface, &transport, &shutdown);
                }));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => return Err(DaemonError::Io(err)),
        }
    }

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn serve_connection(
    mut stream: UnixStream,
    surface: &RequestSurface,
    transport: &UnixSocketTransport,
    shutdown: &AtomicBool,
) {
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut scratch = [0u8; 4096];
    let mut owned_clients: Vec<ClientId> = Vec::new();
    let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match stream.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => read_buf.extend_from_slice(&scratch[..n]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(_) => break,
        }

        loop {
            match protocol::decode_request(&mut read_buf) {
                Ok(Some(request)) => {
                    if let Request::RegisterClient { client_id, .. } = request {
                        if stream.try_clone().is_ok() {
                            owned_clients.push(client_id);
                        }
                    }
                    let reply = handle_request(request, surface, transport, &stream, &mut owned_clients);
                    let mut frame = BytesMut::new();
                    protocol::encode_reply(reply, &mut frame);
                    if stream.write_all(&frame).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(%err, "malformed request frame; closing connection");
                    let mut frame = BytesMut::new();
                    protocol::encode_reply(Reply::Status(nsm_core::ErrorStatus::Parameter), &mut frame);
                    let _ = stream.write_all(&frame);
                    transport.unbind_all(&owned_clients);
                    return;
                }
            }
        }
    }

    transport.unbind_all(&owned_clients);
}

fn handle_request(
    request: Request,
    surface: &RequestSurface,
    transport: &UnixSocketTransport,
    stream: &UnixStream,
    owned_clients: &mut Vec<ClientId>,
) -> Reply {
    match request {
        Request::SetNodeState { state } => match decode_node_state(state) {
            Some(state) => Reply::Status(surface.set_node_state(state)),
            None => Reply::Status(nsm_core::ErrorStatus::Parameter),
        },
        Request::RegisterClient { client_id, kinds, timeout_ms } => {
            let status =
                surface.register_lifecycle_client(client_id, ShutdownKind::from_bits(kinds), timeout_ms);
            if matches!(status, nsm_core::ErrorStatus::Ok | nsm_core::ErrorStatus::Last) {
                if let Err(err) = transport.bind(client_id, stream) {
                    tracing::warn!(client = %client_id, %err, "failed to bind notification channel");
                } else if !owned_clients.contains(&client_id) {
                    owned_clients.push(client_id);
                }
            }
            Reply::Status(status)
        }
        Request::UnregisterClient { client_id, kinds } => {
            let status = surface.unregister_lifecycle_client(client_id, ShutdownKind::from_bits(kinds));
            Reply::Status(status)
        }
        Request::Acknowledge { client_id } => {
            Reply::Status(surface.acknowledge_lifecycle_request(client_id))
        }
        Request::QueryNodeState => Reply::NodeState(surface.query_node_state()),
        Request::SetExternalBlocked { blocked } => {
            Reply::Status(surface.set_external_node_state_blocked(blocked))
        }
    }
}

fn decode_node_state(raw: u8) -> Option<nsm_core::NodeState> {
    use nsm_core::NodeState::*;
    Some(match raw {
        0 => NotSet,
        1 => StartUp,
        2 => BaseRunning,
        3 => LucRunning,
        4 => FullyRunning,
        5 => FullyOperational,
        6 => ShuttingDown,
        7 => ShutdownDelay,
        8 => FastShutdown,
        9 => DegradedPower,
        10 => Shutdown,
        11 => Resume,
        _ => return None,
    })
}

#[cfg(test)]
fn ephemeral_socket_path(dir: &Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.sock"))
}
