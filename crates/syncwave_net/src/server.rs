//! Stream Server - TCP accept loop, client registry, and PCM broadcast
//!
//! One accept thread plus one handler thread per connected client, matching
//! the "parallel OS threads, not cooperative tasks" concurrency model: this
//! is not built on an async runtime.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use syncwave_dsp::PcmFrame;
use tracing::{debug, info, warn};

use crate::discovery::Advertisement;
use crate::error::{NetError, NetResult};
use crate::protocol::{encode_audio_packet, ControlMessage, DecodedItem, FrameDecoder};

const DEFAULT_PORT: u16 = 5555;
const LISTEN_BACKLOG_HINT: &str = "10"; // informational; std's TcpListener has no backlog knob

/// Configuration for starting a [`StreamServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub display_name: String,
    pub advertise: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            display_name: "SyncWave Server".to_string(),
            advertise: true,
        }
    }
}

/// A point-in-time view of one connected client, for UI/diagnostics.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub remote_address: SocketAddr,
    pub connected_at_epoch_s: f64,
    pub display_name: String,
    pub metadata: serde_json::Value,
}

struct ClientEntry {
    id: u64,
    remote_address: SocketAddr,
    connected_at_epoch_s: f64,
    display_name: Mutex<String>,
    metadata: Mutex<serde_json::Value>,
    writer: Mutex<TcpStream>,
}

/// Accepts TCP clients and fans out PCM packets to all of them.
pub struct StreamServer {
    port: u16,
    clients: Arc<Mutex<Vec<Arc<ClientEntry>>>>,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    advertisement: Option<Advertisement>,
    next_client_id: Arc<AtomicU64>,
}

impl StreamServer {
    /// Whether the accept loop is still active (false once [`StreamServer::stop`]
    /// has run). Used by [`crate::broadcast::BroadcastTap`] so a borrowing
    /// engine can tell a stopped server apart from a live one.
    pub fn is_alive(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl StreamServer {
    pub fn start(config: ServerConfig) -> NetResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).map_err(|source| {
            NetError::BindError {
                port: config.port,
                source,
            }
        })?;
        let bound_port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(config.port);

        let clients: Arc<Mutex<Vec<Arc<ClientEntry>>>> = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let next_client_id = Arc::new(AtomicU64::new(1));

        let advertisement = if config.advertise {
            match Advertisement::start(&config.display_name, bound_port) {
                Ok(ad) => Some(ad),
                Err(e) => {
                    warn!("mDNS advertisement failed, continuing unadvertised: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let accept_clients = Arc::clone(&clients);
        let accept_running = Arc::clone(&running);
        let accept_ids = Arc::clone(&next_client_id);
        let display_name = config.display_name.clone();

        listener
            .set_nonblocking(true)
            .map_err(NetError::AcceptError)?;

        let accept_thread = thread::Builder::new()
            .name("syncwave-accept".into())
            .spawn(move || {
                info!("Stream server listening on port {}", bound_port);
                while accept_running.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, addr)) => {
                            Self::spawn_client_handler(
                                stream,
                                addr,
                                Arc::clone(&accept_clients),
                                Arc::clone(&accept_running),
                                Arc::clone(&accept_ids),
                                display_name.clone(),
                            );
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(20));
                        }
                        Err(e) => {
                            if accept_running.load(Ordering::SeqCst) {
                                warn!("Accept error: {}", e);
                            }
                        }
                    }
                }
                debug!("Accept thread exiting");
            })
            .map_err(|e| NetError::AcceptError(std::io::Error::other(e.to_string())))?;

        let _ = LISTEN_BACKLOG_HINT;

        Ok(Self {
            port: bound_port,
            clients,
            running,
            accept_thread: Some(accept_thread),
            advertisement,
            next_client_id,
        })
    }

    fn spawn_client_handler(
        stream: TcpStream,
        addr: SocketAddr,
        clients: Arc<Mutex<Vec<Arc<ClientEntry>>>>,
        running: Arc<AtomicBool>,
        next_client_id: Arc<AtomicU64>,
        display_name: String,
    ) {
        let id = next_client_id.fetch_add(1, Ordering::SeqCst);
        let connected_at_epoch_s = epoch_now();

        let writer_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to clone client socket: {}", e);
                return;
            }
        };

        let entry = Arc::new(ClientEntry {
            id,
            remote_address: addr,
            connected_at_epoch_s,
            display_name: Mutex::new(addr.to_string()),
            metadata: Mutex::new(serde_json::Value::Null),
            writer: Mutex::new(writer_stream),
        });

        {
            let welcome = ControlMessage::Welcome {
                message: format!("Welcome to {display_name}"),
                server_time: epoch_now(),
            };
            if let Ok(wire) = welcome.to_wire() {
                let _ = entry.writer.lock().write_all(&wire);
            }
        }

        clients.lock().push(Arc::clone(&entry));
        info!("Client {} connected from {}", id, addr);

        thread::Builder::new()
            .name(format!("syncwave-client-{id}"))
            .spawn(move || Self::client_handler_loop(stream, entry, clients, running))
            .ok();
    }

    fn client_handler_loop(
        mut stream: TcpStream,
        entry: Arc<ClientEntry>,
        clients: Arc<Mutex<Vec<Arc<ClientEntry>>>>,
        running: Arc<AtomicBool>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];

        while running.load(Ordering::SeqCst) {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    decoder.feed(&buf[..n]);
                    for item in decoder.drain() {
                        if let DecodedItem::Control(message) = item {
                            Self::handle_client_message(&entry, message);
                        }
                        // Clients are not expected to send audio; stray binary
                        // frames are silently dropped rather than rejected.
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        }

        clients.lock().retain(|c| c.id != entry.id);
        info!("Client {} disconnected", entry.id);
    }

    fn handle_client_message(entry: &Arc<ClientEntry>, message: ControlMessage) {
        match message {
            ControlMessage::Ping => {
                let pong = ControlMessage::Pong {
                    time: epoch_now(),
                };
                if let Ok(wire) = pong.to_wire() {
                    let _ = entry.writer.lock().write_all(&wire);
                }
            }
            ControlMessage::SetName { name } => {
                *entry.display_name.lock() = name;
            }
            ControlMessage::Status { data } => {
                merge_metadata(&mut entry.metadata.lock(), data);
            }
            ControlMessage::Welcome { .. } | ControlMessage::Pong { .. } => {
                // Server never expects these from a client; ignore.
            }
        }
    }

    /// Broadcast one PCM block to every connected client.
    ///
    /// Best-effort: a client whose write fails is dropped. The client-list
    /// lock is only held to take a cheap snapshot; the writes themselves
    /// happen outside it so one slow client can't stall the others from being
    /// observed, though it can still stall the fan-out worker that called this.
    pub fn broadcast_audio(&self, frame: &PcmFrame) {
        let packet = encode_audio_packet(frame);
        let snapshot: Vec<Arc<ClientEntry>> = self.clients.lock().clone();

        let mut dead = Vec::new();
        for client in &snapshot {
            if client.writer.lock().write_all(&packet).is_err() {
                dead.push(client.id);
            }
        }

        if !dead.is_empty() {
            self.clients.lock().retain(|c| !dead.contains(&c.id));
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn list_clients(&self) -> Vec<ClientInfo> {
        self.clients
            .lock()
            .iter()
            .map(|c| ClientInfo {
                remote_address: c.remote_address,
                connected_at_epoch_s: c.connected_at_epoch_s,
                display_name: c.display_name.lock().clone(),
                metadata: c.metadata.lock().clone(),
            })
            .collect()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        if let Some(ad) = self.advertisement.take() {
            let _ = ad.stop();
        }
        self.clients.lock().clear();
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Merge a client's `status{data}` payload into its stored metadata.
///
/// Object-valued updates merge key by key so a client can report one field
/// (e.g. `{"volume": 80}`) without clobbering others it reported earlier;
/// anything else (including a non-object `data`) replaces the metadata
/// outright.
fn merge_metadata(existing: &mut serde_json::Value, incoming: serde_json::Value) {
    match (existing.as_object_mut(), incoming) {
        (Some(existing_map), serde_json::Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                existing_map.insert(key, value);
            }
        }
        (_, incoming) => *existing = incoming,
    }
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::io::BufReader;
    use std::net::TcpStream as StdTcpStream;

    fn connect(port: u16) -> StdTcpStream {
        for _ in 0..50 {
            if let Ok(s) = StdTcpStream::connect(("127.0.0.1", port)) {
                return s;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("could not connect to test server");
    }

    #[test]
    fn test_server_accepts_clients_and_sends_welcome() {
        let server = StreamServer::start(ServerConfig {
            port: 0,
            display_name: "Test".into(),
            advertise: false,
        })
        .unwrap();

        let stream = connect(server.port());
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("\"type\":\"welcome\""));
    }

    #[test]
    fn test_broadcast_reaches_two_clients_byte_identical() {
        let server = StreamServer::start(ServerConfig {
            port: 0,
            display_name: "Test".into(),
            advertise: false,
        })
        .unwrap();

        let s1 = connect(server.port());
        let s2 = connect(server.port());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.client_count(), 2);

        // Drain welcome messages.
        let mut r1 = BufReader::new(s1);
        let mut r2 = BufReader::new(s2);
        let mut discard = String::new();
        r1.read_line(&mut discard).unwrap();
        r2.read_line(&mut discard).unwrap();

        let frame = PcmFrame::new(vec![1, 2, 3, 4], 2, 44_100);
        server.broadcast_audio(&frame);

        let expected = encode_audio_packet(&frame);

        let mut buf1 = vec![0u8; expected.len()];
        r1.read_exact(&mut buf1).unwrap();
        let mut buf2 = vec![0u8; expected.len()];
        r2.read_exact(&mut buf2).unwrap();

        assert_eq!(buf1, expected);
        assert_eq!(buf2, expected);
    }

    #[test]
    fn test_status_message_merges_into_client_metadata() {
        let server = StreamServer::start(ServerConfig {
            port: 0,
            display_name: "Test".into(),
            advertise: false,
        })
        .unwrap();

        let mut stream = connect(server.port());
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut discard = String::new();
        reader.read_line(&mut discard).unwrap(); // welcome

        let status = ControlMessage::Status {
            data: serde_json::json!({"volume": 80, "muted": false}),
        };
        stream.write_all(&status.to_wire().unwrap()).unwrap();
        thread::sleep(Duration::from_millis(100));

        let clients = server.list_clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].metadata["volume"], 80);
        assert_eq!(clients[0].metadata["muted"], false);

        let follow_up = ControlMessage::Status {
            data: serde_json::json!({"volume": 55}),
        };
        stream.write_all(&follow_up.to_wire().unwrap()).unwrap();
        thread::sleep(Duration::from_millis(100));

        let clients = server.list_clients();
        assert_eq!(clients[0].metadata["volume"], 55);
        assert_eq!(clients[0].metadata["muted"], false);
    }

    #[test]
    fn test_client_disconnect_cleans_up() {
        let server = StreamServer::start(ServerConfig {
            port: 0,
            display_name: "Test".into(),
            advertise: false,
        })
        .unwrap();

        let s1 = connect(server.port());
        let s2 = connect(server.port());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.client_count(), 2);

        drop(s1);
        thread::sleep(Duration::from_millis(150));

        let frame = PcmFrame::new(vec![0; 4], 2, 44_100);
        server.broadcast_audio(&frame);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(server.client_count(), 1);
        drop(s2);
    }
}
