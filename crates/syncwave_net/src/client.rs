//! Stream Client - connects to a server, decodes the shared control/audio
//! stream, and buffers PCM blocks for a playback worker to consume.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};
use crate::protocol::{ControlMessage, DecodedItem, FrameDecoder};

/// How long [`StreamClient::try_recv_audio`] and friends poll before giving
/// up on an empty queue, mirroring the reference client's busy-poll interval.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub display_name: String,
}

/// Connects to one [`crate::server::StreamServer`] and exposes a jitter
/// queue of decoded PCM payloads plus a thin control-message API.
pub struct StreamClient {
    write_stream: Mutex<TcpStream>,
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    running: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
    server_addr: SocketAddr,
}

impl StreamClient {
    pub fn connect(config: ClientConfig) -> NetResult<Self> {
        let stream = TcpStream::connect(config.server_addr).map_err(|source| {
            NetError::ConnectError {
                addr: config.server_addr.to_string(),
                source,
            }
        })?;
        stream.set_nodelay(true).ok();

        let write_stream = stream.try_clone().map_err(|source| NetError::ConnectError {
            addr: config.server_addr.to_string(),
            source,
        })?;

        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let running = Arc::new(AtomicBool::new(true));

        let recv_stream = stream;
        let recv_queue = Arc::clone(&queue);
        let recv_running = Arc::clone(&running);
        let display_name = config.display_name.clone();

        let receive_thread = thread::Builder::new()
            .name("syncwave-client-recv".into())
            .spawn(move || Self::receive_loop(recv_stream, recv_queue, recv_running, display_name))
            .map_err(|e| NetError::ConnectError {
                addr: config.server_addr.to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        Ok(Self {
            write_stream: Mutex::new(write_stream),
            queue,
            running,
            receive_thread: Some(receive_thread),
            server_addr: config.server_addr,
        })
    }

    fn receive_loop(
        mut stream: TcpStream,
        queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
        running: Arc<AtomicBool>,
        display_name: String,
    ) {
        stream.set_read_timeout(Some(Duration::from_millis(50))).ok();
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];

        info!("Client connected as {}", display_name);

        while running.load(Ordering::SeqCst) {
            match stream.read(&mut buf) {
                Ok(0) => {
                    debug!("Server closed the connection");
                    break;
                }
                Ok(n) => {
                    decoder.feed(&buf[..n]);
                    for item in decoder.drain() {
                        match item {
                            DecodedItem::Audio(payload) => queue.lock().push_back(payload),
                            DecodedItem::Control(ControlMessage::Welcome { message, .. }) => {
                                debug!("Server welcome: {}", message);
                            }
                            DecodedItem::Control(other) => {
                                debug!("Control message from server: {:?}", other);
                            }
                        }
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("Receive loop error: {}", e);
                    break;
                }
            }
        }

        running.store(false, Ordering::SeqCst);
        info!("Client receive loop exiting");
    }

    /// Send a control message to the server.
    pub fn send_control(&self, message: &ControlMessage) -> NetResult<()> {
        let wire = message.to_wire()?;
        self.write_stream
            .lock()
            .write_all(&wire)
            .map_err(NetError::WriteError)
    }

    pub fn ping(&self) -> NetResult<()> {
        self.send_control(&ControlMessage::Ping)
    }

    pub fn set_name(&self, name: impl Into<String>) -> NetResult<()> {
        self.send_control(&ControlMessage::SetName { name: name.into() })
    }

    /// Pop the oldest buffered PCM payload, if any is ready.
    pub fn try_recv_audio(&self) -> Option<Vec<u8>> {
        self.queue.lock().pop_front()
    }

    /// Block (busy-polling at [`QUEUE_POLL_INTERVAL`]) until a payload is
    /// available or `timeout` elapses.
    pub fn recv_audio_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_recv_audio() {
                return Some(payload);
            }
            if std::time::Instant::now() >= deadline || !self.is_connected() {
                return None;
            }
            thread::sleep(QUEUE_POLL_INTERVAL);
        }
    }

    /// Number of decoded PCM payloads currently buffered, for jitter/backlog
    /// diagnostics.
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn disconnect(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerConfig, StreamServer};
    use syncwave_dsp::PcmFrame;

    #[test]
    fn test_connect_and_receive_audio() {
        let server = StreamServer::start(ServerConfig {
            port: 0,
            display_name: "Test".into(),
            advertise: false,
        })
        .unwrap();

        let client = StreamClient::connect(ClientConfig {
            server_addr: ([127, 0, 0, 1], server.port()).into(),
            display_name: "Test Client".into(),
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));

        let frame = PcmFrame::new(vec![10, -10, 20, -20], 2, 44_100);
        server.broadcast_audio(&frame);

        let payload = client
            .recv_audio_timeout(Duration::from_secs(1))
            .expect("expected a payload");
        let decoded = PcmFrame::from_le_bytes(&payload, 2, 44_100);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_queue_depth_tracks_backlog() {
        let server = StreamServer::start(ServerConfig {
            port: 0,
            display_name: "Test".into(),
            advertise: false,
        })
        .unwrap();

        let client = StreamClient::connect(ClientConfig {
            server_addr: ([127, 0, 0, 1], server.port()).into(),
            display_name: "Test Client".into(),
        })
        .unwrap();
        thread::sleep(Duration::from_millis(100));

        for _ in 0..3 {
            server.broadcast_audio(&PcmFrame::new(vec![1, 2], 2, 44_100));
        }
        thread::sleep(Duration::from_millis(200));

        assert_eq!(client.queue_depth(), 3);
    }

    #[test]
    #[ignore = "requires a reachable server on the LAN"]
    fn test_ping_pong_round_trip() {
        let client = StreamClient::connect(ClientConfig {
            server_addr: ([127, 0, 0, 1], 5555).into(),
            display_name: "Manual Test".into(),
        })
        .unwrap();
        client.ping().unwrap();
    }
}
