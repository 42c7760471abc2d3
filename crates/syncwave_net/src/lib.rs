//! SyncWave Streaming Plane
//!
//! Carries PCM blocks from one fan-out engine to any number of LAN clients
//! over plain TCP, with mDNS/DNS-SD used for discovery so a client doesn't
//! need to know the server's address ahead of time.
//!
//! # Architecture
//!
//! | Module       | Responsibility                                         |
//! |--------------|---------------------------------------------------------|
//! | `protocol`   | Wire format: control messages and PCM framing            |
//! | `server`     | Accept loop, client registry, broadcast                  |
//! | `client`     | Connect, decode, jitter-buffer incoming PCM              |
//! | `discovery`  | mDNS advertisement and browsing for `_syncwave._tcp`     |
//!
//! None of this runs on an async runtime: the server uses one OS thread per
//! connected client, matching the rest of the workspace's threading model.

mod error;

pub mod broadcast;
pub mod client;
pub mod discovery;
pub mod protocol;
pub mod server;

pub use broadcast::BroadcastTap;
pub use client::{ClientConfig, StreamClient};
pub use discovery::{discover_servers, local_ipv4, Advertisement, DiscoveredServer};
pub use error::{NetError, NetResult};
pub use protocol::{encode_audio_packet, ControlMessage, DecodedItem, FrameDecoder};
pub use server::{ClientInfo, ServerConfig, StreamServer};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_server_and_client_connect() {
        let server = StreamServer::start(ServerConfig {
            port: 0,
            display_name: "Lib Test".into(),
            advertise: false,
        })
        .unwrap();

        let client = StreamClient::connect(ClientConfig {
            server_addr: ([127, 0, 0, 1], server.port()).into(),
            display_name: "Lib Test Client".into(),
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(server.client_count(), 1);
        assert!(client.is_connected());
    }
}
