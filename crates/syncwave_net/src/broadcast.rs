//! Broadcast tap - the borrowed capability the Fan-Out Engine holds to push
//! captured blocks onto the Stream Server without owning it.
//!
//! Ownership of the server always belongs to the caller; the engine treats
//! it only as `{ broadcast, is_running }`. This avoids a cyclic
//! `Arc<Engine>` <-> `Arc<Server>` reference - the engine's lifetime is
//! expected not to outlive the server's.

use syncwave_dsp::PcmFrame;

use crate::server::StreamServer;

pub trait BroadcastTap: Send + Sync {
    fn broadcast(&self, frame: &PcmFrame);
    fn is_running(&self) -> bool;
}

impl BroadcastTap for StreamServer {
    fn broadcast(&self, frame: &PcmFrame) {
        self.broadcast_audio(frame);
    }

    fn is_running(&self) -> bool {
        self.is_alive()
    }
}
