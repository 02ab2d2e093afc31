//! Per-room fan-out to connection outboxes with backpressure.
//!
//! Each connection owns a bounded `mpsc` outbox. A broadcast encodes the
//! event once and pushes the shared frame into every member's outbox,
//! optionally skipping the originating connection. A full outbox loses
//! that one frame (counted as dropped); it never blocks the room.
//!
//! The group is owned by its room and mutated under the room lock, so
//! frames enter every outbox in the order the room processed events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::{ConnectionId, ParticipantInfo, ProtocolError, ServerEvent};

/// A pre-encoded JSON text frame.
pub type Frame = Arc<str>;

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::Sender<Frame>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub active_peers: usize,
}

struct PeerSlot {
    info: ParticipantInfo,
    outbox: Outbox,
}

/// Members of one room and their outboxes, in join order.
#[derive(Default)]
pub struct BroadcastGroup {
    peers: Vec<PeerSlot>,
    messages_sent: u64,
    frames_delivered: u64,
    frames_dropped: u64,
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer, or refresh its name and outbox if the connection is
    /// already a member. Returns `true` for a new member.
    pub fn add_peer(&mut self, info: ParticipantInfo, outbox: Outbox) -> bool {
        if let Some(slot) = self
            .peers
            .iter_mut()
            .find(|slot| slot.info.connection_id == info.connection_id)
        {
            slot.info = info;
            slot.outbox = outbox;
            return false;
        }
        self.peers.push(PeerSlot { info, outbox });
        true
    }

    pub fn remove_peer(&mut self, connection_id: &ConnectionId) -> Option<ParticipantInfo> {
        let index = self
            .peers
            .iter()
            .position(|slot| &slot.info.connection_id == connection_id)?;
        Some(self.peers.remove(index).info)
    }

    /// Encode once and fan out. Returns the number of outboxes that accepted the frame.
    pub fn broadcast(
        &mut self,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> Result<usize, ProtocolError> {
        let frame: Frame = Arc::from(event.encode()?);
        Ok(self.broadcast_raw(frame, except))
    }

    /// Fan out a pre-encoded frame.
    pub fn broadcast_raw(&mut self, frame: Frame, except: Option<ConnectionId>) -> usize {
        self.messages_sent += 1;
        let mut delivered = 0;

        for slot in &self.peers {
            if Some(slot.info.connection_id) == except {
                continue;
            }
            match slot.outbox.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.frames_dropped += 1;
                    log::warn!(
                        "Outbox full for {} ({}), frame dropped",
                        slot.info.username,
                        slot.info.connection_id
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Outbox closed for {}", slot.info.connection_id);
                }
            }
        }

        self.frames_delivered += delivered as u64;
        delivered
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn has_peer(&self, connection_id: &ConnectionId) -> bool {
        self.peers
            .iter()
            .any(|slot| &slot.info.connection_id == connection_id)
    }

    /// Members in join order.
    pub fn peers(&self) -> Vec<ParticipantInfo> {
        self.peers.iter().map(|slot| slot.info.clone()).collect()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent,
            frames_delivered: self.frames_delivered,
            frames_dropped: self.frames_dropped,
            active_peers: self.peers.len(),
        }
    }
}
