//! Connection records and their status state machine

use std::fmt;
use std::sync::Arc;

use chrono::Duration;

use crate::protocol::{PeerId, PeerInfo, Rejection};
use crate::rpc::PeerApi;

/// Status of a registered peer, as seen by the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Registered but not in a session (also the state after a graceful exit)
    NotInGame,
    Connected,
    /// Reported failed; kept as a soft-deleted record
    Disconnected,
    /// A recovery probe answered; confirmed on the peer's next node poll
    Reconnected,
}

/// Inputs that move a record between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    /// Graceful exit
    Leave,
    /// A client reported the peer as failed
    Fail,
    /// The recovery monitor reached the peer again
    ProbeSucceeded,
    /// The peer polled for nodes after recovering
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {event} to a peer that is {from}")]
pub struct TransitionError {
    pub from: ConnectionStatus,
    pub event: ConnectionEvent,
}

impl TransitionError {
    pub fn into_rejection(self, peer_id: PeerId) -> Rejection {
        match (self.from, self.event) {
            (ConnectionStatus::Connected, ConnectionEvent::Connect) => {
                Rejection::AlreadyConnected { peer_id }
            }
            _ => Rejection::IllegalTransition {
                peer_id,
                from: self.from.to_string(),
                event: self.event.to_string(),
            },
        }
    }
}

impl ConnectionStatus {
    /// The status after `event`, or an error if the transition is illegal
    pub fn apply(self, event: ConnectionEvent) -> Result<ConnectionStatus, TransitionError> {
        use ConnectionEvent::*;
        use ConnectionStatus::*;

        match (self, event) {
            (Connected, Connect) => Err(TransitionError { from: self, event }),
            (_, Connect) => Ok(Connected),
            (_, Leave) => Ok(NotInGame),
            (Connected | Reconnected | Disconnected, Fail) => Ok(Disconnected),
            (Disconnected, ProbeSucceeded) => Ok(Reconnected),
            (Reconnected | Connected, Confirm) => Ok(Connected),
            _ => Err(TransitionError { from: self, event }),
        }
    }

    /// Whether the peer is believed reachable
    pub fn is_online(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Reconnected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::NotInGame => "not in game",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnected => "reconnected",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionEvent::Connect => "connect",
            ConnectionEvent::Leave => "leave",
            ConnectionEvent::Fail => "fail",
            ConnectionEvent::ProbeSucceeded => "recover",
            ConnectionEvent::Confirm => "confirm",
        };
        f.write_str(name)
    }
}

/// Everything the directory knows about one registered peer
#[derive(Clone)]
pub struct ConnectionRecord {
    pub info: PeerInfo,
    pub status: ConnectionStatus,
    /// Offset last pushed to this peer by a clock-sync round
    pub offset: Duration,
    /// Live RPC handle, present once the peer connected
    pub handle: Option<Arc<dyn PeerApi>>,
    /// Session partner assigned at connect time
    pub partner: Option<PeerId>,
}

impl ConnectionRecord {
    pub fn registered(peer_id: PeerId, display_name: &str) -> Self {
        Self {
            info: PeerInfo {
                peer_id,
                display_name: display_name.to_string(),
                address: String::new(),
                rpc_address: String::new(),
            },
            status: ConnectionStatus::NotInGame,
            offset: Duration::zero(),
            handle: None,
            partner: None,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.info.peer_id
    }

    /// Apply `event` in place
    pub fn transition(&mut self, event: ConnectionEvent) -> Result<ConnectionStatus, Rejection> {
        let next = self
            .status
            .apply(event)
            .map_err(|e| e.into_rejection(self.peer_id()))?;
        self.status = next;
        Ok(next)
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("info", &self.info)
            .field("status", &self.status)
            .field("offset", &self.offset)
            .field("has_handle", &self.handle.is_some())
            .field("partner", &self.partner)
            .finish()
    }
}
