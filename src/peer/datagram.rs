//! UDP receive loop for update datagrams

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use super::handlers::PeerService;
use crate::protocol::Datagram;
use crate::rpc::client::MAX_DATAGRAM;

/// Pause after a receive error before reading again
const RECV_BACKOFF: Duration = Duration::from_millis(100);

/// Decode datagrams and hand their updates to the service. Runs until the
/// task is aborted; receive errors are retried.
pub async fn run_listener(socket: Arc<UdpSocket>, service: Arc<PeerService>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from_addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors surface here on some platforms; the socket stays usable
                if e.kind() == std::io::ErrorKind::ConnectionReset {
                    debug!(error = %e, "Datagram receive error");
                    continue;
                }
                warn!(error = %e, "Datagram receive failed, retrying");
                tokio::time::sleep(RECV_BACKOFF).await;
                continue;
            }
        };

        match serde_json::from_slice::<Datagram>(&buf[..len]) {
            Ok(Datagram::Update { from, update }) => {
                let verdict = service.receive_update(from, update);
                trace!(from, %from_addr, ?verdict, "Received update datagram");
            }
            Err(e) => debug!(%from_addr, error = %e, "Dropping malformed datagram"),
        }
    }
}
