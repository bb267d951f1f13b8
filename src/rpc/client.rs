//! HTTP (and datagram) clients for the directory and peer RPC surfaces

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as Offset;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::UdpSocket;
use tracing::debug;

use super::{DirectoryApi, Dialer, PeerApi, RpcError};
use crate::protocol::{
    Ack, ConnectReply, ConnectRequest, Datagram, FailureNotice, HeartbeatRequest,
    KvClientGetRequest, KvGetReply, KvGetRequest, KvPutReply, KvPutRequest, NodesReply, PeerId,
    PeerIdRequest, PeerInfo, PeerNetSettings, RegisterRequest, Rejection, SetOffsetRequest,
    StatKey, Stats, TimeReply, Update,
};
use crate::util::time::duration_to_nanos;

/// Largest datagram we will send
pub const MAX_DATAGRAM: usize = 0x4000;

fn map_send_error(e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout
    } else {
        RpcError::Transport(e.to_string())
    }
}

/// Turn a response into a value, mapping error bodies back to rejections
async fn read_reply<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RpcError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<Rejection>(&body) {
            Ok(rejection) => RpcError::Rejected(rejection),
            Err(_) => RpcError::Transport(format!("HTTP {}: {}", status.as_u16(), body)),
        });
    }

    response
        .json()
        .await
        .map_err(|e| RpcError::Transport(format!("malformed reply: {}", e)))
}

/// Shared JSON-over-HTTP plumbing
#[derive(Clone)]
struct JsonEndpoint {
    client: Client,
    base_url: String,
}

impl JsonEndpoint {
    fn new(client: Client, base_url: &str) -> Self {
        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, RpcError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        read_reply(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, timeout: Duration) -> Result<T, RpcError> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        read_reply(response).await
    }
}

// ============================================================================
// Directory client
// ============================================================================

/// Client for the directory's HTTP surface
#[derive(Clone)]
pub struct HttpDirectoryClient {
    endpoint: JsonEndpoint,
    timeout: Duration,
}

impl HttpDirectoryClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            endpoint: JsonEndpoint::new(client, base_url),
            timeout,
        }
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectoryClient {
    async fn register(
        &self,
        display_name: &str,
        peer_id: PeerId,
    ) -> Result<PeerNetSettings, RpcError> {
        let request = RegisterRequest {
            display_name: display_name.to_string(),
            peer_id,
        };
        self.endpoint.post("/register", &request, self.timeout).await
    }

    async fn connect(&self, request: ConnectRequest) -> Result<ConnectReply, RpcError> {
        self.endpoint.post("/connect", &request, self.timeout).await
    }

    async fn disconnect(&self, peer_id: PeerId) -> Result<(), RpcError> {
        let _: Ack = self
            .endpoint
            .post("/disconnect", &PeerIdRequest { peer_id }, self.timeout)
            .await?;
        Ok(())
    }

    async fn get_nodes(&self, peer_id: PeerId) -> Result<Vec<PeerInfo>, RpcError> {
        let reply: NodesReply = self
            .endpoint
            .post("/nodes", &PeerIdRequest { peer_id }, self.timeout)
            .await?;
        Ok(reply.peers)
    }

    async fn notify_failure(&self, peer_id: PeerId) -> Result<(), RpcError> {
        let _: Ack = self
            .endpoint
            .post("/failure", &PeerIdRequest { peer_id }, self.timeout)
            .await?;
        Ok(())
    }

    async fn notify_recovery(&self, peer_id: PeerId) -> Result<(), RpcError> {
        let _: Ack = self
            .endpoint
            .post("/recovery", &PeerIdRequest { peer_id }, self.timeout)
            .await?;
        Ok(())
    }

    async fn kv_get(&self, key: StatKey, requester: PeerId) -> Result<KvGetReply, RpcError> {
        self.endpoint
            .post("/kv/get", &KvGetRequest { key, requester }, self.timeout)
            .await
    }

    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<KvPutReply, RpcError> {
        self.endpoint
            .post("/kv/put", &KvPutRequest { key, value }, self.timeout)
            .await
    }
}

// ============================================================================
// Peer client
// ============================================================================

/// Handle to one remote peer: HTTP for calls, UDP for updates
pub struct HttpPeerClient {
    endpoint: JsonEndpoint,
    datagram_addr: Option<SocketAddr>,
    socket: Option<Arc<UdpSocket>>,
    call_timeout: Duration,
    liveness_timeout: Duration,
}

#[async_trait]
impl PeerApi for HttpPeerClient {
    async fn time_request(&self) -> Result<TimeReply, RpcError> {
        self.endpoint.get("/time", self.call_timeout).await
    }

    async fn set_offset(&self, offset: Offset) -> Result<(), RpcError> {
        let request = SetOffsetRequest {
            offset_nanos: duration_to_nanos(offset),
        };
        let _: Ack = self
            .endpoint
            .post("/offset", &request, self.call_timeout)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, from: PeerId) -> Result<(), RpcError> {
        let _: Ack = self
            .endpoint
            .post("/heartbeat", &HeartbeatRequest { from }, self.liveness_timeout)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RpcError> {
        let _: Ack = self.endpoint.get("/ping", self.liveness_timeout).await?;
        Ok(())
    }

    async fn register_peer(&self, peer: &PeerInfo) -> Result<(), RpcError> {
        let _: Ack = self.endpoint.post("/peers", peer, self.call_timeout).await?;
        Ok(())
    }

    async fn notify_update(&self, from: PeerId, update: &Update) -> Result<(), RpcError> {
        let (Some(socket), Some(addr)) = (&self.socket, self.datagram_addr) else {
            return Err(RpcError::Transport("no datagram route to peer".to_string()));
        };

        let payload = serde_json::to_vec(&Datagram::Update {
            from,
            update: *update,
        })
        .map_err(|e| RpcError::Transport(e.to_string()))?;

        if payload.len() > MAX_DATAGRAM {
            return Err(RpcError::Transport("update exceeds datagram size".to_string()));
        }

        socket
            .send_to(&payload, addr)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn notify_failure(&self, notice: FailureNotice) -> Result<(), RpcError> {
        let _: Ack = self
            .endpoint
            .post("/failure", &notice, self.call_timeout)
            .await?;
        Ok(())
    }

    async fn kv_get(&self, key: StatKey) -> Result<Stats, RpcError> {
        self.endpoint
            .post("/kv/get", &KvClientGetRequest { key }, self.call_timeout)
            .await
    }

    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<(), RpcError> {
        let _: Ack = self
            .endpoint
            .post("/kv/put", &KvPutRequest { key, value }, self.call_timeout)
            .await?;
        Ok(())
    }
}

/// Dials peers over HTTP, sharing one connection pool and one datagram socket
#[derive(Clone)]
pub struct HttpDialer {
    client: Client,
    socket: Option<Arc<UdpSocket>>,
    call_timeout: Duration,
    liveness_timeout: Duration,
}

impl HttpDialer {
    pub fn new(
        client: Client,
        socket: Option<Arc<UdpSocket>>,
        call_timeout: Duration,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            client,
            socket,
            call_timeout,
            liveness_timeout,
        }
    }
}

impl Dialer for HttpDialer {
    fn dial(&self, peer: &PeerInfo) -> Result<Arc<dyn PeerApi>, RpcError> {
        let datagram_addr = match peer.address.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                debug!(peer_id = peer.peer_id, address = %peer.address, error = %e, "Peer has no usable datagram address");
                None
            }
        };

        if peer.rpc_address.is_empty() {
            return Err(RpcError::Transport(format!(
                "peer {} has no RPC address",
                peer.peer_id
            )));
        }

        Ok(Arc::new(HttpPeerClient {
            endpoint: JsonEndpoint::new(self.client.clone(), &peer.rpc_address),
            datagram_addr,
            socket: self.socket.clone(),
            call_timeout: self.call_timeout,
            liveness_timeout: self.liveness_timeout,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_get_a_scheme() {
        let endpoint = JsonEndpoint::new(Client::new(), "127.0.0.1:9000/");
        assert_eq!(endpoint.url("/ping"), "http://127.0.0.1:9000/ping");

        let endpoint = JsonEndpoint::new(Client::new(), "https://dir.example");
        assert_eq!(endpoint.url("/nodes"), "https://dir.example/nodes");
    }

    #[test]
    fn dialing_requires_an_rpc_address() {
        let dialer = HttpDialer::new(
            Client::new(),
            None,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let peer = PeerInfo {
            peer_id: 1,
            display_name: "a".to_string(),
            address: "127.0.0.1:7001".to_string(),
            rpc_address: String::new(),
        };

        assert!(matches!(dialer.dial(&peer), Err(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn updates_without_a_socket_fail_softly() {
        let dialer = HttpDialer::new(
            Client::new(),
            None,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let peer = PeerInfo {
            peer_id: 1,
            display_name: "a".to_string(),
            address: "127.0.0.1:7001".to_string(),
            rpc_address: "127.0.0.1:7000".to_string(),
        };
        let handle = dialer.dial(&peer).unwrap();
        let update = Update::dead(1, 2, chrono::Utc::now());

        let result = handle.notify_update(2, &update).await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
    }
}
