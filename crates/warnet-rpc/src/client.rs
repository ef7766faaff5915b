//! Node RPC clients.
//!
//! [`NodeRpc`] is the narrow `call(method, params)` seam the gateway fans out
//! over. [`HttpNodeRpc`] speaks JSON-RPC 1.0 over HTTP with basic auth, which
//! is what the node binary exposes. Which chain a client talks to is explicit
//! configuration carried by [`Chain`].

use crate::error::{Result, RpcError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use warnet_core::TankId;

/// Default RPC username for tanks.
pub const DEFAULT_RPC_USER: &str = "warnet_user";
/// Default RPC password for tanks.
pub const DEFAULT_RPC_PASSWORD: &str = "2themoon";

/// Chain a network runs, which fixes its default ports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Local regression-test chain.
    #[default]
    Regtest,
    /// Custom signet.
    Signet,
}

impl Chain {
    /// Config section and CLI flag name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regtest => "regtest",
            Self::Signet => "signet",
        }
    }

    /// Default RPC port.
    pub fn rpc_port(&self) -> u16 {
        match self {
            Self::Regtest => 18443,
            Self::Signet => 38332,
        }
    }

    /// Default P2P port.
    pub fn p2p_port(&self) -> u16 {
        match self {
            Self::Regtest => 18444,
            Self::Signet => 38333,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "regtest" => Ok(Self::Regtest),
            "signet" => Ok(Self::Signet),
            other => Err(format!("unsupported chain {other:?}")),
        }
    }
}

/// Credentials for a node's RPC interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcCredentials {
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Default for RpcCredentials {
    fn default() -> Self {
        Self {
            user: DEFAULT_RPC_USER.to_string(),
            password: DEFAULT_RPC_PASSWORD.to_string(),
        }
    }
}

/// Where and how to reach one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    /// Node address.
    pub host: Ipv4Addr,
    /// RPC port.
    pub port: u16,
    /// Credentials.
    pub credentials: RpcCredentials,
}

impl RpcEndpoint {
    /// Base URL of the endpoint.
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// A request/response channel to one node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Issues `method` with `params` and returns the node's `result`.
    async fn call(&self, method: &str, params: &Value) -> Result<Value>;
}

/// Produces clients for tank endpoints.
pub trait RpcConnector: Send + Sync {
    /// Returns a client bound to `endpoint`.
    fn connect(&self, tank: TankId, endpoint: &RpcEndpoint) -> Arc<dyn NodeRpc>;
}

/// JSON-RPC over HTTP.
pub struct HttpNodeRpc {
    client: reqwest::Client,
    endpoint: RpcEndpoint,
    next_id: AtomicU64,
}

impl HttpNodeRpc {
    /// Creates a client sharing `client`'s connection pool.
    pub fn new(client: reqwest::Client, endpoint: RpcEndpoint) -> Self {
        Self {
            client,
            endpoint,
            next_id: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[async_trait]
impl NodeRpc for HttpNodeRpc {
    async fn call(&self, method: &str, params: &Value) -> Result<Value> {
        let params = match params {
            Value::Null => Value::Array(vec![]),
            Value::Array(_) | Value::Object(_) => params.clone(),
            other => {
                return Err(RpcError::malformed(format!(
                    "params must be an array or object, got {other}"
                )))
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(url = %self.endpoint.url(), method, id, "rpc request");

        let response = self
            .client
            .post(self.endpoint.url())
            .basic_auth(
                &self.endpoint.credentials.user,
                Some(&self.endpoint.credentials.password),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RpcError::application(format!("authentication rejected ({status})")));
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(RpcError::not_ready(format!("node unavailable ({status})")));
        }

        // The node answers application errors with a non-2xx status and a JSON body.
        let text = response.text().await?;
        let parsed: RpcResponse = serde_json::from_str(&text).map_err(|e| {
            RpcError::application(format!("invalid response ({status}): {e}"))
        })?;
        match parsed.error {
            Some(err) => Err(RpcError::from_node(err.code, err.message)),
            None => Ok(parsed.result),
        }
    }
}

/// Builds [`HttpNodeRpc`] clients over a shared connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Creates a connector whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl RpcConnector for HttpConnector {
    fn connect(&self, _tank: TankId, endpoint: &RpcEndpoint) -> Arc<dyn NodeRpc> {
        Arc::new(HttpNodeRpc::new(self.client.clone(), endpoint.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_ports() {
        assert_eq!(Chain::Regtest.rpc_port(), 18443);
        assert_eq!(Chain::Regtest.p2p_port(), 18444);
        assert_eq!(Chain::Signet.rpc_port(), 38332);
        assert_eq!("signet".parse::<Chain>().unwrap(), Chain::Signet);
        assert!("mainnet".parse::<Chain>().is_err());
    }

    #[test]
    fn test_endpoint_url() {
        let endpoint = RpcEndpoint {
            host: Ipv4Addr::new(100, 1, 2, 3),
            port: 18443,
            credentials: RpcCredentials::default(),
        };
        assert_eq!(endpoint.url(), "http://100.1.2.3:18443/");
        assert_eq!(endpoint.credentials.user, "warnet_user");
    }

    #[tokio::test]
    async fn test_unreachable_node_is_not_ready() {
        let connector = HttpConnector::new(Duration::from_millis(200)).unwrap();
        let endpoint = RpcEndpoint {
            host: Ipv4Addr::LOCALHOST,
            port: 1,
            credentials: RpcCredentials::default(),
        };
        let client = connector.connect(TankId(0), &endpoint);
        let err = client
            .call("getblockchaininfo", &Value::Null)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[tokio::test]
    async fn test_scalar_params_are_malformed() {
        let connector = HttpConnector::new(Duration::from_millis(200)).unwrap();
        let endpoint = RpcEndpoint {
            host: Ipv4Addr::LOCALHOST,
            port: 1,
            credentials: RpcCredentials::default(),
        };
        let err = connector
            .connect(TankId(0), &endpoint)
            .call("getblock", &json!(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::RpcErrorKind::Malformed);
    }
}
