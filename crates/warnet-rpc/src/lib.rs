//! Warnet RPC - authenticated JSON-RPC calls to tanks.
//!
//! - [`client`]: the [`NodeRpc`] seam and its HTTP implementation
//! - [`gateway`]: [`RpcGateway`], bounded concurrent fan-out with retry
//! - [`error`]: [`RpcError`] and its not-ready/application/malformed classes
//!
//! Errors of the not-ready class (connection refused, request timeout, node
//! warming up) are retried with exponential backoff up to a caller-supplied
//! deadline. Everything else surfaces immediately.

pub mod client;
pub mod error;
pub mod gateway;

pub use client::{
    Chain, HttpConnector, HttpNodeRpc, NodeRpc, RpcConnector, RpcCredentials, RpcEndpoint,
};
pub use error::{Result, RpcError, RpcErrorKind};
pub use gateway::{FanOutResult, GatewayConfig, RpcGateway, RpcTarget};
