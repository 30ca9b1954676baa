//! HTTP API Module
//!
//! Provides the gateway that intercepts storage API requests.

mod http;

pub use http::{GatewayServer, GatewayState, CONTEXT_MY_CLUSTER, CONTEXT_PLACEMENT};
