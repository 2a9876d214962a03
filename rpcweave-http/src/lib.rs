//! HTTP binding for the rpcweave dispatch pipeline.
//!
//! Serves one JSON-RPC message per HTTP request on a single axum route. See
//! [`binding`] for validation rules and status mapping.

pub mod binding;
pub mod error;

pub use binding::{HttpBinding, HttpBindingConfig, handle_rpc, serve, validate_request};
pub use error::HttpError;
