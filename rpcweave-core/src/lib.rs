//! rpcweave core: concurrent JSON-RPC 2.0 dispatch and call correlation.
//!
//! This library provides the message model, the dispatch pipeline that fans
//! inbound requests out to an invocation service, the cancellation registry,
//! the client-side call correlator, and configuration shared by the
//! transport bindings (`rpcweave-http`).
//!
//! ## Module Organization
//!
//! - `jsonrpc` - wire message model and parsing
//! - `error` - error taxonomy for serving and calling
//! - `service` - the invocation service boundary and [`MethodMap`]
//! - `dispatch` - [`DispatchPipeline`], cancellation registry, resequencing
//! - `client` - [`RpcClient`], method tables, client transports
//! - `config` - YAML configuration

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jsonrpc;
pub mod service;

pub use client::{ChannelTransport, ClientTransport, MethodIndex, MethodTable, RpcClient};
pub use dispatch::{DispatchOptions, DispatchPipeline, PipelineLink};
pub use error::{CallError, DispatchError, RpcError, TransportError};
pub use jsonrpc::{Message, MessageId, Params, RequestMessage, ResponseMessage};
pub use service::{HandlerContext, InvocationContext, InvokeService, MethodMap};
