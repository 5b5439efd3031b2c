//! Shared building blocks for combaine senders.
//!
//! This crate provides:
//! - The closed, tagged [`Value`] model produced by the aggregation layer
//! - [`AggregationResult`] and the [`SenderTask`] envelope delivered to senders
//! - [`CallContext`], a cancellation token plus deadline passed to every remote call
//! - [`MultiHostClient`], an HTTP client that fans a request out over replica hosts
//! - The [`Sender`] trait every sender implements
//!
//! # Architecture
//!
//! ```text
//! dispatch layer ─► SenderTask { id, data, config }
//!                          │
//!                          ▼
//!                   impl Sender::send(ctx, data)
//!                          │
//!                          ▼
//!                 MultiHostClient::request(ctx, hosts, request)
//!                  host1 ─✗─► host2 ─✓─► response
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod context;
pub mod error;
pub mod http;
pub mod sender;
pub mod task;
pub mod value;

pub use context::CallContext;
pub use error::{ContextError, HostError, HttpError, TaskError};
pub use http::{HostRequest, HostResponse, MultiHostClient};
pub use sender::Sender;
pub use task::{subgroup_name, AggregationResult, SenderTask};
pub use value::Value;
