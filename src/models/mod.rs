//! Data models for sources, resolved requests and execution results.
//!
//! This module contains the core data structures shared by the resolver,
//! executor and scheduler.

pub mod request;
pub mod response;
pub mod source;

pub use request::{HttpMethod, TransportRequest};
pub use response::{ExecutionResult, TransportResponse};
pub use source::{
    JsonFilter, KeyValue, RefreshOptions, RequestBody, RequestOptions, SourceDescriptor,
};
