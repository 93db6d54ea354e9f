//! geosearch server library
//!
//! Cross-language geo-semantic search over the `geosearch-store` crate:
//! offline translation, query composition, bootstrap and a JSON-RPC 2.0
//! surface on stdio.

pub mod app;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod provision;
pub mod query;
pub mod rpc;
pub mod suggest;
pub mod translate;

pub use bootstrap::{Bootstrap, BootstrapState, Provisioner};
pub use config::{CliArgs, ServiceConfig};
pub use error::{ServiceError, ServiceResult};
pub use query::{MultiSearchResponse, QueryService, SearchRequest, SearchResponse};
