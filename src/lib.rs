//! Source Refresh Engine
//!
//! Periodically refreshes HTTP-backed data items ("sources") and hands the
//! results back to the caller. Each source is a URL plus request options, an
//! optional JSON filter and a refresh interval.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - **models**: Source descriptors, transport requests/responses and execution results
//! - **variables**: `{{name}}` placeholder resolution (environment, local, TOTP)
//! - **environment**: The [`TemplateStore`](environment::TemplateStore) seam and a bundled environment store
//! - **totp**: RFC 6238 code generation with one-use-per-window cooldowns
//! - **filter**: Dot/bracket JSON path extraction
//! - **transport**: The [`Transport`](transport::Transport) seam and the reqwest implementation
//! - **executor**: One execution of one source, including retry with backoff
//! - **breaker**: Per-source circuit breakers
//! - **scheduler**: Per-source refresh timers
//! - **engine**: The [`RefreshEngine`] facade wiring all of the above
//! - **config**: Engine settings with validation
//!
//! # Usage
//!
//! ```no_run
//! use source_refresh::{RefreshEngine, RefreshOptions, RunOptions, SourceDescriptor};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = RefreshEngine::builder().build()?;
//!
//! let source = SourceDescriptor::new("weather", "https://api.example.com/weather")
//!     .with_refresh(RefreshOptions::every(5));
//!
//! // One interactive run
//! let result = engine.execute(&source, &RunOptions::test()).await?;
//! println!("{}", result.content);
//!
//! // Periodic refresh
//! engine.setup_refresh(source, |update| {
//!     println!("{}: {}", update.source_id, update.outcome.content());
//! });
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod clock;
pub mod config;
pub mod engine;
pub mod environment;
pub mod executor;
pub mod filter;
pub mod models;
pub mod scheduler;
pub mod totp;
pub mod transport;
pub mod variables;

pub use breaker::{BreakerSnapshot, CircuitBreakerRegistry, CircuitState};
pub use config::{ConfigError, EngineConfig};
pub use engine::{RefreshEngine, RefreshEngineBuilder};
pub use environment::{EnvironmentStore, TemplateStore};
pub use executor::{ExecutionError, ProgressEvent, RunOptions};
pub use models::{
    ExecutionResult, HttpMethod, JsonFilter, KeyValue, RefreshOptions, RequestBody, RequestOptions,
    SourceDescriptor,
};
pub use scheduler::{RefreshHandle, RefreshOutcome, RefreshStatus, RefreshUpdate};
pub use transport::{Transport, TransportError};
