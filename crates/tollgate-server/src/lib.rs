//! Inline request interception in front of an axum/tower application.
//!
//! [`TollgateLayer`] consults the local decision agent before every request,
//! blocks or redirects when told to, otherwise runs the wrapped service while
//! recording its response, and reports outcomes back to the agent when asked
//! or when the response looks anomalous.
//!
//! ```rust,ignore
//! let config = tollgate_server::config::load_config(Some("config.toml"))?;
//! let app = Router::new()
//!     .route("/", get(index))
//!     .layer(TollgateLayer::from_config(&config));
//! ```

pub mod config;
pub mod lifecycle;
pub mod recorder;
pub mod snapshot;

pub use lifecycle::{LifecycleSettings, TollgateLayer, TollgateService};
pub use recorder::ResponseRecorder;
pub use snapshot::{RequestSnapshotBuilder, TlsInfo};
