//! # Envoy - client for Enphase Envoy / IQ Gateway telemetry
//!
//! Reads production totals and per-inverter reports from a gateway's local
//! API and takes care of the token and session handshake the gateway
//! requires since firmware 7.
//!
//! ## Quick Start
//!
//! ```no_run
//! use envoy::{DeviceClient, EnvoyClient};
//!
//! # async fn run() -> envoy::Result<()> {
//! let client = EnvoyClient::builder("122300000001")
//!     .gateway_address("https://192.168.1.20")
//!     .credentials("owner@example.com", "secret")
//!     .build()?;
//!
//! let production = client.production().await?;
//! if let Some(record) = production.primary() {
//!     println!("{} W now, {} Wh lifetime", record.w_now, record.wh_lifetime);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Session lifecycle
//!
//! The first request logs in to the Enphase token service (unless a JWT was
//! supplied), exchanges the JWT for a gateway session cookie and reuses that
//! session until [`DeviceClient::invalidate_session`] is called. Every
//! transition is reported to the [`SessionObserver`] registered on the
//! builder.
//!
//! ## Modules
//!
//! - [`client`]: The [`DeviceClient`] trait and its HTTP implementation
//! - [`model`]: Records returned by the gateway
//! - [`observer`]: Session lifecycle notifications
//! - [`discovery`]: Locating a gateway and reading its serial
//! - [`error`]: Error types

mod auth;
pub mod client;
pub mod discovery;
pub mod error;
pub mod model;
pub mod observer;

// Re-exports for convenient access
pub use client::{DeviceClient, EnvoyClient, EnvoyClientBuilder, DEFAULT_GATEWAY_ADDRESS};
pub use discovery::{Discovered, Discovery};
pub use error::{EnvoyError, Result};
pub use model::{CommCheck, Inverter, Production, ProductionRecord};
pub use observer::{MemoryObserver, NoopObserver, SessionEvent, SessionObserver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
