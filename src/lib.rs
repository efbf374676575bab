//! # OpenEVSE Rust Client
//!
//! This project is a Rust client for OpenEVSE charging stations equipped with the WiFi
//! gateway. It consumes the device's HTTP API (status, config, overrides, limits, claims,
//! scheduling) and its companion websocket push channel, and re-exposes both through a
//! single typed façade, [`client::OpenEvse`].
//!
//! ## About the device API
//!
//! An OpenEVSE charger exposes:
//! - JSON mappings at `/status` and `/config` describing the live charger state
//! - Versioned command endpoints (`/override`, `/limit`, `/claims/{id}`, `/restart`, ...)
//!   whose availability depends on the gateway firmware version
//! - A legacy RAPI command channel at `/r` for firmware that predates the HTTP endpoints
//! - A websocket at `/ws` that pushes partial status updates as they happen
//!
//! ## Features
//!
//! This client provides the following capabilities:
//!
//! - **Connection Management**:
//!   - Persistent, authenticated websocket session with automatic reconnection
//!   - Exponential backoff with a permanent-failure ceiling
//!   - Application-level keepalive with pong-timeout detection
//!   - Connection state notifications delivered in transition order
//!
//! - **Cached Device State**:
//!   - `status` and `config` mappings refreshed over REST and merged with pushed updates
//!   - Automatic full resync when a pushed version marker invalidates the cache
//!   - A large set of typed read-only accessors (temperatures, energy counters,
//!     safety trip counts, shaper and vehicle values, connectivity flags)
//!
//! - **Device Operations**:
//!   - Manual overrides, charge limits and EVSE manager claims
//!   - Charge mode, service level, LED brightness and divert control
//!   - Sensor pushes for grid voltage, self-production and vehicle state of charge
//!   - Module restarts and a best-effort lookup of the latest published firmware
//!   - Firmware version gating: unsupported calls fail before any network traffic
//!
//! ## Usage
//!
//! ```no_run
//! use openevse_rs::client::{ChannelUpdateListener, OpenEvse};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let charger = OpenEvse::with_credentials("openevse.local", Some("admin"), Some("secret"))?;
//!
//!     // Populate the cache and start the push connection.
//!     charger.update().await?;
//!
//!     // React to pushed updates through a channel.
//!     let (listener, mut updates) = ChannelUpdateListener::create_channel();
//!     charger.set_update_listener(listener);
//!
//!     while updates.recv().await.is_some() {
//!         println!(
//!             "state={:?} power={:?}W session={:?}Wh",
//!             charger.state(),
//!             charger.charging_power(),
//!             charger.usage_session(),
//!         );
//!     }
//!
//!     charger.ws_disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! Version-gated operations return
//! [`OpenEvseError::UnsupportedFeature`](utils::OpenEvseError::UnsupportedFeature)
//! when the charger firmware is too old, without touching the network:
//!
//! ```no_run
//! # async fn example(charger: openevse_rs::client::OpenEvse) {
//! use openevse_rs::client::{LimitType, Override};
//!
//! if charger.version_check("4.0.1", None) {
//!     let _ = charger
//!         .set_override(Override {
//!             charge_current: Some(16),
//!             ..Override::default()
//!         })
//!         .await;
//! }
//!
//! match charger.set_limit(LimitType::Energy, 7000, None).await {
//!     Ok(reply) => println!("limit set: {reply}"),
//!     Err(err) => eprintln!("limit not set: {err}"),
//! }
//! # }
//! ```

/// Module containing client-related functionality.
///
/// This module provides the main [`client::OpenEvse`] façade together with the
/// configuration builder, the device operation types and the update listeners.
pub mod client;

/// Module containing connection-related functionality.
///
/// This module provides the push-socket state machine, the reconnect/backoff
/// policy, the keepalive monitor and the connection tuning options.
pub mod connection;

/// Module containing utility functions and error types.
///
/// This module provides the [`utils::OpenEvseError`] taxonomy and logging
/// setup helpers used throughout the library.
pub mod utils;
