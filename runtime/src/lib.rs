//! Geomask runtime: route a Chromium instance through a user-managed proxy
//! list and keep the browser's apparent identity consistent with the
//! active proxy's location.
//!
//! The [`controller::Controller`] is the single writer of proxy activation
//! state. It drives a [`host::BrowserHost`] (proxy route, header rules,
//! page scripts, WebRTC policy) and persists everything through a
//! [`store::StateStore`].

pub mod audit;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod frames;
pub mod geo;
pub mod host;
pub mod identity;
pub mod model;
pub mod rules;
pub mod server;
pub mod store;

pub use error::{GeomaskError, Result};
