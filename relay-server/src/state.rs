//! # Server State
//!
//! Holds the shared application state for the relay server: the Tunnel
//! Registry, the Control Channel Hub, and the Request Correlator, plus
//! the public-facing base URLs used to build the `publicUrl`/`wsUrl`
//! fields returned by `POST /api/tunnel/create`. Cloned cheaply into
//! every axum handler, itself built from cheaply-cloneable `Arc`/
//! `DashMap` registries.

use crate::correlator::RequestCorrelator;
use crate::hub::ControlChannelHub;
use crate::registry::TunnelRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: TunnelRegistry,
    pub hub: ControlChannelHub,
    pub correlator: RequestCorrelator,
    pub public_base_url: String,
    pub ws_base_url: String,
}

impl AppState {
    pub fn new(public_base_url: String, ws_base_url: String) -> Self {
        Self {
            registry: TunnelRegistry::new(),
            hub: ControlChannelHub::new(),
            correlator: RequestCorrelator::new(),
            public_base_url,
            ws_base_url,
        }
    }
}
