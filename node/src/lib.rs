// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod config;
pub mod errors;
pub mod telemetry;
pub mod store;
pub mod transport;
pub mod api;
pub mod network;
pub mod server;
pub mod fork;
pub mod catchup;
pub mod verifier;
pub mod lifecycle;
