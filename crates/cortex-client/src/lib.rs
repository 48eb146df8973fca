//! Harness-side device client.
//!
//! The client owns an adapter's lifecycle end to end: launch or connect,
//! handshake (HELLO → CONFIG → ACK), one `execute_window` call per window,
//! and teardown with SIGTERM/SIGKILL escalation for spawned children.
//!
//! The scheduler drives [`DeviceClient::execute_window`] serially and
//! receives a [`DeviceTiming`](cortex_proto::DeviceTiming) per window;
//! telemetry consumes those records downstream.

mod client;
mod errors;
mod launcher;

pub use client::{DeviceClient, SessionConfig};
pub use errors::ClientError;
pub use launcher::{
    AdapterChild, AdapterLauncher, ConnectLauncher, Escalation, LaunchedAdapter, ProcessLauncher,
    TEARDOWN_GRACE_MS, TeardownReport, launcher_for_uri,
};
