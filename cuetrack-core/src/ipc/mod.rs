//! Types exchanged with the host application.
//!
//! Everything here derives `serde::Serialize` + `serde::Deserialize` so a host
//! can forward events over its own IPC layer (webview bus, socket, …).

pub mod events;
