//! Host for sandboxed handheld emulator cores.
//!
//! This crate re-exports the workspace members under one roof. Most embedders only need
//! [`config::resolve`] and [`host::SandboxedCoreHost`].

pub use cradle_config as config;
pub use cradle_host as host;
pub use cradle_mem as mem;
pub use cradle_sandbox as sandbox;
pub use cradle_snapshot as snapshot;
