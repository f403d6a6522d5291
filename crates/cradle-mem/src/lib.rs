//! Memory views exported by a sandboxed core.
//!
//! A sandbox owns its guest memory and hands the host [`MemoryDomain`] objects that read (and for
//! plain RAM/bus domains, write) that memory. The host may wrap two buses in a read-only
//! [`CompositeDomain`] for introspection tooling, and may subscribe to guest memory accesses via
//! [`MemoryCallbackSystem`].

#![forbid(unsafe_code)]

mod callbacks;
mod composite;
mod domain;
mod list;
mod mapped;
mod ram;

pub use callbacks::{AccessKind, AccessKinds, CallbackId, MemoryCallbackSystem, MemoryHooks};
pub use composite::{BusSelector, CompositeDomain, SYSTEM_BUS_NAME};
pub use domain::{DomainError, DomainResult, Endian, MemoryDomain};
pub use list::MemoryDomainList;
pub use mapped::{BusMapping, MappedBus, MappedBusError};
pub use ram::{RamDomain, SharedRam};
