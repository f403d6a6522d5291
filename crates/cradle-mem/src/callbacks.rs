use std::sync::{Arc, Mutex, MutexGuard};

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl AccessKind {
    fn as_flag(self) -> AccessKinds {
        match self {
            AccessKind::Read => AccessKinds::READ,
            AccessKind::Write => AccessKinds::WRITE,
            AccessKind::Execute => AccessKinds::EXECUTE,
        }
    }
}

bitflags! {
    /// The access kinds a sandbox must report through [`MemoryHooks::on_access`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessKinds: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// Instrumentation a sandbox calls for guest memory accesses.
///
/// The sandbox should query [`MemoryHooks::armed`] once per registration and skip reporting kinds
/// that are not armed.
pub trait MemoryHooks: Send + Sync {
    fn armed(&self) -> AccessKinds;

    /// `scope` is the name of the domain (bus) the access was made on.
    fn on_access(&self, kind: AccessKind, scope: &str, addr: u32, value: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

type Callback = Arc<dyn Fn(u32, u32) + Send + Sync>;

struct Subscription {
    id: CallbackId,
    kind: AccessKind,
    scope: Option<String>,
    addr: Option<u32>,
    callback: Callback,
}

impl Subscription {
    fn matches(&self, kind: AccessKind, scope: &str, addr: u32) -> bool {
        self.kind == kind
            && self.scope.as_deref().map_or(true, |s| s == scope)
            && self.addr.map_or(true, |a| a == addr)
    }
}

#[derive(Default)]
struct CallbackTable {
    next_id: u64,
    subs: Vec<Subscription>,
}

/// Host-side registry of memory access subscriptions.
#[derive(Default)]
pub struct MemoryCallbackSystem {
    table: Mutex<CallbackTable>,
}

impl std::fmt::Debug for MemoryCallbackSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCallbackSystem")
            .field("len", &self.len())
            .field("armed", &self.armed())
            .finish()
    }
}

impl MemoryCallbackSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CallbackTable> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Subscribes `callback(addr, value)` to accesses of `kind`.
    ///
    /// `scope` restricts the subscription to one domain name; `addr` to a single address.
    pub fn add(
        &self,
        kind: AccessKind,
        scope: Option<&str>,
        addr: Option<u32>,
        callback: impl Fn(u32, u32) + Send + Sync + 'static,
    ) -> CallbackId {
        let mut table = self.lock();
        table.next_id += 1;
        let id = CallbackId(table.next_id);
        table.subs.push(Subscription {
            id,
            kind,
            scope: scope.map(str::to_owned),
            addr,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn remove(&self, id: CallbackId) -> bool {
        let mut table = self.lock();
        let before = table.subs.len();
        table.subs.retain(|s| s.id != id);
        table.subs.len() != before
    }

    pub fn clear(&self) {
        self.lock().subs.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryHooks for MemoryCallbackSystem {
    fn armed(&self) -> AccessKinds {
        self.lock()
            .subs
            .iter()
            .fold(AccessKinds::empty(), |acc, s| acc | s.kind.as_flag())
    }

    fn on_access(&self, kind: AccessKind, scope: &str, addr: u32, value: u32) {
        // Callbacks run outside the lock so they may add/remove subscriptions.
        let matching: Vec<Callback> = self
            .lock()
            .subs
            .iter()
            .filter(|s| s.matches(kind, scope, addr))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for cb in matching {
            cb(addr, value);
        }
    }
}
