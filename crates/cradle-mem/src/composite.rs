use std::sync::Arc;

use crate::domain::{DomainError, DomainResult, MemoryDomain};

pub const SYSTEM_BUS_NAME: &str = "System Bus";

/// Which processor bus answers reads on a [`CompositeDomain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusSelector {
    #[default]
    Primary,
    Secondary,
}

/// A read-only 32-bit view that forwards reads to one of two independently addressed buses.
///
/// The selector is owned by the embedding layer. Changing it requires `&mut self`, so it can never
/// change while a read is in flight; it is not synchronized against frame advancement and should
/// only be changed between frames.
pub struct CompositeDomain {
    primary: Arc<dyn MemoryDomain>,
    secondary: Arc<dyn MemoryDomain>,
    selector: BusSelector,
}

impl CompositeDomain {
    pub fn new(primary: Arc<dyn MemoryDomain>, secondary: Arc<dyn MemoryDomain>) -> Self {
        Self {
            primary,
            secondary,
            selector: BusSelector::Primary,
        }
    }

    pub fn selector(&self) -> BusSelector {
        self.selector
    }

    pub fn set_selector(&mut self, selector: BusSelector) {
        self.selector = selector;
    }

    fn selected(&self) -> &dyn MemoryDomain {
        match self.selector {
            BusSelector::Primary => self.primary.as_ref(),
            BusSelector::Secondary => self.secondary.as_ref(),
        }
    }
}

impl std::fmt::Debug for CompositeDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeDomain")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .field("selector", &self.selector)
            .finish()
    }
}

impl MemoryDomain for CompositeDomain {
    fn name(&self) -> &str {
        SYSTEM_BUS_NAME
    }

    fn size(&self) -> u64 {
        1 << 32
    }

    fn writable(&self) -> bool {
        false
    }

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> DomainResult<()> {
        self.selected().read_into(addr, dst)
    }

    fn write_from(&self, _addr: u64, _src: &[u8]) -> DomainResult<()> {
        Err(DomainError::ReadOnly {
            domain: SYSTEM_BUS_NAME.to_string(),
        })
    }
}
