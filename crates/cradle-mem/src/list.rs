use std::sync::Arc;

use crate::composite::{BusSelector, CompositeDomain};
use crate::domain::MemoryDomain;

/// The set of domains a session exposes, plus the composite system bus.
#[derive(Debug, Default)]
pub struct MemoryDomainList {
    domains: Vec<Arc<dyn MemoryDomain>>,
    system_bus: Option<CompositeDomain>,
}

impl MemoryDomainList {
    pub fn new(domains: Vec<Arc<dyn MemoryDomain>>) -> Self {
        Self {
            domains,
            system_bus: None,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn MemoryDomain>> {
        self.domains.iter().find(|d| d.name() == name)
    }

    /// Looks a domain up by name, including the composite system bus.
    pub fn get(&self, name: &str) -> Option<&dyn MemoryDomain> {
        if let Some(bus) = &self.system_bus {
            if bus.name() == name {
                return Some(bus);
            }
        }
        self.find(name).map(|d| d.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.domains.iter().map(|d| d.name()).collect();
        if let Some(bus) = &self.system_bus {
            names.push(bus.name());
        }
        names
    }

    pub fn set_system_bus(&mut self, bus: CompositeDomain) {
        self.system_bus = Some(bus);
    }

    pub fn system_bus(&self) -> Option<&CompositeDomain> {
        self.system_bus.as_ref()
    }

    /// Changes which bus the composite system bus reads from. Returns `false` if there is none.
    pub fn select_system_bus(&mut self, selector: BusSelector) -> bool {
        match &mut self.system_bus {
            Some(bus) => {
                bus.set_selector(selector);
                true
            }
            None => false,
        }
    }
}
