//! Logical and local network interfaces
//!
//! A logical interface is a named group of local interfaces that share an
//! address family. Each local interface owns the port pool that sockets bound
//! on it draw from. Entities refer to a local interface by its position in the
//! logical interface's list.

use crate::ports::PortPool;
use crate::types::AddressFamily;
use std::net::IpAddr;
use std::sync::Arc;

/// One bound local address.
#[derive(Debug)]
pub struct LocalInterface {
    /// Position in the owning logical interface
    pub unique_id: u32,
    /// Local address
    pub address: IpAddr,
    /// Port pool of this address
    pub ports: Arc<PortPool>,
}

/// A named group of local interfaces.
#[derive(Debug)]
pub struct LogicalInterface {
    /// Configured name
    pub name: String,
    /// Family sockets on this interface prefer
    pub preferred_family: AddressFamily,
    /// Local interfaces, indexed by `unique_id`
    pub locals: Vec<Arc<LocalInterface>>,
}

impl LogicalInterface {
    /// Local interface at position `uid`.
    pub fn local(&self, uid: u32) -> Option<&Arc<LocalInterface>> {
        self.locals.get(uid as usize)
    }
}

/// Lookup of logical interfaces by name and family.
pub trait InterfaceRegistry: Send + Sync {
    /// Find the interface called `name` serving `family`.
    ///
    /// `None` asks for the default interface of the family.
    fn lookup(&self, name: Option<&str>, family: AddressFamily) -> Option<Arc<LogicalInterface>>;
}

/// Static interface registry built at startup.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    interfaces: Vec<Arc<LogicalInterface>>,
}

impl InterfaceTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a logical interface with one local interface per address, each
    /// with its own pool over `port_min..=port_max`.
    ///
    /// The first interface added for a family is that family's default.
    pub fn with_interface(
        mut self,
        name: &str,
        family: AddressFamily,
        addresses: &[IpAddr],
        port_min: u16,
        port_max: u16,
    ) -> Self {
        let locals = addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                Arc::new(LocalInterface {
                    unique_id: i as u32,
                    address: *addr,
                    ports: PortPool::new(format!("{}/{}", name, i), port_min, port_max),
                })
            })
            .collect();
        self.interfaces.push(Arc::new(LogicalInterface {
            name: name.to_string(),
            preferred_family: family,
            locals,
        }));
        self
    }

    /// All logical interfaces.
    pub fn interfaces(&self) -> &[Arc<LogicalInterface>] {
        &self.interfaces
    }
}

impl InterfaceRegistry for InterfaceTable {
    fn lookup(&self, name: Option<&str>, family: AddressFamily) -> Option<Arc<LogicalInterface>> {
        self.interfaces
            .iter()
            .filter(|i| i.preferred_family == family)
            .find(|i| name.map_or(true, |n| i.name == n))
            .cloned()
    }
}
