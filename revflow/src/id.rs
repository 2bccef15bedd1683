// id.rs — Stable arena identifiers for arrows and ports
//
// Every arrow and every port lives in a single `ArrowGraph` arena and is
// addressed by a dense integer index. IDs are allocated in creation order and
// never reused, so iteration over ID-keyed ordered maps is deterministic.

use std::fmt;

/// Stable identifier for an arrow (primitive, composite or source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrowId(pub u32);

/// Stable identifier for a port. Port identity is global across the arena,
/// so attribute maps can be keyed by `PortId` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl ArrowId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl PortId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Allocator for arena IDs. Produces monotonically increasing IDs in
/// allocation order.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next_arrow: u32,
    next_port: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_arrow(&mut self) -> ArrowId {
        let id = ArrowId(self.next_arrow);
        self.next_arrow += 1;
        id
    }

    pub fn alloc_port(&mut self) -> PortId {
        let id = PortId(self.next_port);
        self.next_port += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_per_kind() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_arrow(), ArrowId(0));
        assert_eq!(ids.alloc_port(), PortId(0));
        assert_eq!(ids.alloc_port(), PortId(1));
        assert_eq!(ids.alloc_arrow(), ArrowId(1));
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(ArrowId(7).to_string(), "a7");
        assert_eq!(PortId(12).to_string(), "p12");
    }
}
