//! Stable first-fit allocation of ports from a configured pool.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single port, or an inclusive range of ports, as configured in the port pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

/// The `portPool` config field (spec §6) is a JSON sequence mixing bare
/// port numbers and `[start, end]` two-element arrays; this mirrors that
/// shape rather than introducing a wrapper object.
impl<'de> Deserialize<'de> for PortSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Single(u16),
            Range([u16; 2]),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Single(port) => PortSpec::Single(port),
            Raw::Range([start, end]) => PortSpec::Range(start, end),
        })
    }
}

impl Serialize for PortSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *self {
            PortSpec::Single(port) => serializer.serialize_u16(port),
            PortSpec::Range(start, end) => [start, end].serialize(serializer),
        }
    }
}

impl PortSpec {
    fn iter(&self) -> Box<dyn Iterator<Item = u16>> {
        match *self {
            Self::Single(p) => Box::new(std::iter::once(p)),
            Self::Range(start, end) => Box::new(start..=end),
        }
    }
}

/// Result of an [`Allocator::allocate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Port(u16),
    Exhausted,
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(p) => write!(f, "{p}"),
            Self::Exhausted => write!(f, "<exhausted>"),
        }
    }
}

/// Stable, first-fit port allocator.
///
/// Ports are handed out from the configured pool in insertion order. An
/// allocation for a given key is idempotent: calling `allocate` again with
/// the same key returns the same port rather than consuming another one.
#[derive(Debug, Clone)]
pub struct Allocator {
    /// Pool members, in the order they should be tried.
    pool: Vec<u16>,
    /// Current key -> port assignments.
    allocations: BTreeMap<String, u16>,
}

impl Allocator {
    /// Build an allocator from a sequence of pool specs.
    pub fn new(specs: impl IntoIterator<Item = PortSpec>) -> Self {
        let mut pool = Vec::new();
        for spec in specs {
            for port in spec.iter() {
                if !pool.contains(&port) {
                    pool.push(port);
                }
            }
        }
        Self {
            pool,
            allocations: BTreeMap::new(),
        }
    }

    /// Rehydrate an allocator from a previously-persisted key -> port map.
    ///
    /// Entries whose port is not a member of the pool are silently dropped:
    /// every allocation returned by this allocator is guaranteed to be a
    /// pool member.
    pub fn rehydrate(
        specs: impl IntoIterator<Item = PortSpec>,
        existing: impl IntoIterator<Item = (String, u16)>,
    ) -> Self {
        let mut this = Self::new(specs);
        for (key, port) in existing {
            if this.pool.contains(&port) {
                this.allocations.insert(key, port);
            }
        }
        this
    }

    /// Allocate a port for `key`, or return the existing allocation if one
    /// already exists.
    pub fn allocate(&mut self, key: impl Into<String>) -> Allocation {
        let key = key.into();
        if let Some(port) = self.allocations.get(&key) {
            return Allocation::Port(*port);
        }
        let taken: std::collections::HashSet<u16> = self.allocations.values().copied().collect();
        match self.pool.iter().find(|p| !taken.contains(p)) {
            Some(port) => {
                self.allocations.insert(key, *port);
                Allocation::Port(*port)
            }
            None => Allocation::Exhausted,
        }
    }

    /// Release the port held by `key`. No-op for unknown keys.
    pub fn release(&mut self, key: &str) {
        self.allocations.remove(key);
    }

    /// Look up the port currently held by `key`, if any.
    pub fn get_port(&self, key: &str) -> Option<u16> {
        self.allocations.get(key).copied()
    }

    /// A read-only view of the current allocations.
    pub fn allocations(&self) -> &BTreeMap<String, u16> {
        &self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rehydration_drops_rogue_ports() {
        let allocator = Allocator::rehydrate(
            [PortSpec::Range(8000, 8002)],
            [
                ("svc-a".to_string(), 8001),
                ("svc-rogue".to_string(), 9999),
            ],
        );
        assert_eq!(allocator.get_port("svc-a"), Some(8001));
        assert_eq!(allocator.get_port("svc-rogue"), None);
    }

    #[test]
    fn allocate_is_idempotent_and_first_fit() {
        let mut allocator =
            Allocator::rehydrate([PortSpec::Range(8000, 8002)], [("svc-a".into(), 8001)]);
        assert_eq!(allocator.allocate("svc-b"), Allocation::Port(8000));
        assert_eq!(allocator.allocate("svc-b"), Allocation::Port(8000));
        assert_eq!(allocator.allocate("svc-c"), Allocation::Port(8002));
        assert_eq!(allocator.allocate("svc-d"), Allocation::Exhausted);
    }

    #[test]
    fn release_frees_the_port_for_reuse() {
        let mut allocator = Allocator::new([PortSpec::Single(9000)]);
        assert_eq!(allocator.allocate("a"), Allocation::Port(9000));
        allocator.release("a");
        assert_eq!(allocator.get_port("a"), None);
        assert_eq!(allocator.allocate("b"), Allocation::Port(9000));
    }

    #[test]
    fn release_unknown_key_is_noop() {
        let mut allocator = Allocator::new([PortSpec::Single(9000)]);
        allocator.release("nope");
        assert!(allocator.allocations().is_empty());
    }

    use qcheck_macros::quickcheck;

    /// Every allocation `allocate` ever hands back is a pool member, and
    /// repeated calls on the same key return that same port (spec §8).
    #[quickcheck]
    fn every_allocation_is_a_pool_member_and_idempotent(keys: Vec<String>) -> bool {
        let keys: Vec<String> = keys.into_iter().filter(|k| !k.is_empty()).take(30).collect();
        let pool_end = 8000 + keys.len() as u16;
        let mut allocator = Allocator::new([PortSpec::Range(8000, pool_end)]);

        let mut first_pass = std::collections::HashMap::new();
        for key in &keys {
            match allocator.allocate(key.clone()) {
                Allocation::Port(port) => {
                    if !(8000..=pool_end).contains(&port) {
                        return false;
                    }
                    first_pass.insert(key.clone(), port);
                }
                Allocation::Exhausted => {}
            }
        }
        for (key, port) in &first_pass {
            if allocator.allocate(key.clone()) != Allocation::Port(*port) {
                return false;
            }
        }
        true
    }
}
