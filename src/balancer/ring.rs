//! Consistent hash ring mapping keys to endpoint names.
//!
//! Every endpoint is placed on the ring `replicas` times (virtual nodes). A key
//! maps to the first virtual node at or after its own hash, wrapping around to
//! the lowest node. Adding or removing an endpoint only relocates the keys that
//! fall on that endpoint's arcs.

use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Hash function used to place names and keys on the ring.
pub trait RingHasher: Send + Sync + fmt::Debug {
    /// Hash bytes into the ring's `u64` value space.
    fn hash(&self, key: &[u8]) -> u64;
}

/// SHA-1 based ring hasher (first 8 digest bytes, big-endian).
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha1Hasher;

impl RingHasher for Sha1Hasher {
    fn hash(&self, key: &[u8]) -> u64 {
        let digest = Sha1::digest(key);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

/// Consistent hash ring.
#[derive(Clone)]
pub struct HashRing {
    /// Virtual nodes per endpoint.
    replicas: usize,
    /// Hash function.
    hasher: Arc<dyn RingHasher>,
    /// hash -> endpoint name
    ring: BTreeMap<u64, String>,
    /// Names currently on the ring.
    names: BTreeSet<String>,
}

impl fmt::Debug for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("hasher", &self.hasher)
            .field("names", &self.names)
            .field("virtual_nodes", &self.ring.len())
            .finish()
    }
}

impl HashRing {
    /// Create an empty ring using SHA-1.
    #[must_use]
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, Arc::new(Sha1Hasher))
    }

    /// Create an empty ring with a custom hash function.
    ///
    /// `replicas` is clamped to at least 1.
    #[must_use]
    pub fn with_hasher(replicas: usize, hasher: Arc<dyn RingHasher>) -> Self {
        Self {
            replicas: replicas.max(1),
            hasher,
            ring: BTreeMap::new(),
            names: BTreeSet::new(),
        }
    }

    /// Number of virtual nodes per endpoint.
    #[must_use]
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    fn virtual_hash(&self, name: &str, replica: usize) -> u64 {
        self.hasher.hash(format!("{name}#{replica}").as_bytes())
    }

    /// Place an endpoint on the ring. Adding a name twice is a no-op.
    pub fn add(&mut self, name: &str) {
        if !self.names.insert(name.to_string()) {
            return;
        }

        for replica in 0..self.replicas {
            let hash = self.virtual_hash(name, replica);
            // On a hash collision the lexically smaller name owns the node, so the
            // ring does not depend on insertion order.
            self.ring
                .entry(hash)
                .and_modify(|owner| {
                    if name < owner.as_str() {
                        *owner = name.to_string();
                    }
                })
                .or_insert_with(|| name.to_string());
        }
    }

    /// Place several endpoints on the ring.
    pub fn add_all<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.add(name.as_ref());
        }
    }

    /// Remove an endpoint from the ring. Removing an unknown name is a no-op.
    pub fn remove(&mut self, name: &str) {
        if !self.names.remove(name) {
            return;
        }

        for replica in 0..self.replicas {
            let hash = self.virtual_hash(name, replica);
            if self.ring.get(&hash).is_some_and(|owner| owner == name) {
                self.ring.remove(&hash);
            }
        }
    }

    /// Remove several endpoints from the ring.
    pub fn remove_all<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.remove(name.as_ref());
        }
    }

    /// Find the endpoint responsible for `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&str> {
        let hash = self.hasher.hash(key.as_bytes());
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, name)| name.as_str())
    }

    /// Whether `name` is on the ring.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Names currently on the ring, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of endpoints on the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the ring has no endpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of virtual nodes on the ring.
    #[must_use]
    pub fn virtual_node_count(&self) -> usize {
        self.ring.len()
    }
}
