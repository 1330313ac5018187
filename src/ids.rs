use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reserved prefix for locally allocated identifiers. Persisted ids are
/// UUIDs and can never start with this.
pub const TEMP_PREFIX: &str = "tmp-";

/// Identifier of a draft entity. Temporary ids exist only inside one editor
/// session; persisted ids come back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Temp(String),
    Persisted(String),
}

impl EntityId {
    pub fn is_temp(&self) -> bool {
        matches!(self, EntityId::Temp(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityId::Temp(s) | EntityId::Persisted(s) => s,
        }
    }

    /// Classifies an id that arrived over the wire.
    pub fn from_wire(raw: &str) -> EntityId {
        if raw.starts_with(TEMP_PREFIX) {
            EntityId::Temp(raw.to_string())
        } else {
            EntityId::Persisted(raw.to_string())
        }
    }

}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(D::Error::custom("entity id must not be empty"));
        }
        Ok(EntityId::from_wire(&raw))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hands out collision-free temporary ids for one editor session.
#[derive(Debug, Default)]
pub struct IdAllocator {
    counter: u64,
}

impl IdAllocator {
    pub fn new() -> IdAllocator {
        IdAllocator { counter: 0 }
    }

    pub fn next(&mut self, prefix: &str) -> EntityId {
        self.counter += 1;
        EntityId::Temp(format!("{}{}-{}", TEMP_PREFIX, prefix, self.counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_ids_are_temp_and_unique() {
        let mut ids = IdAllocator::new();
        let a = ids.next("topic");
        let b = ids.next("topic");
        assert!(a.is_temp());
        assert!(b.is_temp());
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(TEMP_PREFIX));
    }

    #[test]
    fn wire_classification_by_reserved_prefix() {
        assert!(EntityId::from_wire("tmp-item-3").is_temp());
        assert!(!EntityId::from_wire("0e64a0e4-8a1b-4a6f-9c21-000000000001").is_temp());
    }
}
