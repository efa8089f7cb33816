//! Opaque ID newtypes for IR entities.

use crate::arena::ArenaId;
use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates an ID from a raw `u32` index.
            pub fn from_raw(index: u32) -> Self {
                Self(index)
            }

            /// Returns the raw `u32` index.
            pub fn as_raw(self) -> u32 {
                self.0
            }
        }

        impl ArenaId for $name {
            fn from_raw(index: u32) -> Self {
                Self(index)
            }

            fn as_raw(self) -> u32 {
                self.0
            }
        }
    };
}

define_id!(
    /// A module definition within a [`Design`](crate::Design).
    ModuleId
);

define_id!(
    /// A port, net, or register within one module.
    SignalId
);

define_id!(
    /// A memory block within one module.
    MemoryId
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn id_roundtrip() {
        assert_eq!(SignalId::from_raw(42).as_raw(), 42);
        assert_eq!(ArenaId::index(MemoryId::from_raw(3)), 3);
    }

    #[test]
    fn ids_hash_by_value() {
        let set: HashSet<SignalId> = [SignalId::from_raw(1), SignalId::from_raw(1)].into();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn serde_transparent() {
        let json = serde_json::to_string(&ModuleId::from_raw(5)).unwrap();
        assert_eq!(json, "5");
    }
}
