//! Opaque ID newtypes for arena-held records.

use crate::arena::ArenaId;
use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
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
    /// Position of a patch within its module's stack (0-based).
    PatchId
);

impl PatchId {
    /// Returns the 1-based position used in patch file names and reports.
    pub fn ordinal(self) -> usize {
        self.0 as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_is_one_based() {
        assert_eq!(PatchId::from_raw(0).ordinal(), 1);
        assert_eq!(PatchId::from_raw(9).ordinal(), 10);
    }

    #[test]
    fn ids_order_by_position() {
        assert!(PatchId::from_raw(1) < PatchId::from_raw(2));
    }
}
