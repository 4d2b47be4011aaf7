//! Utility
mod binary_heap;
pub(crate) use self::binary_heap::*;
