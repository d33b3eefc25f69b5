//! # Collection of Basic Data Structures
//!
//! - `storage`: Arena-based storage, entries are named by stable handles.
//! - `linked_list`: Intrusive linked list over arena handles, used for the
//!   program order of nodes.

pub mod linked_list;
pub mod storage;
