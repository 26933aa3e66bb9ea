//! Directory enumeration jobs

mod enumerator;

pub(crate) use enumerator::DirectoryEnumerator;
pub use enumerator::{ListAction, ListCallback, ListOptions, ListStatus};
