//! Process-facing collaborators: free-space probing and release copying.

pub mod probe;
pub mod sync;
