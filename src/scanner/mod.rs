//! Release discovery: tree sizing, oldest-release selection, tree removal.

pub mod deletion;
pub mod release;
pub mod release_scanner;
pub mod walker;
