//! Collaborators built on the persistence core.

pub mod tasks;
pub mod vault;
