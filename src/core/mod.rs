//! Persistence core: signed document storage, the recovery journal and
//! dependency-graph validation, plus the primitives they share.

pub mod config;
pub mod dependency;
pub mod error;
pub mod filesystem;
pub mod integrity;
pub mod journal;
pub mod locks;
pub mod logging;
pub mod model;
pub mod store;
pub mod time;
