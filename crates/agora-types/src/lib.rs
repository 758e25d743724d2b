//! Models shared by the REST surface, the live channel and the storage layer.

pub mod api;
pub mod events;
pub mod models;
