pub mod api;
pub mod catalog;
pub mod db;
pub mod error;
pub mod models;
pub mod mutation;
pub mod persist;
pub mod service;
pub mod store;
pub mod views;

#[cfg(test)]
mod testing;

pub use api::PantryApi;
pub use error::{ApiError, MutationError, Operation, ValidationError};
pub use service::Pantry;
pub use store::EntityStore;
