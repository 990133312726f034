//! Storage and relationship layer for a film-rating service: films and users,
//! the like relation with its popularity ranking, and a friendship graph with
//! mutual confirmation.

pub mod config;
pub mod database;
pub mod error;
pub mod memory;
pub mod model;
pub mod popularity;
pub mod service;
pub mod social;
pub mod validate;

pub use database::{open_sled, CatalogStore, FriendStore, IdentityStore, LikeStore, Storage};
pub use error::{Error, ErrorKind, Result};
pub use memory::MemoryStorage;
pub use service::FilmRate;
