//! Database repository layer

pub mod identity_repo;
pub mod memory;

pub use identity_repo::{IdentityRepository, PgIdentityRepository};
pub use memory::InMemoryIdentityRepository;
