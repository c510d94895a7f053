//! Repository layer for database operations.

mod account;
mod group;

pub use account::AccountRepository;
pub use group::GroupRepository;
