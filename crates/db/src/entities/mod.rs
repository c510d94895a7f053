//! Database entities.

pub mod account;
pub mod group;
pub mod group_member;

pub use account::Entity as Account;
pub use group::Entity as Group;
pub use group_member::Entity as GroupMember;
