//! Database models split into domain-specific modules.

pub mod query;
pub mod query_id;
pub mod user;

pub use query::*;
pub use query_id::*;
pub use user::*;
