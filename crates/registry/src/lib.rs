//! Model registry: lifecycle status of every model and the rules for
//! moving between states.

pub mod schema;
pub mod store;

pub use schema::*;
pub use store::*;
