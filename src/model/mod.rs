pub mod resolved;
pub mod validator;

pub use resolved::*;
pub use validator::*;

/// A stored entity: column name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;
