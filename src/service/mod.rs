//! Manager: generic persistence operations behind every model resource.

mod manager;
pub use manager::{Commit, Manager};
