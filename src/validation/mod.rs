//! Transaction structures and canonical byte layouts

mod transaction;

pub use transaction::*;
