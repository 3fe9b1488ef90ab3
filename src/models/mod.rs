mod generation;
mod transaction;
mod user;

pub use generation::*;
pub use transaction::*;
pub use user::*;
