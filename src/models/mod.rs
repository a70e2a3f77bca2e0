mod connect_account;
mod identity;
mod subscription;
mod transaction;

pub use connect_account::*;
pub use identity::*;
pub use subscription::*;
pub use transaction::*;
