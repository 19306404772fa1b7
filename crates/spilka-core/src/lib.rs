pub mod directory;
pub mod error;
pub mod ledger;
pub mod permissions;
pub mod rate_limit;
pub mod settings;

pub use directory::Directory;
pub use error::{MessagingError, Result};
pub use ledger::Ledger;
pub use rate_limit::RateLimiter;
