pub mod network;
pub mod rate_limit;

pub use network::{NetworkContext, client_address};
pub use rate_limit::RateLimiter;
