//! Rate-limited access to the remote source.
//!
//! This module provides the budget-enforcing client, the paginator built on
//! top of it, and the retry policy its callers apply.

pub mod paginator;
pub mod rate_limit;
pub mod retry;

pub use paginator::Paginator;
pub use rate_limit::{BudgetState, ClientConfig, RateLimitedClient};
pub use retry::RetryPolicy;
