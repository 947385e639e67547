pub mod cli;
pub mod executor;
pub mod mock_executor;
pub mod normalizer;
pub mod rate_limit;

pub use cli::ClaudeCli;
pub use executor::{ExecutionOutcome, ExecutionRequest, Executor};
pub use normalizer::{normalize, parse_line, LineParser};
pub use rate_limit::RateLimitInfo;
