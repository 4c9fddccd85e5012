//! Upstream EPC service integration.

pub mod epc_client {
    pub use crate::epc_client::*;
}

pub mod rate_limiter {
    pub use crate::rate_limiter::*;
}

pub mod circuit_breaker {
    pub use crate::circuit_breaker::*;
}

pub mod cache_validator {
    pub use crate::cache_validator::*;
}
