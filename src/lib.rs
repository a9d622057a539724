pub mod auth;
pub mod hosts;
pub mod metrics;
pub mod probe;
pub mod ratelimit;
pub mod server;
pub mod session;
pub mod wol;
