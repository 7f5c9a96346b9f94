//! Execution core of the Syntactic playground: a fixed-window rate limiter,
//! a local JavaScript sandbox, a remote multi-language execution proxy and
//! the HTTP surface tying them together.

pub mod exec_log;
pub mod execution;
pub mod http_server;
pub mod piston;
pub mod rate_limit;
pub mod sandbox;
pub mod state;
