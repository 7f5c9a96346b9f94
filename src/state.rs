//! Shared application state.

use std::sync::Arc;

use crate::exec_log::ExecutionLog;
use crate::piston::PistonClient;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub piston: Arc<PistonClient>,
    pub exec_log: Arc<dyn ExecutionLog>,
}

impl AppState {
    pub fn new(limiter: RateLimiter, piston: PistonClient, exec_log: Arc<dyn ExecutionLog>) -> Self {
        Self {
            limiter: Arc::new(limiter),
            piston: Arc::new(piston),
            exec_log,
        }
    }
}
