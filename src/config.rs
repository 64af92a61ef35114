//! Process-level settings for the HTTP service.
//!
//! Everything about an individual run (weights, rest days, solver limits)
//! travels in the request body; only the listener, the solve concurrency
//! and the solver thread count are read from the environment.

use std::net::SocketAddr;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_CONCURRENT_SOLVES: usize = 2;
pub const DEFAULT_SOLVER_THREADS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Solve requests allowed to run at once; further requests wait.
    pub max_concurrent_solves: usize,
    /// HiGHS threads for every solve of the process. The per-request
    /// `workers` setting cannot change it once the first solve has run.
    pub solver_threads: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_concurrent_solves: DEFAULT_MAX_CONCURRENT_SOLVES,
            solver_threads: DEFAULT_SOLVER_THREADS,
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SCHEDULER_ADDR`: listen address (default: 127.0.0.1:8080)
    /// - `SCHEDULER_MAX_CONCURRENT_SOLVES`: simultaneous solves (default: 2)
    /// - `SCHEDULER_SOLVER_THREADS`: HiGHS threads per process (default: 1)
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let bind_addr = lookup("SCHEDULER_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| format!("SCHEDULER_ADDR is not a socket address: {e}"))?;

        let max_concurrent_solves = positive(
            &lookup,
            "SCHEDULER_MAX_CONCURRENT_SOLVES",
            DEFAULT_MAX_CONCURRENT_SOLVES,
        )?;
        let solver_threads = positive(&lookup, "SCHEDULER_SOLVER_THREADS", DEFAULT_SOLVER_THREADS)?;

        Ok(Self {
            bind_addr,
            max_concurrent_solves,
            solver_threads,
        })
    }
}

fn positive<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr + PartialEq + From<u8>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(n) if n != T::from(0) => Ok(n),
            _ => Err(format!("{key} must be a positive integer, got '{raw}'")),
        },
        None => Ok(default),
    }
}
