//! Runtime configuration.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};

use crate::error::BuildError;
use crate::runtime::Runtime;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_THREAD_NAME: &str = "evq-loop";

/// Builds a [`Runtime`].
///
/// # Examples
///
/// ```ignore
/// let runtime = Builder::new()
///     .batch_size(32)
///     .thread_name("my-loop")
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    pub(crate) batch_size: usize,
    pub(crate) thread_name: String,
    pub(crate) metrics_addr: Option<SocketAddr>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            metrics_addr: None,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from the environment.
    ///
    /// | Variable           | Setting                                        |
    /// | ------------------ | ---------------------------------------------- |
    /// | `EVQ_BATCH_SIZE`   | [`batch_size`](Self::batch_size)               |
    /// | `EVQ_THREAD_NAME`  | [`thread_name`](Self::thread_name)             |
    /// | `EVQ_METRICS_PORT` | Prometheus listener on `127.0.0.1:<port>`      |
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, BuildError> {
        let mut builder = Self::default();

        if let Some(value) = read_var("EVQ_BATCH_SIZE") {
            let batch_size = value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(BuildError::InvalidEnv {
                    var: "EVQ_BATCH_SIZE",
                    value,
                })?;
            builder = builder.batch_size(batch_size);
        }
        if let Some(name) = read_var("EVQ_THREAD_NAME") {
            builder = builder.thread_name(name);
        }
        if let Some(value) = read_var("EVQ_METRICS_PORT") {
            let port = value.parse::<u16>().map_err(|_| BuildError::InvalidEnv {
                var: "EVQ_METRICS_PORT",
                value,
            })?;
            builder = builder.metrics_addr((Ipv4Addr::LOCALHOST, port).into());
        }

        Ok(builder)
    }

    /// Maximum number of events handled per wake-up of the loop.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Name of the event loop thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Serves Prometheus metrics on `addr`.
    pub fn metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    pub fn build(self) -> Result<Runtime, BuildError> {
        Runtime::start(self)
    }
}

fn read_var(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}
