//! Availability gate
//!
//! Every RPC handler runs inside [`Gate::intercept`]. In maintenance mode the
//! gate short-circuits with `Unavailable` before the handler runs: unary calls
//! other than Status are refused, and streaming calls are refused without
//! exception. Gated or not, each call is timed and recorded as a debug event,
//! including requests that name no call at all ([`Gate::refuse`]).

use std::fmt;
use std::future::Future;
use std::time::Instant;

use tracing::debug;

use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Status,
    Publish,
    Subscribe,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Status => "/switchback.v1.Switchback/Status",
            Method::Publish => "/switchback.v1.Switchback/Publish",
            Method::Subscribe => "/switchback.v1.Switchback/Subscribe",
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Method::Publish | Method::Subscribe)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Gate {
    maintenance: bool,
}

impl Gate {
    pub fn new(maintenance: bool) -> Self {
        Self { maintenance }
    }

    pub fn maintenance(&self) -> bool {
        self.maintenance
    }

    /// Whether `method` may run in the current mode.
    pub fn admits(&self, method: Method) -> bool {
        if !self.maintenance {
            return true;
        }
        method == Method::Status
    }

    /// Run `handler` for `method` if admitted, recording method, latency and
    /// outcome either way. A rejected handler is dropped without being polled.
    pub async fn intercept<T, F>(&self, method: Method, handler: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();

        let result = if self.admits(method) {
            handler.await
        } else {
            Err(Error::Unavailable)
        };

        record(method.name(), method.is_streaming(), start, result.as_ref().err());
        result
    }

    /// Turn away a request that names no known call, recording it like any
    /// other. In maintenance mode the refusal is `Unavailable`, as it would be
    /// for every call but Status; otherwise `error` is returned as is.
    pub fn refuse(&self, request: &str, error: Error) -> Error {
        let start = Instant::now();
        let error = if self.maintenance {
            Error::Unavailable
        } else {
            error
        };
        record(request, false, start, Some(&error));
        error
    }
}

fn record(method: &str, streaming: bool, start: Instant, error: Option<&Error>) {
    let latency = start.elapsed();
    let kind = if streaming {
        "stream request"
    } else {
        "unary request"
    };
    match error {
        None => debug!(method, latency = ?latency, "{kind}"),
        Some(e) => debug!(method, latency = ?latency, error = %e, "{kind}"),
    }
}
