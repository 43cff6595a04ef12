//! Broker gateway, retry/timeout wrapper, and an in-memory paper broker.
//!
//! The decision engine sees a broker only through `ExecutionGateway`, which
//! reports success or failure. `RetryingBroker` adapts a fallible
//! `BrokerGateway` to that shape: every attempt runs under an explicit
//! timeout, retryable failures back off exponentially, and exhausting the
//! budget becomes a plain `false` for that one symbol.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use flowgate_core::admission::ExecutionGateway;
use flowgate_core::domain::Side;

use crate::config::BrokerConfig;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("{op} {symbol} timed out after {timeout_ms}ms")]
    Timeout {
        op: &'static str,
        symbol: String,
        timeout_ms: u64,
    },

    #[error("broker rejected {op} {symbol}: {reason}")]
    Rejected {
        op: &'static str,
        symbol: String,
        reason: String,
    },

    #[error("no open position in {0}")]
    NotHeld(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl BrokerError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Timeout { .. } | BrokerError::Unavailable(_))
    }
}

/// Raw broker primitives.
pub trait BrokerGateway: Send + Sync {
    fn close_position(&self, symbol: &str) -> Result<(), BrokerError>;
    fn open_position(&self, symbol: &str, side: Side, size: f64) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Open { side: Side },
    Close,
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::Open { .. } => "open",
            Op::Close => "close",
        }
    }
}

/// Timeout and bounded retries around a `BrokerGateway`.
pub struct RetryingBroker {
    inner: Arc<dyn BrokerGateway>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryingBroker {
    pub fn new(inner: Arc<dyn BrokerGateway>, config: &BrokerConfig) -> Self {
        Self {
            inner,
            timeout: Duration::from_millis(config.timeout_ms),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// One attempt under the timeout. A call that overruns is abandoned on
    /// its worker thread; its eventual result is discarded.
    fn attempt(&self, op: Op, symbol: &str, size: f64) -> Result<(), BrokerError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let sym = symbol.to_string();
        thread::Builder::new()
            .name(format!("broker-{}-{symbol}", op.name()))
            .spawn(move || {
                let result = match op {
                    Op::Open { side } => inner.open_position(&sym, side, size),
                    Op::Close => inner.close_position(&sym),
                };
                let _ = tx.send(result);
            })
            .map_err(|e| BrokerError::Unavailable(format!("cannot spawn broker call: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BrokerError::Timeout {
                op: op.name(),
                symbol: symbol.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(BrokerError::Unavailable(format!("{} {symbol}: broker call panicked", op.name())))
            }
        }
    }

    fn call_with_retry(&self, op: Op, symbol: &str, size: f64) -> Result<(), BrokerError> {
        let mut last_error = None;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff * 2u32.pow(attempt - 1);
                thread::sleep(delay);
            }
            match self.attempt(op, symbol, size) {
                Ok(()) => {
                    debug!(op = op.name(), symbol, attempt = attempt + 1, "broker call succeeded");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!(op = op.name(), symbol, attempt = attempt + 1, error = %e, "broker call failed; retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| BrokerError::Unavailable("no attempts made".into())))
    }

    /// Close `symbol`. A broker that reports no position counts as closed:
    /// an earlier attempt that overran its timeout may still have filled.
    pub fn try_close(&self, symbol: &str) -> Result<(), BrokerError> {
        match self.call_with_retry(Op::Close, symbol, 0.0) {
            Err(BrokerError::NotHeld(_)) => {
                warn!(symbol, "broker holds no position; treating close as filled");
                Ok(())
            }
            other => other,
        }
    }

    pub fn try_open(&self, symbol: &str, side: Side, size: f64) -> Result<(), BrokerError> {
        self.call_with_retry(Op::Open { side }, symbol, size)
    }
}

impl ExecutionGateway for RetryingBroker {
    fn close_position(&self, symbol: &str) -> bool {
        match self.try_close(symbol) {
            Ok(()) => true,
            Err(e) => {
                warn!(symbol, error = %e, "close failed after retries");
                false
            }
        }
    }

    fn open_position(&self, symbol: &str, side: Side, size: f64) -> bool {
        match self.try_open(symbol, side, size) {
            Ok(()) => true,
            Err(e) => {
                warn!(symbol, error = %e, "open failed after retries");
                false
            }
        }
    }
}

// ─── Paper broker ───────────────────────────────────────────────────

/// A fill recorded by the paper broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperFill {
    pub symbol: String,
    pub action: String,
    pub side: Option<Side>,
    pub size: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    holdings: BTreeMap<String, (Side, f64)>,
    fills: Vec<PaperFill>,
    fail_close: BTreeSet<String>,
    fail_open: BTreeSet<String>,
    /// Transient failures still to be served before calls succeed.
    flaky: BTreeMap<String, u32>,
    delay: Option<Duration>,
}

/// In-memory broker. Fills instantly unless told to fail.
#[derive(Debug, Default)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed holdings, e.g. positions restored from disk.
    pub fn with_holdings<'a>(self, holdings: impl IntoIterator<Item = (&'a str, Side, f64)>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            for (symbol, side, size) in holdings {
                state.holdings.insert(symbol.to_string(), (side, size));
            }
        }
        self
    }

    pub fn fail_close(&self, symbol: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_close.insert(symbol.to_string());
        }
    }

    pub fn fail_open(&self, symbol: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_open.insert(symbol.to_string());
        }
    }

    /// The next `failures` calls for `symbol` fail with a retryable error.
    pub fn flaky(&self, symbol: &str, failures: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.flaky.insert(symbol.to_string(), failures);
        }
    }

    /// Every call sleeps this long first.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delay = Some(delay);
        }
    }

    pub fn holdings(&self) -> BTreeMap<String, (Side, f64)> {
        self.state.lock().map(|s| s.holdings.clone()).unwrap_or_default()
    }

    pub fn fills(&self) -> Vec<PaperFill> {
        self.state.lock().map(|s| s.fills.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PaperState>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Unavailable("paper broker state poisoned".into()))
    }

    fn pre_call(&self, op: &'static str, symbol: &str) -> Result<(), BrokerError> {
        let delay = {
            let mut state = self.lock()?;
            if let Some(left) = state.flaky.get_mut(symbol) {
                if *left > 0 {
                    *left -= 1;
                    return Err(BrokerError::Unavailable(format!("{op} {symbol}: transient failure")));
                }
            }
            state.delay
        };
        if let Some(d) = delay {
            thread::sleep(d);
        }
        Ok(())
    }
}

impl BrokerGateway for PaperBroker {
    fn close_position(&self, symbol: &str) -> Result<(), BrokerError> {
        self.pre_call("close", symbol)?;
        let mut state = self.lock()?;
        if state.fail_close.contains(symbol) {
            return Err(BrokerError::Rejected {
                op: "close",
                symbol: symbol.to_string(),
                reason: "scripted failure".into(),
            });
        }
        let Some((side, size)) = state.holdings.remove(symbol) else {
            return Err(BrokerError::NotHeld(symbol.to_string()));
        };
        state.fills.push(PaperFill {
            symbol: symbol.to_string(),
            action: "close".into(),
            side: Some(side),
            size,
        });
        Ok(())
    }

    fn open_position(&self, symbol: &str, side: Side, size: f64) -> Result<(), BrokerError> {
        self.pre_call("open", symbol)?;
        let mut state = self.lock()?;
        if state.fail_open.contains(symbol) {
            return Err(BrokerError::Rejected {
                op: "open",
                symbol: symbol.to_string(),
                reason: "scripted failure".into(),
            });
        }
        state.holdings.insert(symbol.to_string(), (side, size));
        state.fills.push(PaperFill {
            symbol: symbol.to_string(),
            action: "open".into(),
            side: Some(side),
            size,
        });
        Ok(())
    }
}
