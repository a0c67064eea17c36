//! Shared networking context: one lazily-built runtime + HTTP client, reference-counted across
//! every multiplexer and streaming session that acquires it.
//!
//! The first `acquire` builds the state, dropping the last `NetLease` tears it down, and a later
//! `acquire` builds it again. Independent clients in one process can share a single context.

use crate::net::TransportError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Runtime;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// State built on first acquire. The runtime is single-threaded: it only makes progress while a
/// multiplexer or session is inside one of its bounded `block_on` calls.
#[derive(Clone)]
pub(crate) struct NetState {
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) client: reqwest::Client,
}

struct ContextInner {
    owners: AtomicUsize,
    request_timeout: Duration,
    state: Mutex<Option<NetState>>,
}

/// Owning handle to the shared networking state. Clones share the same counter.
#[derive(Clone)]
pub struct NetContext {
    inner: Arc<ContextInner>,
}

impl Default for NetContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NetContext {
    pub fn new() -> Self {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Context whose HTTP client gives up on a single exchange after `timeout`.
    pub fn with_request_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                owners: AtomicUsize::new(0),
                request_timeout: timeout,
                state: Mutex::new(None),
            }),
        }
    }

    /// Take a reference on the shared state, building it if this is the first owner.
    pub fn acquire(&self) -> Result<NetLease, TransportError> {
        let mut guard = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            log::info!("initializing networking context");
            *guard = Some(build_state(self.inner.request_timeout)?);
        }
        let state = match guard.as_ref() {
            Some(state) => state.clone(),
            None => return Err(TransportError::Init("networking state missing".to_string())),
        };
        let owners = self.inner.owners.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("networking context ref (owners: {})", owners);
        Ok(NetLease {
            state,
            ctx: Arc::clone(&self.inner),
        })
    }

    /// Number of live leases.
    pub fn owners(&self) -> usize {
        self.inner.owners.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

fn build_state(timeout: Duration) -> Result<NetState, TransportError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TransportError::Init(format!("building runtime: {}", e)))?;
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ferrocord/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TransportError::Init(format!("building http client: {}", e)))?;
    Ok(NetState {
        runtime: Arc::new(runtime),
        client,
    })
}

/// One reference on a `NetContext`. Released on drop.
pub struct NetLease {
    state: NetState,
    ctx: Arc<ContextInner>,
}

impl NetLease {
    pub(crate) fn runtime(&self) -> &Runtime {
        &self.state.runtime
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.state.client
    }
}

impl Drop for NetLease {
    fn drop(&mut self) {
        let mut guard = self
            .ctx
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let prev = self.ctx.owners.fetch_sub(1, Ordering::SeqCst);
        log::trace!("networking context unref (owners: {})", prev.saturating_sub(1));
        if prev == 1 {
            log::info!("last networking owner released; tearing down context");
            guard.take();
        }
    }
}
