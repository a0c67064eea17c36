//! HTTP multiplexer: any number of concurrent exchanges, no thread per request, advanced only by
//! `poll()`.
//!
//! Each `send` pushes one exchange future into a `FuturesUnordered`. `poll` enters the shared
//! single-threaded runtime for at most `POLL_WAIT`, collects every exchange that finished, and
//! runs their completion callbacks after leaving the runtime. Callbacks run exactly once; an
//! exchange dropped by `shutdown` (or by dropping the multiplexer) never calls back.

use crate::net::context::{NetContext, NetLease};
use crate::net::TransportError;
use futures_util::future::LocalBoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use reqwest::Method;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Longest `poll` will wait for the first pending exchange to finish.
pub const POLL_WAIT: Duration = Duration::from_millis(100);

/// Called with each body chunk as it arrives.
pub type DataCallback = Box<dyn FnMut(&[u8])>;
/// Called once when the exchange completes or fails.
pub type DoneCallback = Box<dyn FnOnce(Result<HttpResponse, TransportError>)>;

/// Correlates a `send` with its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// One outbound HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Ignored for GET.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Status and full body of a completed exchange. Non-2xx statuses are not errors here.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

struct Finished {
    handle: RequestHandle,
    outcome: Result<HttpResponse, TransportError>,
    on_done: DoneCallback,
}

pub struct Multiplexer {
    in_flight: FuturesUnordered<LocalBoxFuture<'static, Finished>>,
    next_handle: u64,
    closed: bool,
    lease: NetLease,
}

impl Multiplexer {
    /// Take a reference on the shared context. Fails only if the context cannot be initialized.
    pub fn open(ctx: &NetContext) -> Result<Self, TransportError> {
        log::debug!("new multiplexer");
        Ok(Self {
            in_flight: FuturesUnordered::new(),
            next_handle: 0,
            closed: false,
            lease: ctx.acquire()?,
        })
    }

    /// Number of exchanges that have not completed yet.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Enqueue an exchange. Never blocks; nothing goes on the wire until the next `poll`.
    pub fn send(
        &mut self,
        request: HttpRequest,
        on_data: Option<DataCallback>,
        on_done: DoneCallback,
    ) -> RequestHandle {
        self.next_handle += 1;
        let handle = RequestHandle(self.next_handle);
        if self.closed {
            log::error!("send on closed multiplexer ({} {})", request.method, request.url);
            on_done(Err(TransportError::Closed));
            return handle;
        }

        log::trace!("{} request to {} (handle {})", request.method, request.url, handle.0);
        for (name, _) in &request.headers {
            log::trace!("header {:?}", name);
        }

        let client = self.lease.client().clone();
        self.in_flight.push(
            async move {
                let outcome = perform(client, request, on_data).await;
                Finished {
                    handle,
                    outcome,
                    on_done,
                }
            }
            .boxed_local(),
        );
        handle
    }

    /// Enqueue an exchange and drive `poll` until that exchange completes. Other in-flight
    /// exchanges keep progressing (and calling back) meanwhile.
    pub fn send_await(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let slot: Rc<RefCell<Option<Result<HttpResponse, TransportError>>>> =
            Rc::new(RefCell::new(None));
        let sink = Rc::clone(&slot);
        self.send(
            request,
            None,
            Box::new(move |outcome| {
                *sink.borrow_mut() = Some(outcome);
            }),
        );

        loop {
            if let Some(outcome) = slot.borrow_mut().take() {
                return outcome;
            }
            self.poll()?;
        }
    }

    /// Advance every in-flight exchange. Waits at most `POLL_WAIT` when something is pending,
    /// then runs the completion callback of each exchange that finished. Returns how many did.
    pub fn poll(&mut self) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.in_flight.is_empty() {
            return Ok(0);
        }

        let in_flight = &mut self.in_flight;
        let finished = self.lease.runtime().block_on(async {
            let mut finished = Vec::new();
            if let Ok(Some(first)) = tokio::time::timeout(POLL_WAIT, in_flight.next()).await {
                finished.push(first);
                while let Some(Some(next)) = in_flight.next().now_or_never() {
                    finished.push(next);
                }
            }
            finished
        });

        let count = finished.len();
        for done in finished {
            match &done.outcome {
                Ok(response) => log::debug!(
                    "request {} completed with status {}",
                    done.handle.0,
                    response.status
                ),
                Err(e) => log::error!("request {} failed: {}", done.handle.0, e),
            }
            (done.on_done)(done.outcome);
        }
        Ok(count)
    }

    /// Abandon every in-flight exchange (their callbacks never fire) and refuse further polls.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        let abandoned = self.abandon();
        if abandoned > 0 {
            log::debug!("multiplexer shutdown abandoned {} request(s)", abandoned);
        }
        self.closed = true;
    }

    fn abandon(&mut self) -> usize {
        let _entered = self.lease.runtime().enter();
        let in_flight = std::mem::take(&mut self.in_flight);
        let count = in_flight.len();
        drop(in_flight);
        count
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.abandon();
    }
}

async fn perform(
    client: reqwest::Client,
    request: HttpRequest,
    mut on_data: Option<DataCallback>,
) -> Result<HttpResponse, TransportError> {
    let mut builder = client.request(request.method.clone(), &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if request.method != Method::GET {
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
    }

    let mut response = builder.send().await?;
    let status = response.status().as_u16();
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if let Some(cb) = on_data.as_mut() {
                    cb(&chunk[..]);
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                return Err(TransportError::Body {
                    status,
                    message: e.to_string(),
                })
            }
        }
    }
    Ok(HttpResponse { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn poll_with_nothing_pending_returns_immediately() {
        let ctx = NetContext::new();
        let mut mux = Multiplexer::open(&ctx).unwrap();
        assert_eq!(mux.poll().unwrap(), 0);
        assert_eq!(mux.pending(), 0);
    }

    #[test]
    fn handles_are_unique() {
        let ctx = NetContext::new();
        let mut mux = Multiplexer::open(&ctx).unwrap();
        let a = mux.send(
            HttpRequest::new(Method::GET, "http://127.0.0.1:9/"),
            None,
            Box::new(|_| {}),
        );
        let b = mux.send(
            HttpRequest::new(Method::GET, "http://127.0.0.1:9/"),
            None,
            Box::new(|_| {}),
        );
        assert_ne!(a, b);
        assert_eq!(mux.pending(), 2);
    }

    #[test]
    fn shutdown_abandons_without_calling_back() {
        let ctx = NetContext::new();
        let mut mux = Multiplexer::open(&ctx).unwrap();
        let called = Rc::new(Cell::new(false));
        let flag = Rc::clone(&called);
        mux.send(
            HttpRequest::new(Method::GET, "http://127.0.0.1:9/"),
            None,
            Box::new(move |_| flag.set(true)),
        );

        mux.shutdown();
        assert!(mux.is_closed());
        assert_eq!(mux.pending(), 0);
        assert!(matches!(mux.poll(), Err(TransportError::Closed)));
        assert!(!called.get());
    }

    #[test]
    fn send_after_shutdown_fails_through_callback() {
        let ctx = NetContext::new();
        let mut mux = Multiplexer::open(&ctx).unwrap();
        mux.shutdown();
        let result = mux.send_await(HttpRequest::new(Method::GET, "http://127.0.0.1:9/"));
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn multiplexers_share_one_context() {
        let ctx = NetContext::new();
        let a = Multiplexer::open(&ctx).unwrap();
        let b = Multiplexer::open(&ctx).unwrap();
        assert_eq!(ctx.owners(), 2);
        drop(a);
        drop(b);
        assert!(!ctx.is_initialized());
    }
}
