//! Servlet runtime: accept loops, filter chain and handler dispatch.

use crate::{
    config::ServletConfig,
    errors::Error,
    http::{request::Request, response::Response},
    server::{Client, Server},
    thread::{Thread, DEFAULT_JOIN_TIMEOUT},
};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

/// The terminal request handler an application registers.
///
/// Contract: a handler may read at most
/// [`Request::content_length`] body bytes, must set a status code before
/// writing any header, and must declare a content length before writing
/// body bytes; otherwise the response latches an error and the
/// connection closes after the exchange.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &mut Request, response: &mut Response);
}

impl<F> Handler for F
where
    F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: &mut Request, response: &mut Response) {
        self(request, response)
    }
}

/// A filter interposed before the terminal handler.
///
/// A filter continues the chain with [`FilterChain::next`] or
/// short-circuits by not calling it. Filter state lives on the
/// implementing type itself.
pub trait Filter: Send + Sync + 'static {
    fn handle(&self, request: &mut Request, response: &mut Response, chain: &FilterChain<'_>);
}

impl<F> Filter for F
where
    F: Fn(&mut Request, &mut Response, &FilterChain<'_>) + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: &mut Request, response: &mut Response, chain: &FilterChain<'_>) {
        self(request, response, chain)
    }
}

/// Position in the linear filter chain.
///
/// `next` invokes the following filter, or the terminal handler once the
/// chain is exhausted.
pub struct FilterChain<'a> {
    filters: &'a [Arc<dyn Filter>],
    handler: &'a dyn Handler,
    index: usize,
}

impl FilterChain<'_> {
    /// Continues with the next filter in the chain, ending at the
    /// terminal handler.
    pub fn next(&self, request: &mut Request, response: &mut Response) {
        match self.filters.get(self.index) {
            Some(filter) => filter.handle(
                request,
                response,
                &FilterChain {
                    filters: self.filters,
                    handler: self.handler,
                    index: self.index + 1,
                },
            ),
            None => self.handler.handle(request, response),
        }
    }
}

type OnThreadStart = Arc<dyn Fn(&ServletThread<'_>) + Send + Sync>;

struct Shared {
    server: Arc<Server>,
    handler: Box<dyn Handler>,
    filters: Vec<Arc<dyn Filter>>,
    on_thread_start: Option<OnThreadStart>,
}

/// Handle passed to the per-thread start callback.
///
/// The callback owns the thread's setup (pushing
/// [`Context`](crate::Context) values, logging) and must call
/// [`serve`](ServletThread::serve) to enter the accept loop.
pub struct ServletThread<'a> {
    shared: &'a Shared,
}

impl ServletThread<'_> {
    /// Runs the accept loop until the server stops.
    pub fn serve(&self) {
        accept_loop(self.shared);
    }

    pub fn server(&self) -> &Server {
        &self.shared.server
    }
}

/// The composite of a [`Server`], a filter chain and a terminal
/// [`Handler`], served by a fixed set of accept threads.
///
/// Built with [`Servlet::builder`]; the server moves into the servlet and
/// is shared back out as an [`Arc`] via [`Servlet::server`] so a signal
/// handler can call [`Server::stop`].
pub struct Servlet {
    shared: Arc<Shared>,
    config: ServletConfig,
}

impl Servlet {
    pub fn builder() -> ServletBuilder {
        ServletBuilder {
            server: None,
            handler: None,
            filters: Vec::new(),
            config: ServletConfig::default(),
            on_thread_start: None,
        }
    }

    /// Shared handle to the owned server.
    pub fn server(&self) -> Arc<Server> {
        self.shared.server.clone()
    }

    /// Starts the server (if not already started), spawns the accept
    /// threads and serves on the calling thread until the server stops.
    ///
    /// The calling thread is the final accept loop: `run` returns only
    /// after [`Server::stop`] and once every spawned thread wound down.
    pub fn run(self) -> Result<(), Error> {
        if !self.shared.server.is_running() {
            self.shared.server.start()?;
        }

        log::info!("servlet spawning {} accept threads", self.config.num_accept_threads);
        let mut threads = Vec::new();
        for index in 0..self.config.num_accept_threads {
            let shared = self.shared.clone();
            let mut thread = Thread::new(format!("servlet-{index}"), move || thread_main(&shared));
            match thread.start() {
                Ok(()) => threads.push(thread),
                // Earlier threads keep serving; the servlet still works
                // with fewer loops.
                Err(e) => log::error!("failed to start servlet thread {index}: {e}"),
            }
        }

        thread_main(&self.shared);

        for mut thread in threads {
            if !thread.wait(Some(DEFAULT_JOIN_TIMEOUT)) {
                log::warn!("servlet thread {} did not stop in time", thread.name());
            }
        }
        Ok(())
    }
}

/// Builder for [`Servlet`]. `server` and `handler` are required.
pub struct ServletBuilder {
    server: Option<Server>,
    handler: Option<Box<dyn Handler>>,
    filters: Vec<Arc<dyn Filter>>,
    config: ServletConfig,
    on_thread_start: Option<OnThreadStart>,
}

impl ServletBuilder {
    /// Hands the server over to the servlet.
    pub fn server(mut self, server: Server) -> Self {
        self.server = Some(server);
        self
    }

    /// Sets the terminal handler.
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Appends a filter; filters run in registration order.
    pub fn filter<F: Filter>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn config(mut self, config: ServletConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs a per-thread start callback; it must call
    /// [`ServletThread::serve`].
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServletThread<'_>) + Send + Sync + 'static,
    {
        self.on_thread_start = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Servlet, Error> {
        let Some(server) = self.server else {
            return Err(Error::ConfigInvalid("servlet needs a server"));
        };
        let Some(handler) = self.handler else {
            return Err(Error::ConfigInvalid("servlet needs a handler"));
        };

        Ok(Servlet {
            shared: Arc::new(Shared {
                server: Arc::new(server),
                handler,
                filters: self.filters,
                on_thread_start: self.on_thread_start,
            }),
            config: self.config,
        })
    }
}

fn thread_main(shared: &Shared) {
    let thread = ServletThread { shared };
    match &shared.on_thread_start {
        Some(on_start) => on_start(&thread),
        None => thread.serve(),
    }
}

/// One accept loop: request and response (with their fixed arenas) are
/// constructed once and reused for every connection this thread serves.
fn accept_loop(shared: &Shared) {
    let mut request = Request::new();
    let mut response = Response::new();

    while shared.server.is_running() {
        // Blocking accept; returns None on timeout and on shutdown, and
        // the loop test exits once the server stopped.
        let Some(client) = shared.server.accept() else {
            continue;
        };

        log::info!("[{}] connected", client.address());
        serve_connection(shared, &mut request, &mut response, client);
    }
}

/// Serves every request of one connection, reusing it while keep-alive
/// holds.
fn serve_connection(shared: &Shared, request: &mut Request, response: &mut Response, client: Client) {
    let address = client.address().to_string();

    // The read half goes to the request, the write half to the response.
    let mut read_half = client;
    loop {
        let write_half = match read_half.try_clone() {
            Ok(write_half) => write_half,
            Err(e) => {
                log::error!("[{address}] could not split the connection: {e}");
                break;
            }
        };

        request.reset(read_half);
        response.reset(write_half);

        let close = serve_request(shared, request, response);

        let reclaimed = (request.detach(), response.detach());
        if close {
            break;
        }
        match reclaimed {
            (Some(half), _) => read_half = half,
            (None, _) => break,
        }
    }

    log::info!("[{address}] disconnected");
}

/// One request/response cycle. Returns whether the connection must close.
fn serve_request(shared: &Shared, request: &mut Request, response: &mut Response) -> bool {
    if let Err(e) = request.read_headers() {
        log::info!("[{}] {e}", request.peer_addr());
        return true;
    }
    log::info!(
        "[{}] {} {}",
        request.peer_addr(),
        String::from_utf8_lossy(request.method()),
        String::from_utf8_lossy(request.uri()),
    );

    // The client's close intent is the default; the handler may override.
    response.set_close_intent(request.connection_close());

    let chain = FilterChain {
        filters: &shared.filters,
        handler: shared.handler.as_ref(),
        index: 0,
    };
    if catch_unwind(AssertUnwindSafe(|| chain.next(request, response))).is_err() {
        log::error!("[{}] {}", request.peer_addr(), Error::HandlerPanic);
        return true;
    }

    // The handler must drain the body it was promised; otherwise the
    // unread bytes would be parsed as the next request.
    if request.remaining_content_length() > 0 {
        log::error!(
            "[{}] handler left {} of {} body bytes unread, forcing close",
            request.peer_addr(),
            request.remaining_content_length(),
            request.content_length().unwrap_or(0),
        );
        return true;
    }

    // Handlers that wrote nothing still produce a complete header block.
    if response.flush_headers().is_err() {
        return true;
    }

    // A declared body that was not fully delivered poisons the stream.
    if response.remaining_bytes() > 0 {
        log::error!(
            "[{}] {} declared body bytes were never written, forcing close",
            request.peer_addr(),
            response.remaining_bytes(),
        );
        return true;
    }

    response.close_intent()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IpVersion, ServerConfig, SocketConfig};
    use std::{
        io::{Read, Write},
        net::{Ipv4Addr, SocketAddr, TcpStream},
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    fn loopback_server() -> Server {
        Server::new(ServerConfig {
            socket: SocketConfig {
                port: 0,
                ip_version: IpVersion::V4,
                bind_address: Some(Ipv4Addr::LOCALHOST),
                ..SocketConfig::default()
            },
            ..ServerConfig::default()
        })
    }

    // Runs a servlet on an ephemeral port; returns its address, a stop
    // handle and the runner thread.
    pub(crate) fn spawn(servlet: Servlet) -> (SocketAddr, Arc<Server>, thread::JoinHandle<()>) {
        let server = servlet.server();
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let runner = thread::spawn(move || servlet.run().unwrap());
        (addr, server, runner)
    }

    fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw).unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        String::from_utf8(reply).unwrap()
    }

    #[test]
    fn builder_requires_server_and_handler() {
        let incomplete = Servlet::builder().handler(|_: &mut Request, resp: &mut Response| {
            let _ = resp.set_status_code(200);
        });
        assert!(matches!(
            incomplete.build(),
            Err(Error::ConfigInvalid("servlet needs a server"))
        ));

        let incomplete = Servlet::builder().server(loopback_server());
        assert!(matches!(
            incomplete.build(),
            Err(Error::ConfigInvalid("servlet needs a handler"))
        ));
    }

    #[test]
    fn filters_run_in_order_and_can_short_circuit() {
        static DEPTH: AtomicUsize = AtomicUsize::new(0);

        // Chain: counting filter -> short-circuit filter -> (never) handler.
        let servlet = Servlet::builder()
            .server(loopback_server())
            .config(ServletConfig {
                num_accept_threads: 1,
                ..ServletConfig::default()
            })
            .filter(|req: &mut Request, resp: &mut Response, chain: &FilterChain<'_>| {
                DEPTH.fetch_add(1, Ordering::SeqCst);
                chain.next(req, resp);
            })
            .filter(|_: &mut Request, resp: &mut Response, _: &FilterChain<'_>| {
                // Short-circuits: next() is never called.
                resp.set_status_code(404).unwrap();
            })
            .handler(|_: &mut Request, _: &mut Response| {
                unreachable!("the chain short-circuits before the handler")
            })
            .build()
            .unwrap();

        let (addr, server, runner) = spawn(servlet);
        let reply = exchange(addr, b"GET / HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(DEPTH.load(Ordering::SeqCst), 1);

        server.stop();
        runner.join().unwrap();
    }

    #[test]
    fn handler_panic_closes_without_response() {
        let servlet = Servlet::builder()
            .server(loopback_server())
            .config(ServletConfig {
                num_accept_threads: 1,
                ..ServletConfig::default()
            })
            .handler(|req: &mut Request, resp: &mut Response| {
                if req.uri() == b"/panic" {
                    panic!("handler failure");
                }
                resp.set_status_code(200).unwrap();
            })
            .build()
            .unwrap();

        let (addr, server, runner) = spawn(servlet);
        let reply = exchange(addr, b"GET /panic HTTP/1.1\r\n\r\n");
        assert!(reply.is_empty());

        // The accept thread survived the panic and keeps serving.
        let reply = exchange(addr, b"GET / HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));

        server.stop();
        runner.join().unwrap();
    }

    #[test]
    fn thread_start_callback_wraps_serving() {
        static STARTED: AtomicUsize = AtomicUsize::new(0);

        let servlet = Servlet::builder()
            .server(loopback_server())
            .config(ServletConfig {
                num_accept_threads: 2,
                ..ServletConfig::default()
            })
            .on_thread_start(|thread: &ServletThread<'_>| {
                STARTED.fetch_add(1, Ordering::SeqCst);
                thread.serve();
            })
            .handler(|_: &mut Request, resp: &mut Response| {
                resp.set_status_code(200).unwrap();
            })
            .build()
            .unwrap();

        let (addr, server, runner) = spawn(servlet);
        let reply = exchange(addr, b"GET / HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));

        server.stop();
        runner.join().unwrap();

        // Spawned threads plus the caller thread.
        assert_eq!(STARTED.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_ends_run() {
        let servlet = Servlet::builder()
            .server(loopback_server())
            .config(ServletConfig {
                num_accept_threads: 2,
                ..ServletConfig::default()
            })
            .handler(|_: &mut Request, resp: &mut Response| {
                resp.set_status_code(200).unwrap();
            })
            .build()
            .unwrap();

        let (_, server, runner) = spawn(servlet);
        thread::sleep(Duration::from_millis(50));
        server.stop();
        runner.join().unwrap();
    }
}
