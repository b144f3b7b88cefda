//! A filter chain: request timing, a path guard that short-circuits, and
//! per-thread context published from the thread-start callback.

use highway::{
    Context, ContextKey, Filter, FilterChain, Request, Response, Server, ServerConfig, Servlet,
    ServletConfig, ServletThread,
};
use std::{
    sync::{Arc, OnceLock},
    time::Instant,
};

fn thread_label_key() -> ContextKey {
    static KEY: OnceLock<ContextKey> = OnceLock::new();
    *KEY.get_or_init(ContextKey::new)
}

/// Logs every request with its handling time.
struct Timing;

impl Filter for Timing {
    fn handle(&self, req: &mut Request, resp: &mut Response, chain: &FilterChain<'_>) {
        let started = Instant::now();
        chain.next(req, resp);

        let label = Context::find(thread_label_key())
            .and_then(|v| v.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        log::info!(
            "[{label}] {} {} took {:?}",
            String::from_utf8_lossy(req.method()),
            String::from_utf8_lossy(req.uri()),
            started.elapsed(),
        );
    }
}

/// Rejects a path prefix without invoking the rest of the chain.
struct Guard {
    forbidden_prefix: &'static [u8],
}

impl Filter for Guard {
    fn handle(&self, req: &mut Request, resp: &mut Response, chain: &FilterChain<'_>) {
        if req.uri().starts_with(self.forbidden_prefix) {
            resp.set_status_code(404).unwrap();
            return;
        }
        chain.next(req, resp);
    }
}

fn handler(req: &mut Request, resp: &mut Response) {
    let body = format!("you asked for {}\n", String::from_utf8_lossy(req.uri()));
    resp.set_status_code(200).unwrap();
    resp.set_content_type(b"text/plain").unwrap();
    resp.set_content_length(body.len()).unwrap();
    resp.write_body(body.as_bytes()).unwrap();
}

fn main() {
    env_logger::init();

    let servlet = Servlet::builder()
        .server(Server::new(ServerConfig::default()))
        .config(ServletConfig {
            num_accept_threads: 4,
            ..ServletConfig::default()
        })
        .filter(Timing)
        .filter(Guard {
            forbidden_prefix: b"/internal",
        })
        .handler(handler)
        .on_thread_start(|thread: &ServletThread<'_>| {
            let label = std::thread::current()
                .name()
                .unwrap_or("main")
                .to_string();
            Context::push(thread_label_key(), Arc::new(label));
            thread.serve();
            Context::clear();
        })
        .build()
        .unwrap();

    let server = servlet.server();
    ctrlc::set_handler(move || server.stop()).unwrap();

    servlet.run().unwrap();
}
