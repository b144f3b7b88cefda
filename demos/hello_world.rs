use highway::{Request, Response, Server, ServerConfig, Servlet};

fn hello(_req: &mut Request, resp: &mut Response) {
    resp.set_status_code(200).unwrap();
    resp.set_content_type(b"text/plain").unwrap();
    resp.set_content_length(13).unwrap();
    resp.write_body(b"Hello, world!").unwrap();
}

fn main() {
    env_logger::init();

    let servlet = Servlet::builder()
        .server(Server::new(ServerConfig::default()))
        .handler(hello)
        .build()
        .unwrap();

    let server = servlet.server();
    ctrlc::set_handler(move || server.stop()).unwrap();

    servlet.run().unwrap();
}
