use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use weir::config::Config;
use weir::http::response::{Response, StatusCode};
use weir::router::Router;
use weir::server::listener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let filter = match &cfg.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let router = Router::new();
    router.add_handler("GET", "", "^/health$", |_, _| {
        Ok(Response::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("ok")
            .build())
    })?;
    router.add_handler("GET", "", "^/$", |client, request| {
        let body = format!(
            "<html><body><h3>weir</h3><p>{} {} from {}</p></body></html>",
            request.method, request.uri_path, client.remote_addr
        );
        Ok(Response::ok(body))
    })?;

    listener::run(&cfg.server, Arc::new(router)).await
}
