use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};

#[macro_use]
mod utils;
#[macro_use]
mod error;
mod api;
mod auth;
mod chats;
mod context;
mod database;
mod date_format;
mod logger;
mod messages;
mod session;
mod users;
mod validators;

use context::{AppContext, Config};
use error::AppError;

async fn router(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let path = req.uri().path().to_string();

    let users_prefix = "/api/users";
    let chats_prefix = "/api/chats";
    let messages_prefix = "/api/messages";
    if let Some(rest) = path.strip_prefix(users_prefix) {
        users::router(ctx, req, rest).await
    } else if let Some(rest) = path.strip_prefix(chats_prefix) {
        chats::router(ctx, req, rest).await
    } else if let Some(rest) = path.strip_prefix(messages_prefix) {
        messages::router(ctx, req, rest).await
    } else {
        Err(AppError::missing())
    }
}

async fn handler(ctx: Arc<AppContext>, req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let response = router(&ctx, req)
        .await
        .unwrap_or_else(|e| api::error_response(&e));
    log::info!(
        "{} {} {} {}ms",
        method,
        uri,
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::from_env()?;
    logger::setup_logger(config.debug, &config.log_file)?;

    let ctx = Arc::new(AppContext::new(&config).await?);
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    let make_svc = make_service_fn(move |_: &AddrStream| {
        let ctx = ctx.clone();
        async move { Ok::<_, hyper::Error>(service_fn(move |req| handler(ctx.clone(), req))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    log::info!("listening on http://{}", addr);

    if let Err(e) = server.await {
        log::error!("server error: {}", e);
    }
    Ok(())
}
