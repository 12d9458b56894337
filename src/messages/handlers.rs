use hyper::{Body, Method, Request};

use super::api::NewMessage;
use crate::api::{self, ok_response, parse_body, parse_query, IdQuery};
use crate::context::AppContext;
use crate::error::AppError;
use crate::session::authenticate;

async fn by_chat(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let IdQuery { id } = parse_query(req.uri())?;
    ctx.chats.get_chat(id).await?;
    if !ctx.chats.can_post(user_id, id).await? {
        return Err(AppError::NoPermission);
    }
    ok_response(ctx.chats.get_chat_messages(id).await?)
}

async fn send(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let NewMessage { chat_id, content }: NewMessage = parse_body(req).await?;
    let message = ctx.chats.create_message(user_id, chat_id, &content).await?;
    log::debug!("message {} was sent to chat {}", message.id, chat_id);
    ok_response(message)
}

pub async fn router(ctx: &AppContext, req: Request<Body>, path: &str) -> api::Result {
    match (path, req.method().clone()) {
        ("/by_chat", Method::GET) => by_chat(ctx, req).await,
        ("/send", Method::POST) => send(ctx, req).await,
        _ => Err(AppError::missing()),
    }
}
