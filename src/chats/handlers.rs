use hyper::{Body, Method, Request};

use super::api::{AddPhoto, Attach, ChatId, CreatePrivate, CreatePublic};
use crate::api::{self, ok_response, parse_body, parse_query, IdQuery};
use crate::context::AppContext;
use crate::error::AppError;
use crate::session::authenticate;

async fn create_public(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let CreatePublic { name }: CreatePublic = parse_body(req).await?;
    ok_response(ctx.chats.create_public_chat(user_id, &name).await?)
}

async fn create_private(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let CreatePrivate { user_id: other_id }: CreatePrivate = parse_body(req).await?;
    ctx.users.get_user_by_id(other_id).await?;
    ok_response(ctx.chats.create_private_chat(user_id, other_id).await?)
}

async fn join(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let ChatId { chat_id }: ChatId = parse_body(req).await?;
    ok_response(ctx.chats.create_chat_member(user_id, chat_id).await?)
}

async fn leave(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let ChatId { chat_id }: ChatId = parse_body(req).await?;
    ok_response(ctx.chats.leave_chat(user_id, chat_id).await?)
}

async fn public(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    ok_response(ctx.chats.get_user_public_chats(user_id).await?)
}

async fn private(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    ok_response(ctx.chats.get_user_private_chats(user_id).await?)
}

async fn members(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let IdQuery { id } = parse_query(req.uri())?;
    ctx.chats.get_chat(id).await?;
    ok_response(ctx.chats.get_chat_members(id).await?)
}

async fn photos(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let IdQuery { id } = parse_query(req.uri())?;
    ctx.chats.get_chat(id).await?;
    ok_response(ctx.chats.get_chat_photos(id).await?)
}

async fn add_photo(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let AddPhoto { chat_id, url_path }: AddPhoto = parse_body(req).await?;
    if !ctx.chats.can_post(user_id, chat_id).await? {
        return Err(AppError::NoPermission);
    }
    ok_response(ctx.chats.add_chat_photo(chat_id, &url_path).await?)
}

async fn attach(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let Attach { chat_id, photo_id }: Attach = parse_body(req).await?;
    if !ctx.chats.can_post(user_id, chat_id).await? {
        return Err(AppError::NoPermission);
    }
    ok_response(ctx.chats.attach_photo(chat_id, photo_id).await?)
}

pub async fn router(ctx: &AppContext, req: Request<Body>, path: &str) -> api::Result {
    match (path, req.method().clone()) {
        ("/create_public", Method::POST) => create_public(ctx, req).await,
        ("/create_private", Method::POST) => create_private(ctx, req).await,
        ("/join", Method::POST) => join(ctx, req).await,
        ("/leave", Method::POST) => leave(ctx, req).await,
        ("/public", Method::GET) => public(ctx, req).await,
        ("/private", Method::GET) => private(ctx, req).await,
        ("/members", Method::GET) => members(ctx, req).await,
        ("/photos", Method::GET) => photos(ctx, req).await,
        ("/add_photo", Method::POST) => add_photo(ctx, req).await,
        ("/attach", Method::POST) => attach(ctx, req).await,
        _ => Err(AppError::missing()),
    }
}
