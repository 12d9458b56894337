use hyper::{Body, Method, Request};

use super::api::{AddContact, Login, LoginReturn, QueryUser, Register};
use crate::api::{self, ok_response, parse_body, parse_query};
use crate::auth::AuthError;
use crate::context::AppContext;
use crate::error::AppError;
use crate::session::authenticate;

async fn register(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let Register {
        email,
        username,
        password,
    }: Register = parse_body(req).await?;
    let id = ctx.users.create_user(&email, &username, &password).await?;
    log::info!("{} ({}) was registered.", username.trim(), email.trim());
    ok_response(id)
}

async fn login(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let form: Login = parse_body(req).await?;
    let token = ctx.users.issue_token(&form.email, &form.password).await;
    if let Err(AppError::Unauthenticated(AuthError::InvalidCredentials)) = &token {
        log::warn!("Someone failed to try to login: {}", form.email);
    }
    let token = token?;
    let user = ctx.users.get_user_by_email(&form.email, &form.password).await?;
    ok_response(LoginReturn { user, token })
}

async fn me(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    ok_response(ctx.users.get_user_by_id(user_id).await?)
}

async fn query(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let QueryUser { id } = parse_query(req.uri())?;
    ok_response(ctx.users.get_user_by_id(id).await?)
}

async fn all(ctx: &AppContext) -> api::Result {
    ok_response(ctx.users.get_users().await?)
}

async fn add_contact(ctx: &AppContext, req: Request<Body>) -> api::Result {
    let user_id = authenticate(&req, &*ctx.users)?;
    let AddContact { contact_id }: AddContact = parse_body(req).await?;
    // make sure both sides exist before recording anything
    ctx.users.get_user_by_id(contact_id).await?;
    ctx.users.create_contact(user_id, contact_id).await?;
    ok_response(true)
}

pub async fn router(ctx: &AppContext, req: Request<Body>, path: &str) -> api::Result {
    match (path, req.method().clone()) {
        ("/register", Method::POST) => register(ctx, req).await,
        ("/login", Method::POST) => login(ctx, req).await,
        ("/me", Method::GET) => me(ctx, req).await,
        ("/query", Method::GET) => query(ctx, req).await,
        ("/all", Method::GET) => all(ctx).await,
        ("/add_contact", Method::POST) => add_contact(ctx, req).await,
        _ => Err(AppError::missing()),
    }
}
