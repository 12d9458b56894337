use hyper::header::AUTHORIZATION;
use hyper::{Body, Request};

use crate::auth::AuthError;
use crate::error::AppError;
use crate::users::Users;

// Authorization: Bearer [jwt]

pub fn bearer_token(req: &Request<Body>) -> Result<&str, AuthError> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Returns the id of the user the request's token was issued to.
pub fn authenticate(req: &Request<Body>, users: &dyn Users) -> Result<i64, AppError> {
    let token = bearer_token(req)?;
    let user_id = users.validate_token(token).map_err(|e| {
        log::debug!("rejected access token: {}", e);
        e
    })?;
    Ok(user_id)
}

#[test]
fn test_bearer_token() {
    let req = Request::get("/").header(AUTHORIZATION, "Bearer abc.def.ghi").body(Body::empty()).unwrap();
    assert_eq!(bearer_token(&req).unwrap(), "abc.def.ghi");

    let req = Request::get("/").body(Body::empty()).unwrap();
    assert!(matches!(bearer_token(&req), Err(AuthError::MissingToken)));

    let req = Request::get("/").header(AUTHORIZATION, "Basic dXNlcjpwYXNz").body(Body::empty()).unwrap();
    assert!(matches!(bearer_token(&req), Err(AuthError::MissingToken)));

    let req = Request::get("/").header(AUTHORIZATION, "Bearer  ").body(Body::empty()).unwrap();
    assert!(matches!(bearer_token(&req), Err(AuthError::MissingToken)));
}
