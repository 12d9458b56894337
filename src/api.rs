//! Types and functions for to help building APIs.
use std::error::Error;
use std::result::Result as StdResult;

use hyper::header::CONTENT_TYPE;
use hyper::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub type Result = std::result::Result<hyper::Response<hyper::Body>, AppError>;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Return<T: Serialize> {
    value: T,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    status_code: u16,
}

impl<T: Serialize> Return<T> {
    pub fn new(value: T) -> Return<T> {
        Return {
            value,
            kind: "return",
            code: None,
            status_code: 200,
        }
    }

    pub fn form_error(e: &AppError) -> Return<String> {
        Return {
            value: e.to_string(),
            kind: "error",
            code: Some(e.error_code()),
            status_code: e.status_code().as_u16(),
        }
    }

    pub fn build(&self) -> Result {
        let bytes = serde_json::to_vec(self).map_err(unexpected!())?;
        let status = StatusCode::from_u16(self.status_code).map_err(unexpected!())?;

        Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .status(status)
            .body(Body::from(bytes))
            .map_err(unexpected!())
    }
}

pub fn ok_response<T: Serialize>(value: T) -> Result {
    Return::new(value).build()
}

pub fn error_response(e: &AppError) -> Response<Body> {
    if e.status_code().is_server_error() {
        match e.source() {
            Some(source) => log::error!("{}: {}", e, source),
            None => log::error!("{}", e),
        }
    } else {
        log::debug!("{}", e);
    }
    Return::<String>::form_error(e).build().unwrap_or_else(|_| {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

pub fn parse_query<T>(uri: &hyper::http::Uri) -> StdResult<T, AppError>
where
    for<'de> T: Deserialize<'de>,
{
    let query = uri.query().unwrap_or("");
    serde_urlencoded::from_str(query).map_err(|e| {
        let message = format!("Failed to parse the query in the URI ({})", uri);
        log::debug!("{}: {}", message, e);
        AppError::BadRequest(message)
    })
}

/// JSON bodies are small; anything larger is refused before parsing.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

async fn read_body(req: hyper::Request<Body>, limit: usize) -> StdResult<Vec<u8>, AppError> {
    use hyper::body::HttpBody;
    use hyper::header::CONTENT_LENGTH;

    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.map_or(false, |length| length > limit) {
        return Err(AppError::BodyTooLarge(limit));
    }

    let mut body = req.into_body();
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|_| AppError::BadRequest("Failed to read the request body".to_string()))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::BodyTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

pub async fn parse_body<T>(req: hyper::Request<Body>) -> StdResult<T, AppError>
where
    for<'de> T: Deserialize<'de>,
{
    let body = read_body(req, MAX_BODY_SIZE).await?;
    serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Failed to parse the request body: {}", e)))
}

#[derive(Deserialize, Debug, Eq, PartialEq)]
pub struct IdQuery {
    pub id: i64,
}

#[test]
fn test_parse_id() {
    use hyper::http::Uri;

    let uri: Uri = "/api/chats/members?id=42".parse().unwrap();
    let query: IdQuery = parse_query(&uri).unwrap();
    assert_eq!(query, IdQuery { id: 42 });

    let uri: Uri = "/api/chats/members?id=&".parse().unwrap();
    assert!(matches!(parse_query::<IdQuery>(&uri), Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn test_parse_body() {
    let req = hyper::Request::post("/").body(Body::from(r#"{"id": 7}"#)).unwrap();
    let query: IdQuery = parse_body(req).await.unwrap();
    assert_eq!(query.id, 7);

    let req = hyper::Request::post("/").body(Body::from("{")).unwrap();
    assert!(parse_body::<IdQuery>(req).await.is_err());
}

#[tokio::test]
async fn test_body_limit() {
    use hyper::header::CONTENT_LENGTH;

    let req = hyper::Request::post("/").body(Body::from("12345678")).unwrap();
    assert_eq!(read_body(req, 8).await.unwrap(), b"12345678");

    let req = hyper::Request::post("/").body(Body::from("123456789")).unwrap();
    assert!(matches!(read_body(req, 8).await, Err(AppError::BodyTooLarge(8))));

    // a declared length over the limit is refused without reading
    let req = hyper::Request::post("/")
        .header(CONTENT_LENGTH, "1048576")
        .body(Body::from("{}"))
        .unwrap();
    assert!(matches!(read_body(req, 8).await, Err(AppError::BodyTooLarge(8))));

    let padding = " ".repeat(MAX_BODY_SIZE);
    let req = hyper::Request::post("/").body(Body::from(format!("{}{{\"id\": 7}}", padding))).unwrap();
    let too_large = parse_body::<IdQuery>(req).await;
    assert!(matches!(too_large, Err(AppError::BodyTooLarge(MAX_BODY_SIZE))));
    assert_eq!(AppError::BodyTooLarge(MAX_BODY_SIZE).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_envelopes() {
    let response = ok_response(vec![1, 2]).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!({ "value": [1, 2], "type": "return", "statusCode": 200 }));

    let response = error_response(&AppError::NotFound("chat"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["value"], "chat not found");
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["type"], "error");
}
