//! Body and path extractors whose rejections render as the usual
//! `{ "success": false, "message", "errors" }` body with status 400.

use axum::extract::{
    rejection::{JsonRejection, PathRejection},
    FromRequest, FromRequestParts,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::errors::{ApiError, FieldError};

/// JSON request body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

/// URL path parameters.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct AppPath<T>(pub T);

const BODY_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

/// Turns a deserializer message into a field error, naming the offending
/// field when the message carries one.
fn body_field_error(detail: &str) -> FieldError {
    lazy_static! {
        static ref MISSING_RE: Regex = Regex::new(r"missing field `([^`]+)`").unwrap();
        static ref PATH_RE: Regex =
            Regex::new(r"^([A-Za-z_][\w.\[\]]*): (.+?)(?: at line \d+ column \d+)?$").unwrap();
        static ref POSITION_RE: Regex = Regex::new(r" at line \d+ column \d+$").unwrap();
    }
    let detail = detail.strip_prefix(BODY_PREFIX).unwrap_or(detail);

    if let Some(caps) = MISSING_RE.captures(detail) {
        let field = caps[1].to_owned();
        let message = format!("{field} is required");
        return FieldError::new(field, message);
    }
    if let Some(caps) = PATH_RE.captures(detail) {
        return FieldError::new(caps[1].to_owned(), caps[2].to_owned());
    }
    FieldError::new("body", POSITION_RE.replace(detail, "").into_owned())
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let detail = rejection.body_text();
        warn!(status = %rejection.status(), %detail, "request body rejected");
        ApiError::Validation(vec![body_field_error(&detail)])
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        let detail = rejection.body_text();
        warn!(status = %rejection.status(), %detail, "path parameters rejected");
        ApiError::field("path", detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_named() {
        let e = body_field_error(
            "Failed to deserialize the JSON body into the target type: \
             missing field `password` at line 1 column 29",
        );
        assert_eq!(e.field, "password");
        assert_eq!(e.message, "password is required");
    }

    #[test]
    fn nested_error_uses_its_path() {
        let e = body_field_error(
            "Failed to deserialize the JSON body into the target type: \
             role: unknown variant `owner`, expected one of `guest`, `member`, `admin` \
             at line 1 column 16",
        );
        assert_eq!(e.field, "role");
        assert!(e.message.starts_with("unknown variant `owner`"));
        assert!(!e.message.contains("line 1"));
    }

    #[test]
    fn syntax_error_falls_back_to_body() {
        let e = body_field_error("Failed to parse the request body as JSON: EOF while parsing");
        assert_eq!(e.field, "body");
        assert_eq!(
            e.message,
            "Failed to parse the request body as JSON: EOF while parsing"
        );
    }
}
