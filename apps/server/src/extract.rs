//! Request extractors that report failures in the API error envelope.

use axum::{
    Json,
    extract::{
        FromRequest, FromRequestParts, Query, Request,
        rejection::{JsonRejection, QueryRejection},
    },
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_path_to_error::Segment;
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};

/// JSON body extractor.
///
/// Bodies that are not JSON become `invalid_request`. A top-level field of
/// the wrong type becomes a `validation_error` naming that field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ServerError::InvalidRequest(rejection.body_text()))?;
        decode_json(value).map(Self)
    }
}

/// Deserializes a parsed body, attributing type errors to their field.
fn decode_json<T: DeserializeOwned>(value: Value) -> ServerResult<T> {
    serde_path_to_error::deserialize(value).map_err(|err| {
        let field = match err.path().iter().next() {
            Some(Segment::Map { key }) => Some(key.clone()),
            _ => None,
        };
        match field {
            Some(field) => ServerError::field(&field, format!("Invalid value: {}", err.inner())),
            None => ServerError::InvalidRequest(err.inner().to_string()),
        }
    })
}

/// Query string extractor; malformed queries become `invalid_request`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ServerError::InvalidRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Parses a path segment as a resource ID.
pub fn parse_id(raw: &str) -> ServerResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ServerError::InvalidRequest(format!("Invalid ID: {raw}")))
}

#[cfg(test)]
mod tests {
    use entities::validation::ReadingPayload;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_json_names_mistyped_field() {
        let result = decode_json::<ReadingPayload>(json!({ "systolic": "abc" }));
        match result {
            Err(ServerError::Validation(errors)) => {
                assert!(errors.has("systolic"));
                assert!(!errors.has("diastolic"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let overflow = decode_json::<ReadingPayload>(json!({ "diastolic": 99_999_999_999i64 }));
        assert!(matches!(overflow, Err(ServerError::Validation(e)) if e.has("diastolic")));
    }

    #[test]
    fn test_decode_json_rejects_wrong_shape() {
        let result = decode_json::<ReadingPayload>(json!([120, 80]));
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));

        let payload = decode_json::<ReadingPayload>(json!({ "systolic": 120, "extra": true }))
            .unwrap();
        assert_eq!(payload.systolic, Some(120));
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_id("not-a-uuid"),
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
