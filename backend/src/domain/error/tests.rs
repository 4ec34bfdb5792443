//! Tests for the error payload formatting and validation.

use super::*;
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn rate_limited_error() -> Error {
    Error::rate_limited("try again in 12 seconds").with_details(json!({
        "attempts": 11,
        "remaining": 0,
        "retryAfterSeconds": 12,
    }))
}

#[rstest]
fn invalid_request_constructor_sets_code() {
    let err = Error::invalid_request("bad");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}

#[rstest]
fn try_new_rejects_empty_messages() {
    let result = Error::try_new(ErrorCode::InvalidRequest, "   ");
    assert!(matches!(result, Err(ErrorValidationError::EmptyMessage)));
}

#[rstest]
fn detail_reads_individual_fields(rate_limited_error: Error) {
    assert_eq!(rate_limited_error.detail("remaining"), Some(&json!(0)));
    assert!(rate_limited_error.detail("missing").is_none());
}

#[rstest]
fn serialises_code_in_snake_case(rate_limited_error: Error) {
    let value = serde_json::to_value(&rate_limited_error).expect("serialises");
    assert_eq!(value["code"], json!("rate_limited"));
    assert_eq!(value["message"], json!("try again in 12 seconds"));
    assert_eq!(value["details"]["attempts"], json!(11));
}

#[rstest]
fn omits_details_when_absent() {
    let value = serde_json::to_value(Error::policy_violation("blocked")).expect("serialises");
    assert_eq!(value["code"], json!("policy_violation"));
    assert!(value.get("details").is_none());
}

#[rstest]
fn deserialising_blank_message_fails() {
    let payload = json!({ "code": "not_found", "message": "  " });
    let result: Result<Error, _> = serde_json::from_value(payload);
    assert!(result.is_err());
}

#[rstest]
fn display_uses_message() {
    assert_eq!(Error::conflict("room is inactive").to_string(), "room is inactive");
}
