// Test assertions for pipeline responses

use gantry_core::{Dispatch, HttpResponse};
use serde_json::Value;

/// Assert that a response has a specific status code
#[track_caller]
pub fn assert_status(response: &HttpResponse, expected: u16) {
    assert_eq!(
        response.status,
        expected,
        "Expected status {}, got {} (body: {})",
        expected,
        response.status,
        response.body_str().unwrap_or("<binary>")
    );
}

/// Assert that the body parses as JSON equal to `expected`
#[track_caller]
pub fn assert_json_body(response: &HttpResponse, expected: &Value) {
    let actual = response
        .body_json()
        .unwrap_or_else(|| panic!("Expected a JSON body, got {:?}", response.body_str()));
    assert_eq!(&actual, expected, "JSON bodies do not match");
}

/// Assert that the body is exactly `expected`
#[track_caller]
pub fn assert_text_body(response: &HttpResponse, expected: &str) {
    assert_eq!(response.body_str(), Some(expected), "Text bodies do not match");
}

/// Assert that the body is empty
#[track_caller]
pub fn assert_empty_body(response: &HttpResponse) {
    assert!(
        response.body.is_empty(),
        "Expected an empty body, got {} bytes",
        response.body.len()
    );
}

/// Assert that a response has a specific header
#[track_caller]
pub fn assert_header(response: &HttpResponse, key: &str, expected: &str) {
    let actual = response
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str());
    assert_eq!(
        actual,
        Some(expected),
        "Expected header '{}' to be '{}', got {:?}",
        key,
        expected,
        actual
    );
}

/// Assert the standard error body `{"statusCode", "message", "error"}`
#[track_caller]
pub fn assert_error_body(response: &HttpResponse, status: u16, message: &str) {
    assert_status(response, status);
    let body = response
        .body_json()
        .unwrap_or_else(|| panic!("Expected a JSON error body, got {:?}", response.body_str()));
    assert_eq!(body["statusCode"], Value::from(status), "statusCode mismatch");
    assert_eq!(body["message"], Value::from(message), "message mismatch");
}

/// Assert that a cancellable dispatch was aborted without a response
#[track_caller]
pub fn assert_aborted(dispatch: &Dispatch) {
    assert!(
        dispatch.is_aborted(),
        "Expected the dispatch to be aborted, got {:?}",
        dispatch
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_passing_assertions() {
        let response = HttpResponse::ok()
            .with_json(&json!({"statusCode": 404, "message": "gone"}))
            .unwrap()
            .with_status(404)
            .with_header("X-Trace", "1");
        assert_error_body(&response, 404, "gone");
        assert_header(&response, "x-trace", "1");
    }

    #[test]
    #[should_panic(expected = "Expected status 200")]
    fn test_status_mismatch_panics() {
        assert_status(&HttpResponse::not_found(), 200);
    }

    #[test]
    fn test_text_and_empty() {
        assert_text_body(&HttpResponse::ok().with_text("3"), "3");
        assert_empty_body(&HttpResponse::new(204));
    }
}
