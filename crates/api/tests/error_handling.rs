//! Tests for `AppError` → HTTP response mapping.
//!
//! These tests verify that each `AppError` variant produces the correct HTTP
//! status code, error code, and message. They do NOT need an HTTP server --
//! they call `IntoResponse` directly on `AppError` values.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use meetup_api::error::AppError;
use meetup_core::error::CoreError;
use meetup_core::locking::LockError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Test: CoreError::NotFound maps to 404 with NOT_FOUND code
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::meeting_not_found(42));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Meeting with id 42 not found");
}

// ---------------------------------------------------------------------------
// Test: contention maps to 429 so clients retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lock_timeout_returns_429() {
    let err = AppError::Core(CoreError::TooManyRequests(
        "Resource 'meeting7' is busy, try again shortly".into(),
    ));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["code"], "TOO_MANY_REQUESTS");
    assert_eq!(json["error"], "Resource 'meeting7' is busy, try again shortly");
}

#[tokio::test]
async fn escaped_optimistic_conflict_returns_429() {
    let err = AppError::Core(CoreError::OptimisticConflict {
        entity: "Meeting",
        id: 7,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["code"], "TOO_MANY_REQUESTS");
}

// ---------------------------------------------------------------------------
// Test: seat and membership rejections map to 409 with specific codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn meeting_full_returns_409() {
    let err = AppError::Core(CoreError::MeetingFull {
        meeting_id: 3,
        capacity: 10,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "MEETING_FULL");
    assert_eq!(json["error"], "Meeting 3 is full (10 seats)");
}

#[tokio::test]
async fn seat_state_errors_return_409() {
    let cases = [
        (
            CoreError::AlreadyJoined {
                meeting_id: 1,
                user_id: 2,
            },
            "ALREADY_JOINED",
        ),
        (
            CoreError::NotJoined {
                meeting_id: 1,
                user_id: 2,
            },
            "NOT_JOINED",
        ),
        (
            CoreError::GroupFull {
                group_id: 1,
                capacity: 5,
            },
            "GROUP_FULL",
        ),
        (
            CoreError::AlreadyMember {
                group_id: 1,
                user_id: 2,
            },
            "ALREADY_MEMBER",
        ),
        (
            CoreError::NotMember {
                group_id: 1,
                user_id: 2,
            },
            "NOT_MEMBER",
        ),
    ];

    for (err, code) in cases {
        let (status, json) = error_to_response(AppError::Core(err)).await;
        assert_eq!(status, StatusCode::CONFLICT, "{code}");
        assert_eq!(json["code"], code);
    }
}

#[tokio::test]
async fn forbidden_error_returns_403() {
    let err = AppError::Core(CoreError::Forbidden(
        "Only the group owner can create regular meetings".into(),
    ));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "FORBIDDEN");
}

// ---------------------------------------------------------------------------
// Test: infrastructure failures map to 500 and sanitize the message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lock_backend_error_returns_500_without_details() {
    let err = AppError::Core(CoreError::Lock(LockError::backend(
        "meeting1",
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection reset"),
    )));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes() {
    let err = AppError::InternalError("secret database connection string leaked".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn sqlx_row_not_found_returns_404() {
    let (status, json) = error_to_response(AppError::Database(sqlx::Error::RowNotFound)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}
