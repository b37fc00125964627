use super::*;
use axum::http::StatusCode;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        RelayError::decode("x")
            .to_string()
            .contains("decode error:")
    );
    assert!(
        RelayError::render_prep("x")
            .to_string()
            .contains("render preparation error:")
    );
    assert!(
        RelayError::render("x")
            .to_string()
            .contains("render error:")
    );
    assert!(
        RelayError::delivery("x")
            .to_string()
            .contains("delivery error:")
    );
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = RelayError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
    assert_eq!(err.code(), "INTERNAL_ERROR");
}

#[test]
fn statuses_follow_taxonomy() {
    assert_eq!(RelayError::decode("x").status(), StatusCode::BAD_REQUEST);
    assert_eq!(RelayError::renderer_absent("x").status(), StatusCode::OK);
    assert_eq!(
        RelayError::render_prep("x").status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
        RelayError::render("x").status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(RelayError::delivery("x").status(), StatusCode::BAD_GATEWAY);
}

#[test]
fn only_decode_is_client_error() {
    assert!(RelayError::decode("x").is_client_error());
    assert!(!RelayError::render("x").is_client_error());
    assert!(!RelayError::delivery("x").is_client_error());
}

#[test]
fn codes_are_distinct() {
    let codes = [
        RelayError::decode("x").code(),
        RelayError::render_prep("x").code(),
        RelayError::renderer_absent("x").code(),
        RelayError::render("x").code(),
        RelayError::delivery("x").code(),
        RelayError::config("x").code(),
    ];
    let unique: std::collections::BTreeSet<_> = codes.iter().collect();
    assert_eq!(unique.len(), codes.len());
}
