//! Tests for adapter error classification and health reporting

use core_kernel::{AdapterHealth, HealthCheckResult, PortError};

#[test]
fn test_retry_classification() {
    assert!(PortError::connection("reset by peer").is_transient());
    assert!(!PortError::transformation("missing field").is_transient());
    assert!(!PortError::internal("boom").is_not_found());
}

#[test]
fn test_not_found_display_names_collection_and_id() {
    let display = PortError::not_found("accounts", "ACC-42").to_string();
    assert!(display.starts_with("accounts document ACC-42"));
}

#[test]
fn test_health_result_serializes_status_in_snake_case() {
    let result = HealthCheckResult::new("document-store", AdapterHealth::Unhealthy);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["adapter"], "document-store");
    assert!(json["detail"].is_null());
}
