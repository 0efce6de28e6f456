//! Integration tests for the HTTP sample source and cloud inventory
//!
//! These tests verify that:
//! - Listings and readings are decoded from JSON
//! - A 404 on a domain reading means the domain vanished
//! - Server errors and bad payloads are reported as collection errors

use assert_matches::assert_matches;
use cloud_monitoring::error::CollectionError;
use cloud_monitoring::inventory::CloudInventory;
use cloud_monitoring::inventory::http::HttpInventory;
use cloud_monitoring::sampling::SampleSource;
use cloud_monitoring::sampling::http::HttpSampleSource;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Base URL with a trailing slash, as operators tend to write it
fn base_url(server: &MockServer) -> String {
    Url::parse(&server.uri()).unwrap().join("/").unwrap().to_string()
}

#[tokio::test]
async fn test_sample_source_reads_domains() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domains"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "uuid": "d-1", "vcpus": 2, "max_memory_kib": 4194304 }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/domains/d-1/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cpu_time_ns": 123456789, "actual_memory_kib": 2097152
        })))
        .mount(&server)
        .await;

    let source = HttpSampleSource::new(base_url(&server)).unwrap();

    let domains = source.list_domains().await.unwrap();
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].uuid, "d-1");
    assert_eq!(domains[0].vcpus, 2);

    let reading = source.read_domain("d-1").await.unwrap();
    assert_eq!(reading.cpu_time_ns, 123456789);
    assert_eq!(reading.actual_memory_kib, 2097152);
}

#[tokio::test]
async fn test_missing_domain_has_vanished() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domains/d-9/stats"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = HttpSampleSource::new(server.uri()).unwrap();

    assert_matches!(
        source.read_domain("d-9").await,
        Err(CollectionError::Vanished(uuid)) if uuid == "d-9"
    );
}

#[tokio::test]
async fn test_source_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domains"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/domains/d-1/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let source = HttpSampleSource::new(server.uri()).unwrap();

    assert_matches!(
        source.list_domains().await,
        Err(CollectionError::Unavailable(_))
    );
    assert_matches!(
        source.read_domain("d-1").await,
        Err(CollectionError::Malformed(_))
    );
}

#[tokio::test]
async fn test_inventory_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "i-1",
            "name": "web",
            "user_id": "u1",
            "project_id": "p1",
            "status": "SHUTOFF",
            "created": "2024-01-01T08:00:00Z",
            "updated": "2024-01-02T08:00:00Z",
            "flavor_id": "m1.small"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/volumes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "v-1",
            "user_id": "u1",
            "project_id": "p1",
            "status": "available",
            "bootable": "true",
            "size": 20,
            "created": "2024-01-01T08:00:00Z",
            "updated": "2024-01-01T08:00:00Z"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/security-groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "sg-1",
            "name": "default",
            "project_id": "p1",
            "rules": [{
                "id": "r-1",
                "direction": "ingress",
                "protocol": "tcp",
                "port_range_min": 22,
                "port_range_max": 22,
                "remote_ip_prefix": "0.0.0.0/0"
            }]
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flavors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "m1.small", "vcpus": 1 }
        ])))
        .mount(&server)
        .await;

    let inventory = HttpInventory::new(base_url(&server)).unwrap();
    let snapshot = inventory.snapshot().await.unwrap();

    assert_eq!(snapshot.instances[0].status, "SHUTOFF");
    assert_eq!(snapshot.volumes[0].name, "");
    assert_eq!(snapshot.volumes[0].size, 20);
    assert_eq!(snapshot.security_groups[0].rules[0].ports(), (22, 22));
    assert_eq!(snapshot.flavors["m1.small"], 1);
}

#[tokio::test]
async fn test_inventory_listing_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instances"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let inventory = HttpInventory::new(server.uri()).unwrap();

    assert_matches!(
        inventory.snapshot().await,
        Err(CollectionError::Unavailable(_))
    );
}
