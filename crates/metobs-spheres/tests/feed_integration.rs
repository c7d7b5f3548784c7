//! Integration tests for the sphere feed and navigation service using wiremock.

use std::sync::Arc;
use std::time::Duration;

use metobs_spheres::{
    FetchError, GeoPoint, HttpSphereSource, ManualClock, NavigationService, NearestFilter,
    RetryConfig, SphereError, SphereSource,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a sphere feature JSON
fn sphere_feature(id: &str, lon: f64, lat: f64, panorama: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "Feature",
        "properties": {
            "id": id,
            "panorama": panorama,
            "author": "Station crew",
            "date": "2023-07-14T10:00:00Z"
        },
        "geometry": { "type": "Point", "coordinates": [lon, lat] }
    })
}

fn svalbard_feed() -> serde_json::Value {
    serde_json::json!({
        "type": "FeatureCollection",
        "features": [
            sphere_feature("S1", 15.65, 78.22, "spheres/S1.jpg"),
            sphere_feature("S2", 11.93, 78.92, "spheres/S2.jpg"),
        ]
    })
}

fn source(server: &MockServer, retry: RetryConfig) -> HttpSphereSource {
    HttpSphereSource::new(
        &format!("{}/spheres.geojson", server.uri()),
        &format!("{}/assets/", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap()
    .with_retry(retry)
}

#[tokio::test]
async fn test_fetch_resolves_relative_assets() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(svalbard_feed()))
        .mount(&mock_server)
        .await;

    let spheres = source(&mock_server, RetryConfig::none())
        .with_project(Some("Svalbard".to_string()))
        .fetch()
        .await
        .unwrap();

    assert_eq!(spheres.len(), 2);
    let s1 = spheres.get("S1").unwrap();
    assert_eq!(s1.location, GeoPoint::new(78.22, 15.65));
    assert_eq!(
        s1.panorama.as_str(),
        format!("{}/assets/spheres/S1.jpg", mock_server.uri())
    );
    assert_eq!(s1.project.as_deref(), Some("Svalbard"));
    assert!(s1.date.is_some());
}

#[tokio::test]
async fn test_fetch_server_error_after_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let result = source(&mock_server, RetryConfig::new(2, 1, 5)).fetch().await;

    assert!(matches!(result, Err(FetchError::Status { status: 500 })));
}

#[tokio::test]
async fn test_fetch_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = source(&mock_server, RetryConfig::new(2, 1, 5)).fetch().await;

    assert!(matches!(result, Err(FetchError::Status { status: 404 })));
}

#[tokio::test]
async fn test_fetch_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let result = source(&mock_server, RetryConfig::none()).fetch().await;

    assert!(matches!(result, Err(FetchError::Malformed(_))));
}

#[tokio::test]
async fn test_fetch_empty_feed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "FeatureCollection",
            "features": []
        })))
        .mount(&mock_server)
        .await;

    let result = source(&mock_server, RetryConfig::none()).fetch().await;

    assert!(matches!(result, Err(FetchError::Empty)));
}

#[tokio::test]
async fn test_fetch_rejects_oversized_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(svalbard_feed()))
        .mount(&mock_server)
        .await;

    let result = source(&mock_server, RetryConfig::none())
        .with_max_body_bytes(64)
        .fetch()
        .await;

    assert!(matches!(result, Err(FetchError::TooLarge { limit: 64 })));
}

#[tokio::test]
async fn test_fetch_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(svalbard_feed())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let source = HttpSphereSource::new(
        &format!("{}/spheres.geojson", mock_server.uri()),
        &mock_server.uri(),
        Duration::from_millis(200),
    )
    .unwrap()
    .with_retry(RetryConfig::none());

    let err = source.fetch().await.unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {:?}", err);
}

#[tokio::test]
async fn test_service_fetches_once_for_repeated_queries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(svalbard_feed()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let nav = NavigationService::new(
        Arc::new(source(&mock_server, RetryConfig::none())),
        Duration::from_secs(3600),
    );
    let p = GeoPoint::new(78.5, 15.0);

    let first = nav.nearest(p, 1, &NearestFilter::default()).await.unwrap();
    let second = nav.nearest(p, 2, &NearestFilter::default()).await.unwrap();

    assert_eq!(first[0].sphere.id, "S1");
    assert!((first[0].distance_m - 34_380.0).abs() < 5.0);
    assert_eq!(second.len(), 2);
    assert_eq!(second[1].sphere.id, "S2");
    assert_eq!(nav.cache_stats().loads, 1);
}

#[tokio::test]
async fn test_service_reports_unavailable_feed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let nav = NavigationService::new(
        Arc::new(source(&mock_server, RetryConfig::none())),
        Duration::from_secs(3600),
    );

    let result = nav.nearest(GeoPoint::new(78.5, 15.0), 1, &NearestFilter::default()).await;
    match result {
        Err(err @ SphereError::NoDataAvailable(_)) => {
            assert!(!err.user_message().is_empty());
        }
        other => panic!("expected NoDataAvailable, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_on_cold_service_fetch_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(svalbard_feed())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let nav = NavigationService::new(
        Arc::new(source(&mock_server, RetryConfig::none())),
        Duration::from_secs(3600),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let nav = nav.clone();
            tokio::spawn(async move {
                nav.nearest(GeoPoint::new(78.5, 15.0), 2, &NearestFilter::default())
                    .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(results[0].len(), 2);
    assert_eq!(results[0][0].sphere.id, "S1");
    assert!(results.iter().all(|r| r == &results[0]));
}

#[tokio::test]
async fn test_stale_query_answers_while_feed_is_slow() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(svalbard_feed()))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/spheres.geojson"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(svalbard_feed())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let ttl = Duration::from_secs(3600);
    let clock = Arc::new(ManualClock::new());
    let nav = NavigationService::with_clock(
        Arc::new(source(&mock_server, RetryConfig::none())),
        ttl,
        clock.clone(),
    );
    let p = GeoPoint::new(78.5, 15.0);

    nav.nearest(p, 1, &NearestFilter::default()).await.unwrap();
    clock.advance(ttl);

    let stale = tokio::time::timeout(
        Duration::from_millis(500),
        nav.nearest(p, 1, &NearestFilter::default()),
    )
    .await
    .expect("stale query waited for the refresh")
    .unwrap();

    assert_eq!(stale[0].sphere.id, "S1");
    assert_eq!(nav.cache_stats().stale_hits, 1);
}
