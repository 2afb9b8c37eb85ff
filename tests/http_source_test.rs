use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use reqwest::Url;
use tokio::net::TcpListener;

use hike_image_engine::config::EngineConfig;
use hike_image_engine::engine::cache::FetchCache;
use hike_image_engine::engine::downloader::Downloader;
use hike_image_engine::engine::resolver::{ImageResolver, SearchResolver};
use hike_image_engine::engine::retry::RetryPolicy;
use hike_image_engine::engine::stats::StatsCollector;
use hike_image_engine::source::http_source::HttpSource;
use hike_image_engine::source::traits::Transport;
use hike_image_engine::{FetchError, ImageReference, Position};

const IMAGE_SIZE: usize = 64 * 1024;

fn image_bytes() -> Vec<u8> {
    (0..IMAGE_SIZE).map(|i| (i % 256) as u8).collect()
}

async fn search(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let well_formed = params.get("method").map(String::as_str) == Some("flickr.photos.search")
        && params.get("format").map(String::as_str) == Some("json")
        && params.contains_key("lat")
        && params.contains_key("lon");
    if !well_formed {
        return (StatusCode::BAD_REQUEST, "missing parameters").into_response();
    }

    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"photos":{"page":1,"photo":[{"id":"42","secret":"cafe","server":"7","farm":3}]},"stat":"ok"}"#,
    )
        .into_response()
}

async fn image() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/jpeg")],
        image_bytes(),
    )
}

async fn broken() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream down")
}

async fn start_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    hike_image_engine::api::init_tracing();
    let app = Router::new()
        .route("/services/rest/", get(search))
        .route("/7/42_cafe.jpg", get(image))
        .route("/broken", get(broken));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn test_http_source_get() {
    let (addr, _handle) = start_server().await;
    let source = HttpSource::default();

    let url = Url::parse(&format!("http://{}/7/42_cafe.jpg", addr)).unwrap();
    let data = source.get(&url).await.unwrap();
    assert_eq!(data.len(), IMAGE_SIZE);
    assert_eq!(&data[..], &image_bytes()[..]);
}

#[tokio::test]
async fn test_http_source_rejects_error_status() {
    let (addr, _handle) = start_server().await;
    let source = HttpSource::default();

    let url = Url::parse(&format!("http://{}/broken", addr)).unwrap();
    let err = source.get(&url).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 500"), "{}", err);
}

#[tokio::test]
async fn test_resolve_and_download_over_http() {
    let (addr, _handle) = start_server().await;
    let transport: Arc<dyn Transport> = Arc::new(HttpSource::default());
    let stats = Arc::new(StatsCollector::new());
    let config = EngineConfig {
        api_key: "k".to_string(),
        search_endpoint: format!("http://{}/services/rest/", addr),
        ..EngineConfig::default()
    };

    let resolver = SearchResolver::new(Arc::clone(&transport), &config, Arc::clone(&stats));
    let reference = resolver
        .resolve(&Position::new(53.27, -7.78, 10.0))
        .await
        .unwrap();
    assert_eq!(
        reference.url.as_str(),
        "https://farm3.staticflickr.com/7/42_cafe.jpg"
    );

    // Serve the derived path from the local upstream instead of the real image host.
    let local = ImageReference::new(
        Url::parse(&format!("http://{}{}", addr, reference.url.path())).unwrap(),
        reference.position,
    );
    let cache = Arc::new(FetchCache::new());
    let downloader = Downloader::new(transport, cache.clone(), RetryPolicy::immediate(3), stats);
    let data = downloader.download(&local).await.unwrap();
    assert_eq!(data.len(), IMAGE_SIZE);
    assert!(cache.contains(local.key()));
}

#[tokio::test]
async fn test_download_error_status_exhausts_budget() {
    let (addr, _handle) = start_server().await;
    let stats = Arc::new(StatsCollector::new());
    let downloader = Downloader::new(
        Arc::new(HttpSource::default()),
        Arc::new(FetchCache::new()),
        RetryPolicy::immediate(2),
        stats.clone(),
    );

    let broken = ImageReference::new(
        Url::parse(&format!("http://{}/broken", addr)).unwrap(),
        Position::new(0.0, 0.0, 1.0),
    );
    let err = downloader.download(&broken).await.unwrap_err();
    assert!(matches!(err, FetchError::FetchFailed(_)), "{:?}", err);

    let snap = stats.snapshot();
    assert_eq!(snap.image_requests, 2);
    assert_eq!(snap.retries, 1);
}
