use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use futures_util::stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceBuilder;
use tower_response_retention::layer::BoxError;
use tower_response_retention::prelude::*;

async fn handle_retention_error(err: BoxError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Serves the animal routes behind the retention layer on an ephemeral port.
async fn serve(storage: InMemoryStorage, calls: Arc<AtomicUsize>) -> SocketAddr {
    let fish_calls = calls.clone();
    let birds_calls = calls;

    let app = Router::new()
        .route(
            "/api/animals/fish",
            get(move || {
                let calls = fish_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "herrings and sardines"
                }
            }),
        )
        .route(
            "/api/animals/birds",
            get(move || {
                let calls = birds_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Body::from_stream(stream::iter(vec![
                        Ok::<_, Infallible>("owls "),
                        Ok("(are not what they seem)"),
                    ]))
                }
            }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_retention_error))
                .layer(RetentionLayer::new(storage)),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });
    addr
}

/// Sends a raw HTTP/1.1 GET and returns the whole response, lowercased.
async fn fetch(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read response");
    String::from_utf8(response)
        .expect("utf-8 response")
        .to_ascii_lowercase()
}

#[tokio::test]
async fn fixed_length_response_is_retained_over_http1() {
    let storage = InMemoryStorage::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = serve(storage.clone(), calls.clone()).await;

    let first = fetch(addr, "/api/animals/fish").await;
    assert!(first.starts_with("http/1.1 200 ok"), "{first}");
    assert!(first.contains("content-length: 21"), "{first}");
    assert!(first.ends_with("herrings and sardines"), "{first}");
    assert_eq!(storage.len(), 1, "stored before the response completed");

    let second = fetch(addr, "/api/animals/fish").await;
    assert!(second.starts_with("http/1.1 200 ok"), "{second}");
    assert!(second.ends_with("herrings and sardines"), "{second}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.len(), 1);
}

#[tokio::test]
async fn chunked_response_is_retained_over_http1() {
    let storage = InMemoryStorage::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = serve(storage.clone(), calls.clone()).await;

    let first = fetch(addr, "/api/animals/birds").await;
    assert!(first.starts_with("http/1.1 200 ok"), "{first}");
    assert!(first.contains("transfer-encoding: chunked"), "{first}");
    assert_eq!(storage.len(), 1);

    let second = fetch(addr, "/api/animals/birds").await;
    assert!(second.starts_with("http/1.1 200 ok"), "{second}");
    assert!(
        second.ends_with("owls (are not what they seem)"),
        "replayed as one fixed-length body: {second}"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
