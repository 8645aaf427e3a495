//! Run with:
//! RUST_LOG=tower_response_retention=debug cargo run --example animals
//!
//! Then request the same URL twice; the second response is replayed from
//! storage and the handler log line does not repeat:
//!
//! curl -i http://127.0.0.1:1323/api/animals/fish
//! curl -i 'http://127.0.0.1:1323/api/animals/fish?weird=true'

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::error_handling::HandleErrorLayer;
use axum::extract::Query;
use axum::http::{HeaderName, StatusCode};
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_response_retention::layer::BoxError;
use tower_response_retention::prelude::*;
use tracing_subscriber::EnvFilter;

async fn get_fish(Query(query): Query<HashMap<String, String>>) -> &'static str {
    tracing::info!("computing fish");
    if query.get("weird").map(String::as_str) == Some("true") {
        return "barreleye, just google it";
    }
    "herrings and sardines"
}

async fn get_birds() -> &'static str {
    tracing::info!("computing birds");
    "owls (are not what they seem)"
}

async fn health() -> &'static str {
    "ok"
}

async fn handle_retention_error(err: BoxError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let retention = RetentionLayer::builder(InMemoryStorage::new())
        .skipper(Skipper::paths(["/health"]))
        .ignore_header(HeaderName::from_static("x-request-id"))
        .build();

    let app = Router::new()
        .route("/api/animals/fish", get(get_fish))
        .route("/api/animals/birds", get(get_birds))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_retention_error))
                .layer(retention),
        );

    let addr: SocketAddr = "127.0.0.1:1323".parse()?;
    println!("Listening on http://{addr}");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
