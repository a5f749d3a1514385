//! Plain HTTP surface alongside the GraphQL-over-WebSocket endpoint
//! (spec.md §6, SPEC_FULL.md §B): health, ICE server config, and the public
//! room lobby listing.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use warp::Filter;

use crate::config::Config;
use crate::registry::Registry;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rooms: usize,
    users: usize,
    uptime_seconds: u64,
}

fn health(registry: Arc<Registry>, started_at: Instant) -> impl warp::Reply {
    warp::reply::json(&HealthResponse {
        status: "ok",
        rooms: registry.room_count(),
        users: registry.user_count(),
        uptime_seconds: started_at.elapsed().as_secs(),
    })
}

fn with_registry(
    registry: Arc<Registry>,
) -> impl Filter<Extract = (Arc<Registry>,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

/// `GET /health`, `GET /ice-servers`, `GET /rooms`.
pub fn routes(
    registry: Arc<Registry>,
    config: Arc<Config>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let started_at = Instant::now();

    let health_route = warp::path("health")
        .and(warp::get())
        .and(with_registry(registry.clone()))
        .map(move |registry| health(registry, started_at));

    let ice_servers_route = warp::path("ice-servers").and(warp::get()).map(move || {
        warp::reply::json(&config.ice.to_json())
    });

    let rooms_route = warp::path("rooms")
        .and(warp::get())
        .and(with_registry(registry))
        .map(|registry: Arc<Registry>| warp::reply::json(&registry.enumerate_visible()));

    health_route.or(ice_servers_route).or(rooms_route)
}
