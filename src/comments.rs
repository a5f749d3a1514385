//! Transparent comments proxy (spec.md §6 `GET /comments/:videoId`): forwards
//! to a rotating list of upstream Invidious instances, with a short-lived
//! cache so a room full of viewers loading the same video doesn't hammer
//! the upstream on every page load.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use warp::http::StatusCode;
use warp::Filter;

use crate::config::Config;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const CACHE_CAPACITY: u64 = 1_000;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct CommentsProxy {
    client: reqwest::Client,
    instances: Vec<String>,
    cache: Cache<String, String>,
}

impl CommentsProxy {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            instances: config.invidious_instances.clone(),
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Fetch `videoId`'s comments, trying each configured instance in turn
    /// until one answers. Best-effort: the first non-timeout 200 wins, and
    /// the raw upstream JSON body is cached and relayed unmodified.
    async fn fetch(&self, video_id: &str, query: &str) -> Option<String> {
        let cache_key = format!("{video_id}?{query}");
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Some(cached);
        }

        for instance in &self.instances {
            let url = format!("{instance}/api/v1/comments/{video_id}?{query}");
            let attempt = tokio::time::timeout(UPSTREAM_TIMEOUT, self.client.get(&url).send()).await;
            let Ok(Ok(resp)) = attempt else { continue };
            if !resp.status().is_success() {
                continue;
            }
            let Ok(body) = resp.text().await else { continue };
            self.cache.insert(cache_key, body.clone()).await;
            return Some(body);
        }
        None
    }
}

fn with_proxy(proxy: CommentsProxy) -> impl Filter<Extract = (CommentsProxy,), Error = Infallible> + Clone {
    warp::any().map(move || proxy.clone())
}

/// `GET /comments/:videoId?sort_by=...&continuation=...`.
pub fn routes(proxy: CommentsProxy) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("comments" / String)
        .and(warp::get())
        .and(warp::query::raw().or(warp::any().map(String::new)).unify())
        .and(with_proxy(proxy))
        .and_then(|video_id: String, query: String, proxy: CommentsProxy| async move {
            let (body, status) = match proxy.fetch(&video_id, &query).await {
                Some(body) => (body, StatusCode::OK),
                None => ("{\"error\":\"upstream unavailable\"}".to_owned(), StatusCode::BAD_GATEWAY),
            };
            Ok::<_, warp::Rejection>(warp::reply::with_status(
                warp::reply::with_header(body, "content-type", "application/json"),
                status,
            ))
        })
}
