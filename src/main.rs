use std::sync::Arc;

use async_graphql::Data;
use async_graphql_warp::{graphql_protocol, graphql_subscription_upgrade_with_data};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::mpsc;
use warp::Filter;

use watchparty_relay::clock::SystemClock;
use watchparty_relay::cmdline::{Opts, SubCommand};
use watchparty_relay::comments::{self, CommentsProxy};
use watchparty_relay::config::Config;
use watchparty_relay::dispatcher::Dispatcher;
use watchparty_relay::hub::ConnectionHub;
use watchparty_relay::ids::ParticipantId;
use watchparty_relay::registry::Registry;
use watchparty_relay::sfu::Sfu;
use watchparty_relay::{heartbeat, http, schema, util};

/// Sent as the `connectionParams` of the GraphQL-over-WebSocket
/// `connection_init` message once a client already holds a `participantId`
/// from an earlier `room:create`/`room:join` mutation. Establishing this here
/// (rather than per-mutation) is what lets the subscription resolver in
/// `schema::SubscriptionRoot::events` know which room's event feed to
/// attach to, and lets the `ConnectionHub` notice the connection dying.
#[derive(Debug, Deserialize)]
struct ConnectionParams {
    participant_id: ParticipantId,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let Opts { subcmd: SubCommand::Run(run) } = Opts::parse();
    let config = Arc::new(Config::from_cli(run));

    let clock = Arc::new(SystemClock);
    let registry = Arc::new(Registry::new(clock));
    let sfu = Sfu::new(&config)
        .await
        .expect("failed to start mediasoup worker pool");
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sfu));
    let hub = Arc::new(ConnectionHub::new(dispatcher.clone()));

    let http_client = reqwest::Client::builder()
        .build()
        .expect("failed to build HTTP client");
    let local_pool: &'static tokio_local::LocalPoolHandle = &util::LOCAL_POOL;
    let schema = schema::schema(dispatcher.clone(), local_pool, http_client.clone());

    tokio::spawn(heartbeat::run(dispatcher.clone()));

    let ws_route = warp::ws()
        .and(graphql_protocol())
        .map(move |ws: warp::ws::Ws, protocol| {
            let schema = schema.clone();
            let hub = hub.clone();

            let reply = ws.on_upgrade(move |websocket| async move {
                let (guard_tx, mut guard_rx) = mpsc::channel(1);

                graphql_subscription_upgrade_with_data(
                    websocket,
                    protocol,
                    schema,
                    move |value| {
                        let hub = hub.clone();
                        let guard_tx = guard_tx.clone();
                        async move {
                            let mut data = Data::default();
                            if let Ok(params) = serde_json::from_value::<ConnectionParams>(value) {
                                data.insert(params.participant_id);
                                let guard = hub.guard_for(params.participant_id);
                                // A stale guard from a previous `connection_init` on
                                // this same socket (shouldn't happen, but the
                                // channel only holds one) is simply dropped, which
                                // still runs its own disconnect exactly once.
                                let _ = guard_tx.send(guard).await;
                            }
                            Ok::<_, async_graphql::Error>(data)
                        }
                    },
                )
                .await;
                // The subscription stream ended -- the socket closed, cleanly or
                // not. Dropping the guard runs the disconnect sequence.
                let _ = guard_rx.recv().await;
            });
            warp::reply::with_header(
                reply,
                "Sec-WebSocket-Protocol",
                protocol.sec_websocket_protocol(),
            )
        });

    let comments_proxy = CommentsProxy::new(http_client, &config);
    let routes = ws_route
        .or(http::routes(registry, config.clone()))
        .or(comments::routes(comments_proxy));

    let cors = match config.cors_origin.as_deref() {
        Some(origin) => warp::cors().allow_origin(origin),
        None => warp::cors().allow_any_origin(),
    }
    .allow_methods(vec!["GET", "POST"])
    .allow_headers(vec!["content-type"]);

    let server = warp::serve(routes.with(cors).with(warp::log("watchparty-relay")));
    let listen_addr: std::net::SocketAddr = config
        .listen_addr
        .parse()
        .expect("invalid listen address");

    match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) => {
            log::info!("listening on {listen_addr} (tls)");
            server.tls().cert_path(cert).key_path(key).run(listen_addr).await;
        }
        _ => {
            log::info!("listening on {listen_addr} (plaintext)");
            server.run(listen_addr).await;
        }
    }
}
