use std::sync::Arc;

use log::info;
use serde::Deserialize;
use warp::Filter;

use drawroom::auth::TokenVerifier;
use drawroom::config::Config;
use drawroom::registry::Registry;
use drawroom::routes;
use drawroom::server::Server;
use drawroom::store::{SqliteStore, Store};

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env();

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .expect("failed to open database"),
    );
    let registry = Arc::new(Registry::new());
    let verifier = Arc::new(TokenVerifier::new(&config.jwt_secret));
    let server = Arc::new(Server::new(
        registry.clone(),
        store.clone(),
        verifier.clone(),
    ));

    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(warp::query::<WsQuery>())
        .map(move |ws: warp::ws::Ws, query: WsQuery| {
            let server = server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket, query.token).await;
            })
        });

    let api = routes::api(store, verifier, config.chat_history_limit);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["authorization", "content-type"])
        .allow_methods(vec!["GET", "POST", "DELETE"]);

    let router = ws_route
        .or(api)
        .recover(routes::handle_rejection)
        .with(cors);

    info!("server starting on port {}", config.port);
    warp::serve(router).run(([0, 0, 0, 0], config.port)).await;
}
