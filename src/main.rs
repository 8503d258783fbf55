use actix_web::{web, App, HttpServer};
use project_chat_gateway::{
    config, db, error,
    gateway::ChatGateway,
    logging, routes,
    services::{
        identity::JwtVerifier,
        store::{PgMembershipChecker, PgMessageStore},
    },
    state::AppState,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let pool = db::init_pool(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    let verifier = Arc::new(JwtVerifier::new(cfg.jwt_secret.as_bytes()));
    let membership = Arc::new(PgMembershipChecker::new(pool.clone()));
    let store = Arc::new(PgMessageStore::new(pool.clone()));
    let gateway = Arc::new(ChatGateway::new(cfg.gateway(), verifier, membership, store));

    let state = AppState {
        gateway,
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting project-chat-gateway");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .service(routes::wsroute::ws_handler)
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}
