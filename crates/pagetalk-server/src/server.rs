use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::io;

use crate::handlers;
use crate::state::AppState;

/// Route table under `/api/v1`; shared between the binary and handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route(
                "/conversations",
                web::post().to(handlers::conversations::create),
            )
            .route(
                "/conversations",
                web::get().to(handlers::conversations::list),
            )
            .route(
                "/conversations/{id}",
                web::get().to(handlers::conversations::get),
            )
            .route(
                "/conversations/{id}/messages",
                web::post().to(handlers::messages::send),
            )
            .route(
                "/conversations/{id}/thread",
                web::get().to(handlers::conversations::thread),
            )
            .route(
                "/conversations/{id}/tree",
                web::get().to(handlers::conversations::tree),
            )
            .route("/messages/{id}", web::put().to(handlers::messages::edit))
            .route(
                "/messages/{id}/steps",
                web::get().to(handlers::messages::steps),
            )
            .route(
                "/stream/{assistant_message_id}",
                web::get().to(handlers::stream::handler),
            )
            .route("/health", web::get().to(handlers::health::handler)),
    );
}

pub async fn run_server(port: u16, state: AppState) -> io::Result<()> {
    let state = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(configure)
    })
    .bind(format!("0.0.0.0:{port}"))?
    .run()
    .await
}
