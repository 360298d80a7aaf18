// src/main.rs

mod app_state;
mod auth;
mod chat;
mod chat_server;
mod config;
mod coordinator;
mod db;
mod error;
mod gateway;
mod meeting_store;
mod meetings;
mod message_store;
mod models;
mod user_directory;
mod web_socket_server;

use std::io;
use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

use crate::app_state::AppState;
use crate::auth::Authentication;
use crate::chat::get_history;
use crate::chat_server::ChatServer;
use crate::config::{Config, StoreBackend};
use crate::coordinator::MeetingCoordinator;
use crate::db::MongoDB;
use crate::gateway::ConferencingGateway;
use crate::meeting_store::{InMemoryMeetingStore, MeetingStore, MongoMeetingStore};
use crate::meetings::{
    cancel_meeting, complete_meeting, create_meeting, get_meeting, join_meeting, list_meetings,
    update_meeting,
};
use crate::message_store::{InMemoryMessageStore, MessageStore, MongoMessageStore};
use crate::user_directory::{InMemoryUserDirectory, MongoUserDirectory, UserDirectory};
use crate::web_socket_server::ws_index;

struct Stores {
    meetings: Arc<dyn MeetingStore>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
}

async fn open_stores(config: &Config) -> Result<Stores, error::CoreError> {
    match config.store_backend {
        StoreBackend::Mongo => {
            let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name).await?;
            mongodb.ensure_indexes().await?;
            info!("Using MongoDB at {} ({})", config.mongo_uri, config.database_name);
            Ok(Stores {
                meetings: Arc::new(MongoMeetingStore::new(&mongodb)),
                messages: Arc::new(MongoMessageStore::new(&mongodb)),
                users: Arc::new(MongoUserDirectory::new(&mongodb)),
            })
        }
        StoreBackend::Memory => {
            let users = match &config.seed_users_file {
                Some(path) => InMemoryUserDirectory::from_seed_file(path)?,
                None => {
                    warn!("Memory backend without SEED_USERS_FILE; no user can book meetings");
                    InMemoryUserDirectory::default()
                }
            };
            info!("Using in-memory stores; data is lost on restart");
            Ok(Stores {
                meetings: Arc::new(InMemoryMeetingStore::new()),
                messages: Arc::new(InMemoryMessageStore::new()),
                users: Arc::new(users),
            })
        }
    }
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/meetings")
                    .route("", web::get().to(list_meetings))
                    .route("/create", web::post().to(create_meeting))
                    .route("/{id}", web::get().to(get_meeting))
                    .route("/{id}", web::put().to(update_meeting))
                    .route("/{id}", web::delete().to(cancel_meeting))
                    .route("/{id}/join", web::post().to(join_meeting))
                    .route("/{id}/complete", web::post().to(complete_meeting)),
            )
            .service(web::scope("/chat").route("/history/{room}", web::get().to(get_history))),
    )
    // WEBSOCKET route for real-time
    .service(web::resource("/ws").route(web::get().to(ws_index)));
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let stores = open_stores(&config)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let gateway = Arc::new(ConferencingGateway::from_config(&config));
    let coordinator = Arc::new(MeetingCoordinator::new(stores.meetings, stores.users, gateway));
    let chat_server = ChatServer::new(stores.messages.clone()).start();

    let state = AppState {
        chat_server,
        coordinator,
        messages: stores.messages,
    };

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let frontend_origin = config.frontend_origin.clone();
    let jwt_secret = config.jwt_secret.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(jwt_secret.clone()))
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
