use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use dotenv::dotenv;
use env_logger::Env;
use log::info;
use tower_http::trace::TraceLayer;

use mathchat::config::Settings;
use mathchat::database::db::establish_connection;
use mathchat::generation::{GenerationRegistry, GenerationSupervisor};
use mathchat::handlers::{chats, files, streaming};
use mathchat::llm::agent::OpenAiAgentModel;
use mathchat::llm::gemini::GeminiClient;
use mathchat::llm::ModelClient;
use mathchat::retrieval::PgVectorRetriever;
use mathchat::state::AppState;
use mathchat::store::PgChatStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let settings = Settings::from_env().expect("invalid configuration");
    let pool = establish_connection(&settings.database_url)
        .expect("failed to create database connection pool");

    let model: Arc<dyn ModelClient> = Arc::new(GeminiClient::new(
        settings.gemini_api_key.clone(),
        settings.gemini_model_name.clone(),
    ));
    let store = Arc::new(PgChatStore::new(pool.clone()));
    let agent = Arc::new(OpenAiAgentModel::new(settings.rag_model_name.clone()));
    let retrieval = Arc::new(PgVectorRetriever::new(pool.clone()));

    let registry = GenerationRegistry::new();
    let supervisor = GenerationSupervisor::new(
        store,
        model.clone(),
        agent,
        retrieval,
        registry.clone(),
        settings.rag_enabled,
    );

    let state = AppState {
        pool,
        registry,
        supervisor,
        model,
        settings: Arc::new(settings.clone()),
    };

    let app = Router::new()
        .route("/chats", post(chats::create_chat).get(chats::list_chats))
        .route(
            "/chats/{chat_id}",
            get(chats::get_chat)
                .patch(chats::update_chat)
                .delete(chats::delete_chat),
        )
        .route("/chats/{chat_id}/messages", get(chats::list_messages))
        .route("/chats/{chat_id}/stream", post(streaming::stream_chat_response))
        .route("/chats/{chat_id}/interrupt", post(streaming::interrupt_chat))
        .route(
            "/files/upload",
            post(files::upload_file).layer(files::upload_body_limit(state.settings.max_file_size)),
        )
        .route("/files/{file_id}", get(files::get_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("listening on http://{}", settings.bind_addr);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .expect("failed to bind listen address");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
