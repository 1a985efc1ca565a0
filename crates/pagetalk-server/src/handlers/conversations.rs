use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use uuid::Uuid;

use pagetalk_core::{ConversationKind, ConversationQuery};
use pagetalk_tree::AnchorContext;

use crate::handlers::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    /// Document scope for plain chats; rabbitholes derive it from the anchor.
    pub document_id: Option<Uuid>,
    pub anchor: Option<AnchorContext>,
}

pub async fn create(
    state: web::Data<AppState>,
    req: web::Json<CreateConversationRequest>,
) -> impl Responder {
    let req = req.into_inner();
    match state
        .manager
        .create_conversation(req.kind, req.document_id, req.anchor)
        .await
    {
        Ok(conversation) => HttpResponse::Created().json(conversation),
        Err(error) => error_response(&error),
    }
}

pub async fn list(
    state: web::Data<AppState>,
    query: web::Query<ConversationQuery>,
) -> impl Responder {
    match state.manager.find_conversations(&query).await {
        Ok(conversations) => HttpResponse::Ok().json(conversations),
        Err(error) => error_response(&error),
    }
}

pub async fn get(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match state.manager.get_conversation(path.into_inner()).await {
        Ok(conversation) => HttpResponse::Ok().json(conversation),
        Err(error) => error_response(&error),
    }
}

pub async fn thread(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match state.manager.get_active_thread(path.into_inner()).await {
        Ok(thread) => HttpResponse::Ok().json(thread),
        Err(error) => error_response(&error),
    }
}

pub async fn tree(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match state.manager.get_message_tree(path.into_inner()).await {
        Ok(tree) => HttpResponse::Ok().json(tree),
        Err(error) => error_response(&error),
    }
}
