use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pagetalk_core::Message;
use pagetalk_tree::SendMessageRequest;

use crate::handlers::error_response;
use crate::state::AppState;

/// Returned by send and edit alike: the persisted user turn plus where to
/// watch the assistant's answer arrive.
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub message: Message,
    pub assistant_message_id: Uuid,
    pub stream_url: String,
}

impl TurnResponse {
    fn new(message: Message, assistant_message_id: Uuid) -> Self {
        Self {
            message,
            assistant_message_id,
            stream_url: format!("/api/v1/stream/{assistant_message_id}"),
        }
    }
}

pub async fn send(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<SendMessageRequest>,
) -> impl Responder {
    let conversation_id = path.into_inner();
    match state
        .manager
        .send_message(conversation_id, req.into_inner())
        .await
    {
        Ok(outcome) => HttpResponse::Created().json(TurnResponse::new(
            outcome.user_message,
            outcome.assistant_message_id,
        )),
        Err(error) => error_response(&error),
    }
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

pub async fn edit(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<EditMessageRequest>,
) -> impl Responder {
    let message_id = path.into_inner();
    match state
        .manager
        .edit_message(message_id, req.into_inner().content)
        .await
    {
        Ok(outcome) => HttpResponse::Ok().json(TurnResponse::new(
            outcome.message,
            outcome.assistant_message_id,
        )),
        Err(error) => error_response(&error),
    }
}

/// Agent steps for a message id, which may be either the triggering user
/// message or the concluding assistant message.
pub async fn steps(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    let message_id = path.into_inner();
    let by_user = match state.steps.steps_for_user_message(message_id).await {
        Ok(steps) => steps,
        Err(error) => return error_response(&error),
    };
    if !by_user.is_empty() {
        return HttpResponse::Ok().json(by_user);
    }
    match state.steps.steps_for_assistant_message(message_id).await {
        Ok(steps) => HttpResponse::Ok().json(steps),
        Err(error) => error_response(&error),
    }
}
