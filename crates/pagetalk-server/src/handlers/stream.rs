use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use futures::{Stream, StreamExt};
use uuid::Uuid;

use pagetalk_stream::StreamChunk;

use crate::handlers::error_response;
use crate::state::AppState;

/// SSE feed for one assistant message. Late subscribers get the full buffer
/// replayed; a message finalized before the subscription existed is served
/// from storage instead, so the endpoint never hangs on a finished stream.
pub async fn handler(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    let message_id = path.into_inner();

    // Subscribe before the pending check. If finalization lands in between,
    // the check sees the final state and we serve storage; if it lands after,
    // the subscription was attached before the buffer is released.
    let subscription = state.broker.subscribe(message_id);

    let message = match state.conversations.get_message(message_id).await {
        Ok(message) => message,
        Err(error) => return error_response(&error),
    };

    if message.is_pending() {
        log::info!("[{}] stream attached", message_id);
        return sse(subscription);
    }

    log::debug!("[{}] stream requested after finalization", message_id);
    let replay = match message.error_marker() {
        Some(error) => vec![StreamChunk::Error {
            message: error.to_string(),
        }],
        None => vec![
            StreamChunk::Delta {
                content: message.content,
            },
            StreamChunk::Done,
        ],
    };
    sse(futures::stream::iter(replay))
}

fn sse(chunks: impl Stream<Item = StreamChunk> + 'static) -> HttpResponse {
    HttpResponse::Ok()
        .append_header((header::CONTENT_TYPE, "text/event-stream"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((header::CONNECTION, "keep-alive"))
        .streaming(async_stream::stream! {
            futures::pin_mut!(chunks);
            while let Some(chunk) = chunks.next().await {
                let terminal = chunk.is_terminal();
                match serde_json::to_string(&chunk) {
                    Ok(json) => {
                        yield Ok::<_, actix_web::Error>(web::Bytes::from(format!(
                            "data: {json}\n\n"
                        )));
                    }
                    Err(error) => {
                        log::error!("failed to serialize stream chunk: {error}");
                    }
                }
                if terminal {
                    break;
                }
            }
        })
}
