use std::{convert::Infallible, sync::Arc, time::Duration};

use async_stream::stream;
use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    Json,
};
use futures::Stream;
use retrieval_pipeline::{Answer, AnswerRequest};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{api_state::ApiState, error::ApiError};

const MAX_QUERY_CHARS: usize = 4_000;

enum StreamMessage {
    Chunk(String),
    Answer(Box<Answer>),
}

fn validate(request: &AnswerRequest) -> Result<(), ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::ValidationError("user_id must not be empty".into()));
    }
    if request.query.trim().is_empty() {
        return Err(ApiError::ValidationError("query must not be empty".into()));
    }
    if request.query.chars().count() > MAX_QUERY_CHARS {
        return Err(ApiError::ValidationError(format!(
            "query exceeds {MAX_QUERY_CHARS} characters"
        )));
    }
    Ok(())
}

pub async fn ask(
    State(state): State<ApiState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<Answer>, ApiError> {
    validate(&request)?;
    info!(
        user_id = %request.user_id,
        attached = request.attached_document_ids.len(),
        "Received ask request"
    );

    // Dropping the handler future (client gone) cancels in-flight calls.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let answer = state.pipeline.answer(&request, &cancel).await;
    Ok(Json(answer))
}

pub async fn ask_stream(
    State(state): State<ApiState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    validate(&request)?;
    info!(
        user_id = %request.user_id,
        attached = request.attached_document_ids.len(),
        "Received streaming ask request"
    );

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (tx, mut rx) = unbounded_channel::<StreamMessage>();
    let pipeline = Arc::clone(&state.pipeline);

    tokio::spawn(async move {
        let chunk_tx = tx.clone();
        let answer = pipeline
            .answer_streaming(&request, &cancel, &mut |chunk: &str| {
                let _ = chunk_tx.send(StreamMessage::Chunk(chunk.to_string()));
            })
            .await;
        if tx.send(StreamMessage::Answer(Box::new(answer))).is_err() {
            debug!(user_id = %request.user_id, "stream closed before the answer was ready");
        }
    });

    let events = stream! {
        // Held by the stream so that a disconnect cancels the request.
        let _guard = guard;
        while let Some(message) = rx.recv().await {
            match message {
                StreamMessage::Chunk(text) => {
                    yield Ok::<Event, Infallible>(Event::default().event("chunk").data(text));
                }
                StreamMessage::Answer(answer) => {
                    match Event::default().event("answer").json_data(answer.as_ref()) {
                        Ok(event) => yield Ok(event),
                        Err(err) => {
                            error!(error = %err, "failed to encode answer event");
                            yield Ok(Event::default().event("error").data("failed to encode answer"));
                        }
                    }
                    break;
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_rejected() {
        let blank_query = AnswerRequest::new("user-1", "   ");
        assert!(matches!(validate(&blank_query), Err(ApiError::ValidationError(_))));

        let blank_user = AnswerRequest::new("", "What is the deadline?");
        assert!(matches!(validate(&blank_user), Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn overlong_queries_are_rejected() {
        let request = AnswerRequest::new("user-1", "a".repeat(MAX_QUERY_CHARS + 1));
        assert!(validate(&request).is_err());
        assert!(validate(&AnswerRequest::new("user-1", "a".repeat(MAX_QUERY_CHARS))).is_ok());
    }
}
