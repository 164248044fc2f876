use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};

use crate::{
    api::types::{AskRequest, AskResponse, ErrorResponse, SettingsResponse, WarningResponse},
    controller::{InteractionController, Outcome},
    model::params::{MAX_LENGTH, TEMPERATURE, TOP_P},
    ws::AppState,
};

pub const EXAMPLE_QUESTIONS: &[&str] = &[
    "What is artificial intelligence?",
    "Explain the theory of relativity",
    "Write a poem about the ocean",
    "How does machine learning work?",
    "Give me tips to code better",
    "Translate \"Hello\" to 5 languages",
];

const INDEX_HTML: &str = include_str!("../../static/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        parameters: parameter_count(&state.model_name),
        model: state.model_name.clone(),
        model_loaded: state.infer.is_loaded(),
        max_length: MAX_LENGTH,
        temperature: TEMPERATURE,
        top_p: TOP_P,
        examples: EXAMPLE_QUESTIONS,
    })
}

/// One-shot question over plain HTTP; same controller as the websocket.
pub async fn ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(ErrorResponse {
                    error: "invalid request body".to_string(),
                    detail: Some(rejection.body_text()),
                }),
            )
                .into_response();
        }
    };

    let mut controller = InteractionController::new(state.infer.clone());
    let outcome = controller
        .submit(&req.question, req.params.into(), |_| {})
        .await;

    match outcome {
        Outcome::Answer { text } => (
            StatusCode::OK,
            Json(AskResponse {
                answer: text,
                model: state.model_name,
            }),
        )
            .into_response(),
        Outcome::Warning { message } => (
            StatusCode::BAD_REQUEST,
            Json(WarningResponse { warning: message }),
        )
            .into_response(),
        Outcome::Failed { message, detail } => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: message,
                detail: Some(detail),
            }),
        )
            .into_response(),
    }
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "route not found".to_string(),
            detail: None,
        }),
    )
        .into_response()
}

/// Size tag from a hub id such as `Qwen/Qwen2.5-3B-Instruct` ("3 billion").
fn parameter_count(model_id: &str) -> Option<String> {
    let name = model_id.rsplit('/').next()?;
    name.split('-').find_map(|part| {
        let size = part.strip_suffix(['B', 'b'])?;
        size.parse::<f64>().ok()?;
        Some(format!("{size} billion"))
    })
}
