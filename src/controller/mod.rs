use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::inference::InferenceService;
use crate::model::{Conversation, GenerationParams};

pub const EMPTY_INPUT_WARNING: &str = "Please write a question before submitting";
pub const GENERATION_FAILED: &str = "Error generating response";

/// What the UI shows after a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Answer {
        text: String,
    },
    Warning {
        message: String,
    },
    #[serde(rename = "error")]
    Failed {
        message: String,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    Generating,
    Displayed(Outcome),
}

impl InteractionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Displayed(_) => "displayed",
        }
    }
}

/// Per-session question/answer state machine.
///
/// `Idle`/`Displayed` --non-empty--> `Generating` --> `Displayed`;
/// empty input stays in `Idle` with a warning and never reaches the model.
pub struct InteractionController {
    inference: Arc<InferenceService>,
    state: InteractionState,
}

impl InteractionController {
    pub fn new(inference: Arc<InferenceService>) -> Self {
        Self {
            inference,
            state: InteractionState::Idle,
        }
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    /// Handles one press of the ask button. `on_transition` sees every state entered.
    pub async fn submit<F>(
        &mut self,
        input: &str,
        params: GenerationParams,
        mut on_transition: F,
    ) -> Outcome
    where
        F: FnMut(&InteractionState),
    {
        if input.trim().is_empty() {
            let warning = Outcome::Warning {
                message: EMPTY_INPUT_WARNING.to_string(),
            };
            self.enter(InteractionState::Idle, &mut on_transition);
            return warning;
        }

        self.enter(InteractionState::Generating, &mut on_transition);

        let outcome = match self.ask(input, &params).await {
            Ok(text) => Outcome::Answer { text },
            Err(err) => {
                let detail = format!("{err:#}");
                error!(error = detail.as_str(), "generation failed");
                Outcome::Failed {
                    message: GENERATION_FAILED.to_string(),
                    detail,
                }
            }
        };

        self.enter(InteractionState::Displayed(outcome.clone()), &mut on_transition);
        outcome
    }

    async fn ask(&self, input: &str, params: &GenerationParams) -> anyhow::Result<String> {
        let generator = self.inference.get().await?;
        let conversation = Conversation::single_turn(input);

        info!(
            chars = input.len(),
            max_length = params.max_length,
            temperature = params.temperature,
            top_p = params.top_p,
            "generating answer"
        );
        let response = generator.generate(&conversation, params).await?;
        Ok(response.answer()?.to_string())
    }

    fn enter<F>(&mut self, state: InteractionState, on_transition: &mut F)
    where
        F: FnMut(&InteractionState),
    {
        self.state = state;
        on_transition(&self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::{CountingSource, FakeGenerator};
    use crate::inference::{ModelSource, TextGenerator};
    use crate::model::{ChatMessage, GenerationResponse, Role};
    use async_trait::async_trait;

    fn controller_with(generator: Arc<FakeGenerator>) -> InteractionController {
        InteractionController::new(Arc::new(InferenceService::preloaded(generator)))
    }

    #[tokio::test]
    async fn question_triggers_exactly_one_call_with_verbatim_content() {
        let generator = FakeGenerator::answering("AI is the simulation of intelligence.");
        let mut controller = controller_with(generator.clone());

        let mut seen = Vec::new();
        let outcome = controller
            .submit(
                "What is artificial intelligence?",
                GenerationParams::default(),
                |s| seen.push(s.name()),
            )
            .await;

        assert_eq!(
            outcome,
            Outcome::Answer {
                text: "AI is the simulation of intelligence.".into()
            }
        );
        assert_eq!(seen, vec!["generating", "displayed"]);
        assert_eq!(controller.state().name(), "displayed");

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (conversation, params) = &calls[0];
        assert_eq!(
            conversation.messages(),
            &[ChatMessage {
                role: Role::User,
                content: "What is artificial intelligence?".into()
            }]
        );
        assert_eq!(*params, GenerationParams::default());
    }

    #[tokio::test]
    async fn empty_or_blank_input_warns_without_generating() {
        let generator = FakeGenerator::answering("unused");
        let mut controller = controller_with(generator.clone());

        for input in ["", "   ", "\n\t"] {
            let mut seen = Vec::new();
            let outcome = controller
                .submit(input, GenerationParams::default(), |s| seen.push(s.clone()))
                .await;
            assert_eq!(
                outcome,
                Outcome::Warning {
                    message: EMPTY_INPUT_WARNING.into()
                }
            );
            assert_eq!(seen, vec![InteractionState::Idle]);
            assert_eq!(controller.state(), &InteractionState::Idle);
        }
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn generation_error_is_displayed_not_propagated() {
        let generator = FakeGenerator::failing("CUDA out of memory");
        let mut controller = controller_with(generator.clone());

        let outcome = controller
            .submit("hello", GenerationParams::default(), |_| {})
            .await;

        match &outcome {
            Outcome::Failed { message, detail } => {
                assert_eq!(message, GENERATION_FAILED);
                assert!(detail.contains("CUDA out of memory"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(controller.state(), &InteractionState::Displayed(outcome));
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn load_failure_is_displayed_as_error() {
        let source = Arc::new(CountingSource {
            generator: FakeGenerator::answering("ok"),
            loads: std::sync::atomic::AtomicUsize::new(0),
            fail_first: 1,
        });
        let inference = Arc::new(InferenceService::new(source));
        let mut controller = InteractionController::new(inference.clone());

        let first = controller
            .submit("hi", GenerationParams::default(), |_| {})
            .await;
        assert!(
            matches!(first, Outcome::Failed { ref detail, .. } if detail.contains("weights missing"))
        );

        let second = controller
            .submit("hi", GenerationParams::default(), |_| {})
            .await;
        assert_eq!(second, Outcome::Answer { text: "ok".into() });
    }

    #[tokio::test]
    async fn model_loads_once_for_many_questions() {
        let generator = FakeGenerator::answering("ok");
        let source = CountingSource::new(generator.clone());
        let inference = Arc::new(InferenceService::new(source.clone()));
        let mut controller = InteractionController::new(inference.clone());

        for i in 0..4 {
            controller
                .submit(&format!("question {i}"), GenerationParams::default(), |_| {})
                .await;
        }
        // a second session shares the same loaded model
        let mut other = InteractionController::new(inference);
        other
            .submit("another", GenerationParams::default(), |_| {})
            .await;

        assert_eq!(source.loads.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(generator.call_count(), 5);
    }

    struct ShortResponse;

    #[async_trait]
    impl TextGenerator for ShortResponse {
        async fn generate(
            &self,
            conversation: &Conversation,
            _params: &GenerationParams,
        ) -> anyhow::Result<GenerationResponse> {
            Ok(GenerationResponse::single(conversation.messages().to_vec()))
        }

        fn model_name(&self) -> &str {
            "short"
        }
    }

    struct ShortSource;

    #[async_trait]
    impl ModelSource for ShortSource {
        async fn load(&self) -> anyhow::Result<Arc<dyn TextGenerator>> {
            Ok(Arc::new(ShortResponse))
        }

        fn describe(&self) -> String {
            "short".into()
        }
    }

    #[tokio::test]
    async fn malformed_response_becomes_error_outcome() {
        let inference = Arc::new(InferenceService::new(Arc::new(ShortSource)));
        let mut controller = InteractionController::new(inference);

        let outcome = controller
            .submit("hello", GenerationParams::default(), |_| {})
            .await;
        match outcome {
            Outcome::Failed { detail, .. } => {
                assert!(detail.contains("expected at least 2"), "{detail}")
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn outcomes_serialize_as_ui_events() {
        let answer = serde_json::to_value(Outcome::Answer { text: "hi".into() }).unwrap();
        assert_eq!(answer, serde_json::json!({ "type": "answer", "text": "hi" }));

        let failed = serde_json::to_value(Outcome::Failed {
            message: GENERATION_FAILED.into(),
            detail: "boom".into(),
        })
        .unwrap();
        assert_eq!(
            failed,
            serde_json::json!({
                "type": "error",
                "message": "Error generating response",
                "detail": "boom"
            })
        );
    }

    #[tokio::test]
    async fn displayed_state_accepts_next_question() {
        let generator = FakeGenerator::answering("first");
        let mut controller = controller_with(generator.clone());

        controller
            .submit("one", GenerationParams::default(), |_| {})
            .await;
        let warning = controller
            .submit("", GenerationParams::default(), |_| {})
            .await;
        assert!(matches!(warning, Outcome::Warning { .. }));
        assert_eq!(controller.state(), &InteractionState::Idle);

        controller
            .submit("two", GenerationParams::bounded(130.0, 0.9, 0.95), |_| {})
            .await;
        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.max_length, 150);
        assert_eq!(calls[1].1.temperature, 0.9);
        assert_eq!(calls[1].1.top_p, 0.95);
    }
}
