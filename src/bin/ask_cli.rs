use anyhow::Result;
use std::io::{self, Write};
use std::sync::Arc;

use qwen_assistant::config::AppConfig;
use qwen_assistant::controller::{InteractionController, InteractionState, Outcome};
use qwen_assistant::inference::qwen::QwenSource;
use qwen_assistant::inference::InferenceService;
use qwen_assistant::init_tracing;
use qwen_assistant::model::GenerationParams;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env();
    let infer = Arc::new(InferenceService::new(Arc::new(QwenSource::new(
        config.model.clone(),
    ))));
    let mut controller = InteractionController::new(infer);

    println!(
        "Qwen assistant ({}). Type a question, 'exit' to quit.",
        config.model.model_id
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim_end_matches(['\r', '\n']);
        if matches!(question.trim(), "exit" | "quit") {
            break;
        }

        let outcome = controller
            .submit(question, GenerationParams::default(), |state| {
                if matches!(state, InteractionState::Generating) {
                    println!("Thinking...");
                }
            })
            .await;

        match outcome {
            Outcome::Answer { text } => println!("\n{text}\n"),
            Outcome::Warning { message } => println!("{message}"),
            Outcome::Failed { message, detail } => {
                eprintln!("{message}");
                eprintln!("  {detail}");
            }
        }
    }

    Ok(())
}
