use minijinja::Environment;
use serde::Serialize;

use crate::model::{ChatMessage, Conversation};

pub const STOP_SEQS: &[&str] = &["<|im_end|>", "<|endoftext|>"];
const CHAT_TEMPLATE_NAME: &str = "hf_chat_template";

/// ChatML, used when the tokenizer config carries no template.
pub const CHATML_TEMPLATE: &str = "{% if messages[0]['role'] != 'system' %}\
<|im_start|>system\n{{ default_system }}<|im_end|>\n\
{% endif %}\
{% for message in messages %}\
<|im_start|>{{ message['role'] }}\n{{ message['content'] }}<|im_end|>\n\
{% endfor %}\
{% if add_generation_prompt %}<|im_start|>assistant\n{% endif %}";

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Qwen, created by Alibaba Cloud. You are a helpful assistant.";

#[derive(Serialize)]
struct TemplateContext<'a> {
    messages: &'a [ChatMessage],
    add_generation_prompt: bool,
    default_system: &'a str,
    bos_token: &'a str,
    eos_token: &'a str,
    tools: Option<&'a [serde_json::Value]>,
}

/// Jinja chat template shipped with the tokenizer.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    source: String,
}

impl ChatTemplate {
    pub fn new(source: impl Into<String>) -> Result<Self, minijinja::Error> {
        let template = Self {
            source: source.into(),
        };
        // compile once up front so a broken template fails at load time
        template.environment()?;
        Ok(template)
    }

    pub fn chatml() -> Self {
        Self {
            source: CHATML_TEMPLATE.to_string(),
        }
    }

    /// Picks `chat_template` out of a `tokenizer_config.json` value.
    pub fn from_tokenizer_config(config: &serde_json::Value) -> Option<String> {
        match config.get("chat_template")? {
            serde_json::Value::String(s) => Some(s.clone()),
            // newer configs store a list of named templates
            serde_json::Value::Array(items) => items
                .iter()
                .find(|item| item.get("name").and_then(|n| n.as_str()) == Some("default"))
                .or_else(|| items.first())
                .and_then(|item| item.get("template"))
                .and_then(|t| t.as_str())
                .map(str::to_string),
            _ => None,
        }
    }

    fn environment(&self) -> Result<Environment<'_>, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(CHAT_TEMPLATE_NAME, &self.source)?;
        Ok(env)
    }

    /// Renders the conversation and opens an assistant turn for the model to fill.
    pub fn render(&self, conversation: &Conversation) -> Result<String, minijinja::Error> {
        let env = self.environment()?;
        let ctx = TemplateContext {
            messages: conversation.messages(),
            add_generation_prompt: true,
            default_system: DEFAULT_SYSTEM_PROMPT,
            bos_token: "",
            eos_token: STOP_SEQS[1],
            tools: None,
        };
        env.get_template(CHAT_TEMPLATE_NAME)?.render(ctx)
    }
}

/// Cuts `text` at the first stop sequence.
pub fn trim_partial_chatml(text: &str) -> &str {
    let end = STOP_SEQS
        .iter()
        .filter_map(|seq| text.find(seq))
        .min()
        .unwrap_or(text.len());
    &text[..end]
}

pub fn clean_reply(raw: &str) -> String {
    trim_partial_chatml(raw)
        .replace("<|im_start|>", "")
        .trim()
        .to_string()
}
