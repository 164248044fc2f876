use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, time::Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::qwen2::{Config as QwenConfig, ModelForCausalLM as Qwen2};
use candle_transformers::utils::apply_repeat_penalty;
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::device::{select_device, select_dtype};
use super::{ModelSource, TextGenerator};
use crate::config::ModelSettings;
use crate::conversation::{clean_reply, ChatTemplate, STOP_SEQS};
use crate::model::{ChatMessage, Conversation, GenerationParams, GenerationResponse};

const REPEAT_LAST_N: usize = 64;

// ---------------------------------------------------------
// Model files: a local snapshot directory or the hub
// ---------------------------------------------------------
#[derive(Debug)]
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    tokenizer_config: Option<PathBuf>,
    generation_config: Option<PathBuf>,
    weights: Vec<PathBuf>,
}

impl ModelFiles {
    fn from_snapshot_dir(dir: &Path) -> Result<Self> {
        let optional = |name: &str| Some(dir.join(name)).filter(|p| p.exists());

        let index_path = dir.join("model.safetensors.index.json");
        let weights = if index_path.exists() {
            shard_names(&index_path)?
                .into_iter()
                .map(|name| dir.join(name))
                .collect()
        } else {
            vec![dir.join("model.safetensors")]
        };

        Ok(Self {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            tokenizer_config: optional("tokenizer_config.json"),
            generation_config: optional("generation_config.json"),
            weights,
        })
    }

    async fn from_hub(settings: &ModelSettings) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_token(settings.hf_token.clone())
            .build()
            .context("failed to build hub client")?;
        let repo = api.repo(Repo::with_revision(
            settings.model_id.clone(),
            RepoType::Model,
            settings.revision.clone(),
        ));

        let config = fetch(&repo, "config.json").await?;
        let tokenizer = fetch(&repo, "tokenizer.json").await?;
        let tokenizer_config = repo.get("tokenizer_config.json").await.ok();
        let generation_config = repo.get("generation_config.json").await.ok();

        let weights = match repo.get("model.safetensors.index.json").await {
            Ok(index_path) => {
                let mut files = Vec::new();
                for name in shard_names(&index_path)? {
                    files.push(fetch(&repo, &name).await?);
                }
                files
            }
            Err(_) => vec![fetch(&repo, "model.safetensors").await?],
        };

        Ok(Self {
            config,
            tokenizer,
            tokenizer_config,
            generation_config,
            weights,
        })
    }
}

async fn fetch(repo: &ApiRepo, name: &str) -> Result<PathBuf> {
    debug!(file = name, "fetching from hub");
    repo.get(name)
        .await
        .with_context(|| format!("failed to download {name}"))
}

/// Distinct shard file names listed in a safetensors index, in sorted order.
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let index_json: serde_json::Value = serde_json::from_slice(&fs::read(index_path)?)?;
    let names = index_json["weight_map"]
        .as_object()
        .ok_or_else(|| anyhow!("index.json: weight_map is not an object"))?
        .values()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("invalid shard entry in index.json"))
        })
        .collect::<Result<BTreeSet<_>>>()?;
    Ok(names.into_iter().collect())
}

/// `eos_token_id` from generation_config.json; may be a number or a list.
fn eos_ids_from_generation_config(value: &serde_json::Value) -> Vec<u32> {
    match value.get("eos_token_id") {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|v| v as u32).into_iter().collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_u64())
            .map(|v| v as u32)
            .collect(),
        _ => Vec::new(),
    }
}

/// `top_k` from generation_config.json; absent or zero disables the cut.
fn top_k_from_generation_config(value: &serde_json::Value) -> Option<usize> {
    value
        .get("top_k")
        .and_then(|v| v.as_u64())
        .filter(|&k| k > 0)
        .map(|k| k as usize)
}

fn sampling_for(params: &GenerationParams, top_k: Option<usize>) -> Sampling {
    match top_k {
        Some(k) => Sampling::TopKThenTopP {
            k,
            p: params.top_p,
            temperature: params.temperature,
        },
        None => Sampling::TopP {
            p: params.top_p,
            temperature: params.temperature,
        },
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    serde_json::from_slice(&fs::read(path)?)
        .with_context(|| format!("invalid JSON in {}", path.display()))
}

// ---------------------------------------------------------
// PUBLIC SERVICE
// ---------------------------------------------------------
pub struct QwenService {
    model: Arc<Mutex<Qwen2>>,
    tokenizer: Arc<Tokenizer>,
    template: ChatTemplate,
    device: Device,
    stop_tokens: Vec<u32>,
    repeat_penalty: f32,
    top_k: Option<usize>,
    seed: Option<u64>,
    name: String,
}

impl QwenService {
    pub async fn load(settings: &ModelSettings) -> Result<Self> {
        let started = Instant::now();
        let device = select_device(settings.device)?;
        let dtype = select_dtype(&device, settings.precision);
        info!(
            model = settings.model_id.as_str(),
            device = ?device,
            dtype = ?dtype,
            "loading Qwen model"
        );

        let local_dir = Path::new(&settings.model_id);
        let files = if local_dir.is_dir() {
            info!(path = %local_dir.display(), "using local snapshot");
            ModelFiles::from_snapshot_dir(local_dir)?
        } else {
            ModelFiles::from_hub(settings).await?
        };

        // ---- Tokenizer ----
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Tokenizer error: {e}"))?;

        let template = match files.tokenizer_config.as_deref().map(read_json).transpose()? {
            Some(cfg) => match ChatTemplate::from_tokenizer_config(&cfg) {
                Some(source) => ChatTemplate::new(source).context("invalid chat template")?,
                None => {
                    warn!("tokenizer_config.json has no chat_template, using ChatML");
                    ChatTemplate::chatml()
                }
            },
            None => ChatTemplate::chatml(),
        };

        // ---- Stop tokens + sampling defaults ----
        let generation_config = files
            .generation_config
            .as_deref()
            .map(read_json)
            .transpose()?;

        let mut stop_tokens: Vec<u32> = STOP_SEQS
            .iter()
            .filter_map(|seq| tokenizer.token_to_id(seq))
            .collect();
        if let Some(cfg) = &generation_config {
            stop_tokens.extend(eos_ids_from_generation_config(cfg));
        }
        stop_tokens.sort_unstable();
        stop_tokens.dedup();
        if stop_tokens.is_empty() {
            bail!("tokenizer knows none of the stop tokens {STOP_SEQS:?}");
        }

        let repeat_penalty = generation_config
            .as_ref()
            .and_then(|cfg| cfg.get("repetition_penalty"))
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0) as f32;
        let top_k = generation_config
            .as_ref()
            .and_then(top_k_from_generation_config);

        // ---- Config + weights ----
        let cfg: QwenConfig = serde_json::from_slice(&fs::read(&files.config)?)
            .context("failed to parse config.json")?;
        info!(shards = files.weights.len(), "mapping safetensors");

        let weights = files.weights;
        let model_device = device.clone();
        let model = tokio::task::spawn_blocking(move || -> Result<Qwen2> {
            let vb =
                unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &model_device)? };
            Ok(Qwen2::new(&cfg, vb)?)
        })
        .await??;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            stop_tokens = ?stop_tokens,
            repeat_penalty,
            top_k = ?top_k,
            "Qwen model ready"
        );

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            tokenizer: Arc::new(tokenizer),
            template,
            device,
            stop_tokens,
            repeat_penalty,
            top_k,
            seed: settings.seed,
            name: settings.model_id.clone(),
        })
    }

    async fn sample_reply(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let enc = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| anyhow!("Tokenizer encode error: {e}"))?;
        let mut tokens = enc.get_ids().to_vec();
        let prompt_len = tokens.len();

        if prompt_len >= params.max_length {
            bail!(
                "prompt is {prompt_len} tokens, which already reaches the maximum length of {}",
                params.max_length
            );
        }
        let max_new_tokens = params.max_length - prompt_len;

        let seed = self.seed.unwrap_or_else(rand::random);
        let mut lp = LogitsProcessor::from_sampling(seed, sampling_for(params, self.top_k));

        let mut model = self.model.lock().await;
        model.clear_kv_cache();

        let mut pos = 0usize;
        for _ in 0..max_new_tokens {
            // first step: whole prompt; later: last token only
            let ctx_start = if pos == 0 { 0 } else { tokens.len() - 1 };
            let ctx = &tokens[ctx_start..];
            let input = Tensor::new(ctx, &self.device)?.unsqueeze(0)?;

            let logits = model
                .forward(&input, pos)?
                .squeeze(0)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;
            pos += ctx.len();

            let logits = if self.repeat_penalty == 1.0 {
                logits
            } else {
                let start = tokens.len().saturating_sub(REPEAT_LAST_N);
                apply_repeat_penalty(&logits, self.repeat_penalty, &tokens[start..])?
            };

            let next = lp.sample(&logits)?;
            if self.stop_tokens.contains(&next) {
                break;
            }
            tokens.push(next);

            tokio::task::yield_now().await;
        }
        drop(model);

        let generated = &tokens[prompt_len..];
        debug!(
            prompt_tokens = prompt_len,
            new_tokens = generated.len(),
            "generation finished"
        );
        if generated.is_empty() {
            return Ok(String::new());
        }

        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {e}"))?;
        Ok(clean_reply(&text))
    }
}

#[async_trait]
impl TextGenerator for QwenService {
    async fn generate(
        &self,
        conversation: &Conversation,
        params: &GenerationParams,
    ) -> Result<GenerationResponse> {
        let prompt = self
            .template
            .render(conversation)
            .context("chat template rendering failed")?;
        let reply = self.sample_reply(&prompt, params).await?;
        Ok(GenerationResponse::single(
            conversation.with_reply(ChatMessage::assistant(reply)),
        ))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Loads a Qwen2 checkpoint on first use.
pub struct QwenSource {
    settings: ModelSettings,
}

impl QwenSource {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ModelSource for QwenSource {
    async fn load(&self) -> Result<Arc<dyn TextGenerator>> {
        let service = QwenService::load(&self.settings).await?;
        Ok(Arc::new(service))
    }

    fn describe(&self) -> String {
        format!(
            "{}@{} on {}",
            self.settings.model_id, self.settings.revision, self.settings.device
        )
    }
}
