pub mod device;
pub mod qwen;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

use crate::model::{Conversation, GenerationParams, GenerationResponse};

/// Turns a conversation into a generation response. One blocking call per request.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        conversation: &Conversation,
        params: &GenerationParams,
    ) -> Result<GenerationResponse>;

    fn model_name(&self) -> &str;
}

/// Something that can build a generator, usually by loading weights.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn TextGenerator>>;

    fn describe(&self) -> String;
}

/// Process-wide lazily loaded generator.
///
/// The first `get` loads through the source; everyone else waits on the same
/// initialization and then shares the instance. A failed load leaves the cell
/// empty so the next request tries again.
pub struct InferenceService {
    source: Arc<dyn ModelSource>,
    cell: OnceCell<Arc<dyn TextGenerator>>,
}

impl InferenceService {
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            source,
            cell: OnceCell::new(),
        }
    }

    /// Wraps an already loaded generator.
    pub fn preloaded(generator: Arc<dyn TextGenerator>) -> Self {
        let service = Self::new(Arc::new(Preloaded(generator.clone())));
        // a fresh cell cannot already be set
        let _ = service.cell.set(generator);
        service
    }

    pub async fn get(&self) -> Result<Arc<dyn TextGenerator>> {
        let generator = self
            .cell
            .get_or_try_init(|| async {
                info!(
                    source = self.source.describe().as_str(),
                    "loading model (first request only)"
                );
                self.source.load().await
            })
            .await?;
        Ok(generator.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

struct Preloaded(Arc<dyn TextGenerator>);

#[async_trait]
impl ModelSource for Preloaded {
    async fn load(&self) -> Result<Arc<dyn TextGenerator>> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        self.0.model_name().to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::model::ChatMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes a canned reply and records every call.
    pub struct FakeGenerator {
        pub reply: std::result::Result<String, String>,
        pub calls: Mutex<Vec<(Conversation, GenerationParams)>>,
    }

    impl FakeGenerator {
        pub fn answering(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(
            &self,
            conversation: &Conversation,
            params: &GenerationParams,
        ) -> Result<GenerationResponse> {
            self.calls
                .lock()
                .unwrap()
                .push((conversation.clone(), *params));
            match &self.reply {
                Ok(text) => Ok(GenerationResponse::single(
                    conversation.with_reply(ChatMessage::assistant(text.clone())),
                )),
                Err(msg) => Err(anyhow::anyhow!(msg.clone())),
            }
        }

        fn model_name(&self) -> &str {
            "fake-model"
        }
    }

    /// Counts loads; optionally fails the first `fail_first` attempts.
    pub struct CountingSource {
        pub generator: Arc<FakeGenerator>,
        pub loads: AtomicUsize,
        pub fail_first: usize,
    }

    impl CountingSource {
        pub fn new(generator: Arc<FakeGenerator>) -> Arc<Self> {
            Arc::new(Self {
                generator,
                loads: AtomicUsize::new(0),
                fail_first: 0,
            })
        }
    }

    #[async_trait]
    impl ModelSource for CountingSource {
        async fn load(&self) -> Result<Arc<dyn TextGenerator>> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if attempt < self.fail_first {
                anyhow::bail!("weights missing");
            }
            Ok(self.generator.clone() as Arc<dyn TextGenerator>)
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{CountingSource, FakeGenerator};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn loads_once_across_many_requests() {
        let source = CountingSource::new(FakeGenerator::answering("ok"));
        let service = InferenceService::new(source.clone());

        assert!(!service.is_loaded());
        for _ in 0..5 {
            service.get().await.unwrap();
        }
        assert!(service.is_loaded());
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_requests_share_one_load() {
        let source = CountingSource::new(FakeGenerator::answering("ok"));
        let service = Arc::new(InferenceService::new(source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.get().await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let source = Arc::new(CountingSource {
            generator: FakeGenerator::answering("ok"),
            loads: AtomicUsize::new(0),
            fail_first: 1,
        });
        let service = InferenceService::new(source.clone());

        let err = service.get().await.err().unwrap();
        assert!(err.to_string().contains("weights missing"));
        assert!(!service.is_loaded());

        service.get().await.unwrap();
        assert!(service.is_loaded());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn preloaded_service_never_loads() {
        let service = InferenceService::preloaded(FakeGenerator::answering("ok"));
        assert!(service.is_loaded());
        let generator = service.get().await.unwrap();
        assert_eq!(generator.model_name(), "fake-model");
        assert!(Arc::ptr_eq(&generator, &service.get().await.unwrap()));
    }
}
