pub mod groq;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::errors::{AppError, ProviderError};
use crate::models::{Message, ModelSwitch};

pub use groq::GroqBackend;

const TRIAL_PROMPT: &str = "Hello";
const CONNECTION_TEST_PROMPT: &str = "Hello, can you respond with just \"API test successful\"?";

/// One completion attempt against the hosted provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Local readiness: credentials/configuration present. Must not call out.
    fn is_ready(&self) -> bool;

    /// `history` ends with the message to answer.
    async fn complete(&self, model: &str, history: &[Message]) -> Result<String, ProviderError>;

    /// Model ids the provider currently serves.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::Other { message: "model listing not supported".to_string() })
    }
}

/// Ordered candidate models plus the active one.
#[derive(Debug)]
pub struct ModelRegistry {
    candidates: Vec<String>,
    active: RwLock<String>,
}

impl ModelRegistry {
    pub fn new(active: impl Into<String>, candidates: Vec<String>) -> Self {
        Self { candidates, active: RwLock::new(active.into()) }
    }

    pub fn active(&self) -> String {
        self.active.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn contains(&self, model: &str) -> bool {
        self.candidates.iter().any(|m| m == model)
    }

    /// Sets `new` only if the active model is still `expected`.
    /// On conflict returns the model that is active instead.
    pub fn compare_and_swap(&self, expected: &str, new: &str) -> Result<(), String> {
        let mut active = self.active.write().unwrap_or_else(|p| p.into_inner());
        if *active != expected {
            return Err(active.clone());
        }
        *active = new.to_string();
        Ok(())
    }

    /// The candidate after `model`; a model outside the list falls back to the head.
    pub fn next_after(&self, model: &str) -> Option<&str> {
        match self.candidates.iter().position(|m| m == model) {
            Some(idx) => self.candidates.get(idx + 1).map(String::as_str),
            None => self.candidates.first().map(String::as_str).filter(|m| *m != model),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub status: &'static str,
    pub response_sample: String,
    pub model: String,
}

/// Owns the backend, the model registry and the per-call timeout.
pub struct ProviderGateway {
    backend: Arc<dyn CompletionBackend>,
    registry: ModelRegistry,
    allow_custom_models: bool,
    timeout: Duration,
}

impl ProviderGateway {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &ProviderConfig) -> Self {
        let mut candidates = config.candidate_models.clone();
        if !candidates.contains(&config.model) {
            candidates.insert(0, config.model.clone());
        }
        Self {
            backend,
            registry: ModelRegistry::new(config.model.clone(), candidates),
            allow_custom_models: config.allow_custom_models,
            timeout: config.timeout,
        }
    }

    pub fn active_model(&self) -> String {
        self.registry.active()
    }

    /// Models the provider reports; the configured candidates when the
    /// listing fails or comes back empty.
    pub async fn available_models(&self) -> Vec<String> {
        let listing = tokio::time::timeout(self.timeout, self.backend.list_models()).await;
        match listing {
            Ok(Ok(models)) if !models.is_empty() => models,
            Ok(Ok(_)) => self.registry.candidates().to_vec(),
            Ok(Err(e)) => {
                warn!("Model listing failed, using configured models: {e}");
                self.registry.candidates().to_vec()
            }
            Err(_) => {
                warn!("Model listing timed out, using configured models");
                self.registry.candidates().to_vec()
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    /// Single attempt bounded by the configured timeout. Retries are the caller's call.
    pub async fn complete(
        &self,
        history: &[Message],
        model: &str,
    ) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.timeout, self.backend.complete(model, history)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Completion with model {model} timed out after {:?}", self.timeout);
                Err(ProviderError::Timeout { seconds: self.timeout.as_secs() })
            }
        }
    }

    /// Advances the active model past `failed`. Returns the model to try next,
    /// which may be one another request already switched to.
    pub fn fallback_from(&self, failed: &str) -> Option<String> {
        let next = self.registry.next_after(failed)?.to_string();
        match self.registry.compare_and_swap(failed, &next) {
            Ok(()) => {
                warn!("Model {failed} rejected by provider, falling back to {next}");
                Some(next)
            }
            // Someone else already moved on from `failed`.
            Err(current) => Some(current),
        }
    }

    /// Trial-calls `model` and makes it active only if the call succeeds.
    pub async fn switch_model(&self, model: &str) -> Result<ModelSwitch, AppError> {
        let model = model.trim();
        let reject =
            |reason: String| AppError::ModelSwitchRejected { model: model.to_string(), reason };

        if model.is_empty() {
            return Err(reject("Model name is required".to_string()));
        }
        if !self.allow_custom_models && !self.registry.contains(model) {
            return Err(reject("model is not in the configured candidate list".to_string()));
        }

        let old_model = self.active_model();
        self.complete(&[Message::user(TRIAL_PROMPT)], model)
            .await
            .map_err(|e| reject(e.to_string()))?;

        self.registry
            .compare_and_swap(&old_model, model)
            .map_err(|current| {
                reject(format!("active model changed to {current} during the switch"))
            })?;

        info!("Switched active model from {old_model} to {model}");
        Ok(ModelSwitch { old_model, new_model: model.to_string() })
    }

    /// One minimal real call with the active model.
    pub async fn test_connection(&self) -> Result<ConnectionReport, ProviderError> {
        let model = self.active_model();
        let sample = self.complete(&[Message::user(CONNECTION_TEST_PROMPT)], &model).await?;
        Ok(ConnectionReport { status: "success", response_sample: sample, model })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Backend that replays scripted outcomes, then echoes.
    #[derive(Default)]
    pub struct ScriptedBackend {
        pub script: Mutex<VecDeque<Result<String, ProviderError>>>,
        pub calls: Mutex<Vec<(String, usize)>>,
        pub delay: Option<Duration>,
        /// `None` keeps the trait's default (listing unsupported).
        pub models: Option<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn with(outcomes: Vec<Result<String, ProviderError>>) -> Self {
            Self { script: Mutex::new(outcomes.into()), ..Default::default() }
        }

        pub fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn is_ready(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            model: &str,
            history: &[Message],
        ) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push((model.to_string(), history.len()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                let last = history.last().map(|m| m.content.as_str()).unwrap_or("");
                Ok(format!("echo: {last}"))
            })
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            self.models.clone().ok_or_else(|| ProviderError::Transient {
                message: "connection refused".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            model: "a".into(),
            candidate_models: vec!["a".into(), "b".into(), "c".into()],
            timeout: Duration::from_millis(200),
            ..ProviderConfig::default()
        }
    }

    fn gateway(backend: ScriptedBackend) -> (ProviderGateway, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        (ProviderGateway::new(backend.clone(), &config()), backend)
    }

    #[tokio::test]
    async fn switch_succeeds_after_trial_call() {
        let (gw, backend) = gateway(ScriptedBackend::default());
        let switch = gw.switch_model("b").await.unwrap();
        assert_eq!(switch, ModelSwitch { old_model: "a".into(), new_model: "b".into() });
        assert_eq!(gw.active_model(), "b");
        assert_eq!(backend.calls(), vec![("b".to_string(), 1)]);
    }

    #[tokio::test]
    async fn failed_trial_keeps_previous_model() {
        let (gw, _) = gateway(ScriptedBackend::with(vec![Err(ProviderError::ModelUnavailable {
            model: "zzz".into(),
            message: "model_not_found".into(),
        })]));
        let err = gw.switch_model("zzz").await.unwrap_err();
        assert!(matches!(err, AppError::ModelSwitchRejected { .. }));
        assert_eq!(gw.active_model(), "a");
    }

    #[tokio::test]
    async fn custom_models_can_be_disallowed() {
        let backend = Arc::new(ScriptedBackend::default());
        let cfg = ProviderConfig { allow_custom_models: false, ..config() };
        let gw = ProviderGateway::new(backend.clone(), &cfg);
        assert!(gw.switch_model("not-listed").await.is_err());
        assert!(gw.switch_model("   ").await.is_err());
        assert!(backend.calls().is_empty());
        assert_eq!(gw.active_model(), "a");
    }

    #[tokio::test]
    async fn fallback_walks_the_candidate_list() {
        let (gw, _) = gateway(ScriptedBackend::default());
        assert_eq!(gw.fallback_from("a").as_deref(), Some("b"));
        assert_eq!(gw.active_model(), "b");
        // A stale failure report follows whatever is active now.
        assert_eq!(gw.fallback_from("a").as_deref(), Some("b"));
        assert_eq!(gw.fallback_from("b").as_deref(), Some("c"));
        assert_eq!(gw.fallback_from("c"), None);
        assert_eq!(gw.active_model(), "c");
    }

    #[tokio::test]
    async fn concurrent_switches_have_one_winner() {
        let backend =
            ScriptedBackend { delay: Some(Duration::from_millis(50)), ..Default::default() };
        let (gw, backend) = gateway(backend);

        let (to_b, to_c) = tokio::join!(gw.switch_model("b"), gw.switch_model("c"));

        // Both trial calls ran against the same starting model.
        assert_eq!(backend.calls().len(), 2);
        let winner = match (to_b, to_c) {
            (Ok(switch), Err(AppError::ModelSwitchRejected { .. })) => switch,
            (Err(AppError::ModelSwitchRejected { .. }), Ok(switch)) => switch,
            other => panic!("expected exactly one winner, got {other:?}"),
        };
        assert_eq!(winner.old_model, "a");
        assert_eq!(gw.active_model(), winner.new_model);
    }

    #[tokio::test]
    async fn switch_loses_to_a_fallback_during_its_trial() {
        let backend =
            ScriptedBackend { delay: Some(Duration::from_millis(50)), ..Default::default() };
        let (gw, _) = gateway(backend);

        let switch = async { gw.switch_model("c").await };
        let fallback = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gw.fallback_from("a")
        };
        let (switch, fallback) = tokio::join!(switch, fallback);

        assert_eq!(fallback.as_deref(), Some("b"));
        assert!(matches!(switch, Err(AppError::ModelSwitchRejected { .. })));
        assert_eq!(gw.active_model(), "b");
    }

    #[tokio::test]
    async fn available_models_prefers_the_provider_listing() {
        let listed = vec!["live-1".to_string(), "live-2".to_string()];
        let backend = ScriptedBackend { models: Some(listed.clone()), ..Default::default() };
        let (gw, _) = gateway(backend);
        assert_eq!(gw.available_models().await, listed);

        let (gw, _) = gateway(ScriptedBackend { models: Some(Vec::new()), ..Default::default() });
        assert_eq!(gw.available_models().await, vec!["a", "b", "c"]);

        let (gw, _) = gateway(ScriptedBackend::default());
        assert_eq!(gw.available_models().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let backend = ScriptedBackend { delay: Some(Duration::from_secs(5)), ..Default::default() };
        let (gw, _) = gateway(backend);
        let err = gw.complete(&[Message::user("hi")], "a").await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_connection_reports_sample() {
        let (gw, _) = gateway(ScriptedBackend::with(vec![Ok("API test successful".into())]));
        let report = gw.test_connection().await.unwrap();
        assert_eq!(report.status, "success");
        assert_eq!(report.response_sample, "API test successful");
        assert_eq!(report.model, "a");
    }

    #[test]
    fn registry_next_after_handles_unknown_models() {
        let reg = ModelRegistry::new("x", vec!["a".into(), "b".into()]);
        assert_eq!(reg.next_after("x"), Some("a"));
        assert_eq!(reg.next_after("a"), Some("b"));
        assert_eq!(reg.next_after("b"), None);
        assert_eq!(reg.compare_and_swap("nope", "a"), Err("x".to_string()));
    }
}
