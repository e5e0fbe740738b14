use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MODEL: &str = "llama-3.1-70b-versatile";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Known Llama models tried in order when the active one is rejected.
pub const DEFAULT_CANDIDATE_MODELS: &[&str] = &[
    "llama-3.1-70b-versatile",
    "llama-3.1-8b-instant",
    "llama-3.2-90b-text-preview",
    "llama-3.2-11b-text-preview",
    "llama-3.2-3b-preview",
    "llama-3.2-1b-preview",
];

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant for a developer portfolio. \
    You are talking to a potential HR, manager, or developer who is visiting the portfolio \
    and helping them with their queries. You should be professional and provide accurate \
    information. Return responses in markdown format.";

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub candidate_models: Vec<String>,
    pub allow_custom_models: bool,
    pub system_prompt: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            candidate_models: DEFAULT_CANDIDATE_MODELS.iter().map(|m| m.to_string()).collect(),
            allow_custom_models: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub admin_email: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            user: None,
            password: None,
            admin_email: "admin@example.com".to_string(),
        }
    }
}

impl EmailConfig {
    /// SMTP delivery needs both halves of the credentials.
    pub fn smtp_credentials(&self) -> Option<(&str, &str)> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub max_conversations: Option<usize>,
    pub provider: ProviderConfig,
    pub email: EmailConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_conversations: None,
            provider: ProviderConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = AppConfig::default();

        let model = get("GROQ_MODEL").unwrap_or(defaults.provider.model);
        let mut candidate_models: Vec<String> = match get("GROQ_FALLBACK_MODELS") {
            Some(list) => list
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            None => defaults.provider.candidate_models,
        };
        // The configured model always leads the fallback order.
        candidate_models.retain(|m| m != &model);
        candidate_models.insert(0, model.clone());

        let provider = ProviderConfig {
            api_key: get("GROQ_API_KEY"),
            base_url: get("GROQ_BASE_URL").unwrap_or(defaults.provider.base_url),
            model,
            candidate_models,
            allow_custom_models: parse_or("ALLOW_CUSTOM_MODELS", get("ALLOW_CUSTOM_MODELS"), true),
            system_prompt: get("SYSTEM_PROMPT").unwrap_or(defaults.provider.system_prompt),
            timeout: Duration::from_secs(parse_or(
                "PROVIDER_TIMEOUT_SECS",
                get("PROVIDER_TIMEOUT_SECS"),
                30,
            )),
            max_retries: parse_or("PROVIDER_MAX_RETRIES", get("PROVIDER_MAX_RETRIES"), 2),
            retry_backoff: defaults.provider.retry_backoff,
        };

        let email = EmailConfig {
            host: get("EMAIL_HOST").unwrap_or(defaults.email.host),
            port: parse_or("EMAIL_PORT", get("EMAIL_PORT"), defaults.email.port),
            user: get("EMAIL_USER"),
            password: get("EMAIL_PASSWORD"),
            admin_email: get("ADMIN_EMAIL").unwrap_or(defaults.email.admin_email),
        };

        Self {
            port: parse_or("PORT", get("PORT"), defaults.port),
            max_conversations: get("MAX_CONVERSATIONS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0),
            provider,
            email,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {key}={v}");
            default
        }),
    }
}
