use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::{DriveStatus, NewDrive};

/// Drive fields pulled out of a pasted job description.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDrive {
    pub company_name: String,
    pub role: String,
    pub package: String,
    pub deadline: Option<NaiveDate>,
    pub description: String,
    pub requirements: Vec<String>,
}

impl ExtractedDrive {
    /// Prefills the creation form. A missing deadline falls back to `default_deadline`.
    pub fn into_new_drive(self, default_deadline: NaiveDate) -> NewDrive {
        NewDrive {
            company_name: self.company_name,
            role: self.role,
            package: self.package,
            deadline: self.deadline.unwrap_or(default_deadline),
            status: DriveStatus::Open,
            description: Some(self.description).filter(|d| !d.is_empty()),
            requirements: Some(self.requirements.join("\n")).filter(|r| !r.is_empty()),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("nothing to extract from: the input is empty")]
    EmptyInput,
    #[error("extraction timed out after {0:?}")]
    TimedOut(Duration),
    #[error("extraction was cancelled")]
    Cancelled,
    #[error("extraction provider failed: {0}")]
    Provider(String),
    #[error("extraction response was not understood: {0}")]
    Malformed(String),
}

pub trait Extractor: Send + Sync {
    fn extract(&self, raw_text: &str) -> Result<ExtractedDrive, ExtractError>;
    fn name(&self) -> &str;
}

pub fn create_extractor(config: &AppConfig) -> anyhow::Result<Arc<dyn Extractor>> {
    let model = config.extract_model.clone();
    match config.extract_provider.as_str() {
        "mock" => Ok(Arc::new(MockExtractor)),
        "openai" => {
            let provider = OpenAIProvider::new(
                model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
                config.extract_timeout,
            )?;
            Ok(Arc::new(LlmExtractor::new(Box::new(provider))))
        }
        "anthropic" => {
            let provider = AnthropicProvider::new(
                model.unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
                config.extract_timeout,
            )?;
            Ok(Arc::new(LlmExtractor::new(Box::new(provider))))
        }
        other => Err(anyhow!(
            "Unknown extraction provider '{}'. Available: mock (default), openai, anthropic",
            other
        )),
    }
}

/// Runs an extractor off the calling task. Resolves to `TimedOut` or
/// `Cancelled` if either happens first; the late result, if any, is dropped.
pub async fn run_extraction<F>(
    extractor: Arc<dyn Extractor>,
    raw_text: String,
    timeout: Duration,
    cancel: F,
) -> Result<ExtractedDrive, ExtractError>
where
    F: Future<Output = ()>,
{
    if raw_text.trim().is_empty() {
        return Err(ExtractError::EmptyInput);
    }

    let name = extractor.name().to_string();
    let task = tokio::task::spawn_blocking(move || extractor.extract(&raw_text));

    let outcome = tokio::select! {
        joined = tokio::time::timeout(timeout, task) => match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ExtractError::Provider(format!("extraction task failed: {}", e))),
            Err(_) => Err(ExtractError::TimedOut(timeout)),
        },
        _ = cancel => Err(ExtractError::Cancelled),
    };

    match &outcome {
        Ok(drive) => tracing::info!(extractor = %name, company = %drive.company_name, "Extraction finished"),
        Err(e) => tracing::warn!(extractor = %name, error = %e, "Extraction failed"),
    }
    outcome
}

// --- Mock ---

/// Stand-in that ignores its input and returns a fixed sample drive.
pub struct MockExtractor;

impl Extractor for MockExtractor {
    fn extract(&self, _raw_text: &str) -> Result<ExtractedDrive, ExtractError> {
        Ok(ExtractedDrive {
            company_name: "TechCorp Solutions".to_string(),
            role: "Full Stack Developer".to_string(),
            package: "₹18 LPA".to_string(),
            deadline: NaiveDate::from_ymd_opt(2024, 2, 15),
            description: "Join our dynamic team as a Full Stack Developer and work on cutting-edge web applications.".to_string(),
            requirements: vec![
                "B.Tech/M.Tech in CS/IT".to_string(),
                "Experience with React and Node.js".to_string(),
                "Strong problem-solving skills".to_string(),
                "CGPA > 7.0".to_string(),
            ],
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// --- LLM-backed extraction ---

pub trait CompletionProvider: Send + Sync {
    fn complete(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String>;
    fn model_name(&self) -> &str;
}

pub struct LlmExtractor {
    provider: Box<dyn CompletionProvider>,
}

impl LlmExtractor {
    pub fn new(provider: Box<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

impl Extractor for LlmExtractor {
    fn extract(&self, raw_text: &str) -> Result<ExtractedDrive, ExtractError> {
        let prompt = format!(
            "Extract the placement drive details from the company information below.\n\n\
            Return EXACTLY in this format with no other text:\n\
            COMPANY: <company name>\n\
            ROLE: <job role>\n\
            PACKAGE: <compensation, as written>\n\
            DEADLINE: <YYYY-MM-DD, or NONE>\n\
            DESCRIPTION: <one or two sentences>\n\
            REQUIREMENTS: requirement1; requirement2; requirement3\n\n\
            Company information:\n{}",
            raw_text
        );

        let response = self
            .provider
            .complete(&prompt, 1024)
            .map_err(|e| ExtractError::Provider(format!("{:#}", e)))?;
        parse_extraction(&response)
    }

    fn name(&self) -> &str {
        self.provider.model_name()
    }
}

/// Reads the `KEY: value` layout requested from the model. Company and role
/// are required; everything else may be blank.
pub fn parse_extraction(response: &str) -> Result<ExtractedDrive, ExtractError> {
    let mut company_name = String::new();
    let mut role = String::new();
    let mut package = String::new();
    let mut deadline = None;
    let mut description = String::new();
    let mut requirements = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("COMPANY:") {
            company_name = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("ROLE:") {
            role = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("PACKAGE:") {
            package = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("DEADLINE:") {
            deadline = NaiveDate::parse_from_str(rest.trim(), "%Y-%m-%d").ok();
        } else if let Some(rest) = line.strip_prefix("DESCRIPTION:") {
            description = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("REQUIREMENTS:") {
            requirements = rest
                .split(';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    if company_name.is_empty() || role.is_empty() {
        return Err(ExtractError::Malformed(
            "response is missing COMPANY or ROLE".to_string(),
        ));
    }

    Ok(ExtractedDrive {
        company_name,
        role,
        package,
        deadline,
        description,
        requirements,
    })
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

// --- Anthropic ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String, timeout: Duration) -> anyhow::Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;
        Ok(Self {
            api_key,
            model_id,
            client: http_client(timeout)?,
        })
    }
}

impl CompletionProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("Anthropic API returned {}: {}", status, body));
        }

        let parsed: AnthropicResponse = response
            .json()
            .context("Failed to parse Anthropic API response")?;
        parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| anyhow!("No content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String, timeout: Duration) -> anyhow::Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;
        Ok(Self {
            api_key,
            model_id,
            client: http_client(timeout)?,
        })
    }
}

impl CompletionProvider for OpenAIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("OpenAI API returned {}: {}", status, body));
        }

        let parsed: OpenAIResponse = response
            .json()
            .context("Failed to parse OpenAI API response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider(&'static str);

    impl CompletionProvider for CannedProvider {
        fn complete(&self, _prompt: &str, _max_tokens: u32) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    struct SlowExtractor;

    impl Extractor for SlowExtractor {
        fn extract(&self, raw_text: &str) -> Result<ExtractedDrive, ExtractError> {
            std::thread::sleep(Duration::from_millis(200));
            MockExtractor.extract(raw_text)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[test]
    fn test_parse_extraction() {
        let response = "Here you go:\n\
            COMPANY: Infosys\n\
            ROLE: Systems Engineer\n\
            PACKAGE: 6.5 LPA\n\
            DEADLINE: 2024-03-01\n\
            DESCRIPTION: Campus hiring for freshers.\n\
            REQUIREMENTS: B.Tech any branch; CGPA > 6.0;  ";
        let drive = parse_extraction(response).unwrap();
        assert_eq!(drive.company_name, "Infosys");
        assert_eq!(drive.role, "Systems Engineer");
        assert_eq!(drive.deadline, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(drive.requirements, vec!["B.Tech any branch", "CGPA > 6.0"]);
    }

    #[test]
    fn test_parse_extraction_tolerates_missing_deadline() {
        let drive = parse_extraction("COMPANY: Wipro\nROLE: Analyst\nDEADLINE: NONE").unwrap();
        assert_eq!(drive.deadline, None);
        assert!(drive.requirements.is_empty());
    }

    #[test]
    fn test_parse_extraction_requires_company_and_role() {
        assert!(matches!(
            parse_extraction("I could not find anything useful."),
            Err(ExtractError::Malformed(_))
        ));
    }

    #[test]
    fn test_llm_extractor_uses_provider() {
        let extractor = LlmExtractor::new(Box::new(CannedProvider(
            "COMPANY: Zoho\nROLE: Member Technical Staff\nPACKAGE: 8 LPA",
        )));
        let drive = extractor.extract("Zoho is hiring").unwrap();
        assert_eq!(drive.company_name, "Zoho");
        assert_eq!(drive.package, "8 LPA");
        assert_eq!(extractor.name(), "canned");
    }

    #[test]
    fn test_into_new_drive_joins_requirements() {
        let fallback = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let drive = MockExtractor.extract("").unwrap().into_new_drive(fallback);
        assert_eq!(drive.company_name, "TechCorp Solutions");
        assert_eq!(drive.deadline, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
        assert_eq!(drive.status, DriveStatus::Open);
        assert_eq!(drive.requirements.as_deref().map(|r| r.lines().count()), Some(4));

        let mut bare = parse_extraction("COMPANY: A\nROLE: B").unwrap();
        bare.deadline = None;
        let drive = bare.into_new_drive(fallback);
        assert_eq!(drive.deadline, fallback);
        assert_eq!(drive.description, None);
        assert_eq!(drive.requirements, None);
    }

    #[test]
    fn test_create_extractor_unknown_provider() {
        let mut config = AppConfig::for_tests();
        config.extract_provider = "gpt-2".to_string();
        assert!(create_extractor(&config).is_err());

        config.extract_provider = "mock".to_string();
        assert_eq!(create_extractor(&config).unwrap().name(), "mock");
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe { env::remove_var("OPENAI_API_KEY"); }

        let result = OpenAIProvider::new("gpt-4o-mini".to_string(), Duration::from_secs(1));

        if let Some(val) = original {
            unsafe { env::set_var("OPENAI_API_KEY", val); }
        }

        let err = result.err().expect("provider should not build without a key");
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_run_extraction_succeeds() {
        let drive = run_extraction(
            Arc::new(MockExtractor),
            "TechCorp is hiring".to_string(),
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await
        .unwrap();
        assert_eq!(drive.role, "Full Stack Developer");
    }

    #[tokio::test]
    async fn test_run_extraction_rejects_empty_input() {
        let result = run_extraction(
            Arc::new(MockExtractor),
            "   ".to_string(),
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await;
        assert_eq!(result, Err(ExtractError::EmptyInput));
    }

    #[tokio::test]
    async fn test_run_extraction_times_out() {
        let timeout = Duration::from_millis(20);
        let result = run_extraction(
            Arc::new(SlowExtractor),
            "text".to_string(),
            timeout,
            std::future::pending(),
        )
        .await;
        assert_eq!(result, Err(ExtractError::TimedOut(timeout)));
    }

    #[tokio::test]
    async fn test_run_extraction_cancelled() {
        let result = run_extraction(
            Arc::new(SlowExtractor),
            "text".to_string(),
            Duration::from_secs(5),
            async {},
        )
        .await;
        assert_eq!(result, Err(ExtractError::Cancelled));
    }
}
