//! Web search augmentation of the system prompt
//!
//! When a caller asks for search, the most recent user message is sent to a
//! search backend and the top results are appended to the system prompt as
//! reference material. Search is best effort: every failure degrades to the
//! plain prompt.

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chat::{ChatMessage, last_user_message};
use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::retry::RetryPolicy;

/// One ranked search hit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// A web search service
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Results in ranked order; an empty list is a valid answer
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    include_answer: bool,
    include_images: bool,
    include_raw_content: bool,
    max_results: usize,
    include_domains: Vec<String>,
    exclude_domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Option<Vec<SearchResult>>,
}

/// Tavily search API client
#[derive(Debug)]
pub struct TavilyClient {
    client: Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
}

impl TavilyClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        timeout: Duration,
        max_results: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
            max_results,
        })
    }
}

#[async_trait]
impl SearchBackend for TavilyClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            search_depth: "basic",
            include_answer: false,
            include_images: false,
            include_raw_content: false,
            max_results: self.max_results,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ParleyError::Search(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::Search(format!(
                "Search API returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::Search(format!("Malformed search response: {e}")))?;

        Ok(parsed.results.unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "tavily"
    }
}

/// System prompt produced for one request
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedPrompt {
    pub text: String,
    /// Source URLs of the results folded into the prompt
    pub citations: Vec<String>,
    pub used_search: bool,
}

/// Base instruction, stamped with the given date
pub fn base_prompt(today: NaiveDate) -> String {
    format!(
        "You are a helpful and knowledgeable AI assistant.\n\
         Give accurate, useful answers to the user's questions and include concrete, practical information.\n\
         Today's date is {}.",
        today.format("%B %-d, %Y")
    )
}

/// Append search results to `prompt` as reference context
fn append_results(prompt: &mut String, results: &[SearchResult]) {
    let context: Vec<String> = results
        .iter()
        .map(|r| {
            let title = if r.title.trim().is_empty() {
                "Untitled"
            } else {
                r.title.as_str()
            };
            format!("Title: {}\nContent: {}\nSource: {}", title, r.content, r.url)
        })
        .collect();

    prompt.push_str("\n\nThe following are up-to-date web search results:\n");
    prompt.push_str(&context.join("\n\n"));
    prompt.push_str("\n\nUse this information when answering.");
}

/// Builds system prompts, optionally enriched with search results
#[derive(Clone)]
pub struct SearchAugmenter {
    backend: Option<Arc<dyn SearchBackend>>,
    policy: RetryPolicy,
    top_results: usize,
}

impl SearchAugmenter {
    /// An augmenter that never searches
    pub fn disabled() -> Self {
        Self {
            backend: None,
            policy: RetryPolicy::new(1, Duration::ZERO),
            top_results: 0,
        }
    }

    pub fn new(backend: Arc<dyn SearchBackend>, policy: RetryPolicy, top_results: usize) -> Self {
        Self {
            backend: Some(backend),
            policy,
            top_results,
        }
    }

    /// Build from configuration. Search stays off when it is disabled or no
    /// API key is available.
    pub fn from_config(config: &Config) -> Result<Self> {
        let search = &config.search;
        if !search.enabled {
            info!("Web search disabled by configuration");
            return Ok(Self::disabled());
        }

        let Some(api_key) = search.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            info!("{} not set; web search unavailable", search.api_key_env);
            return Ok(Self::disabled());
        };

        let client = TavilyClient::new(
            api_key,
            &search.base_url,
            Duration::from_secs(search.timeout_secs),
            search.max_results,
        )?;

        Ok(Self::new(
            Arc::new(client),
            config.retry.search_policy(),
            search.top_results,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// System prompt text only
    pub async fn build_system_prompt(&self, transcript: &[ChatMessage], use_search: bool) -> String {
        self.augment(transcript, use_search).await.text
    }

    /// Build the system prompt and report whether search contributed to it
    pub async fn augment(&self, transcript: &[ChatMessage], use_search: bool) -> AugmentedPrompt {
        self.augment_on(Local::now().date_naive(), transcript, use_search)
            .await
    }

    pub async fn augment_on(
        &self,
        today: NaiveDate,
        transcript: &[ChatMessage],
        use_search: bool,
    ) -> AugmentedPrompt {
        let mut prompt = AugmentedPrompt {
            text: base_prompt(today),
            citations: Vec::new(),
            used_search: false,
        };

        if !use_search {
            return prompt;
        }

        let Some(query) = last_user_message(transcript) else {
            debug!("Search requested but transcript has no user message");
            return prompt;
        };

        let Some(backend) = self.backend.as_ref() else {
            debug!("Search requested but no search backend is configured");
            return prompt;
        };

        let outcome = self
            .policy
            .run("web_search", |_| backend.search(query))
            .await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                warn!(backend = backend.name(), "Web search failed, continuing without it: {e}");
                return prompt;
            }
        };

        let top: Vec<SearchResult> = results.into_iter().take(self.top_results).collect();
        if top.is_empty() {
            debug!("Web search returned no results");
            return prompt;
        }

        append_results(&mut prompt.text, &top);
        prompt.citations = top
            .iter()
            .filter(|r| !r.url.trim().is_empty())
            .map(|r| r.url.clone())
            .collect();
        prompt.used_search = true;

        info!(results = top.len(), "Augmented system prompt with web search");
        prompt
    }
}

impl std::fmt::Debug for SearchAugmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchAugmenter")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("policy", &self.policy)
            .field("top_results", &self.top_results)
            .finish()
    }
}
