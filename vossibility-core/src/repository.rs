use serde::{Deserialize, Serialize};
use tracing::info;

/// A GitHub repository the collector is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Owner of the repository (user or organisation).
    pub user: String,
    pub repo: String,
    /// Human-readable name used in logs and documents.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Event kinds (`X-GitHub-Event` values) to ingest on the live path.
    #[serde(default)]
    pub events: Vec<String>,
}

impl Repository {
    pub fn new(user: impl Into<String>, repo: impl Into<String>) -> Self {
        Repository {
            user: user.into(),
            repo: repo.into(),
            display_name: None,
            events: Vec::new(),
        }
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.user, self.repo)
    }

    pub fn pretty_name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| self.full_name())
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    pub fn trace_loaded(&self) {
        info!(
            repository = %self.full_name(),
            display_name = %self.pretty_name(),
            events = ?self.events,
            "Loaded repository"
        );
    }
}
