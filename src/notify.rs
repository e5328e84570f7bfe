//! Discord notifier. Fire-and-forget; an unset webhook URL disables it.

use std::sync::Arc;

use tracing::debug;

pub struct DiscordNotifier {
    url: Option<String>,
    http: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(url: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            url,
            http: reqwest::Client::new(),
        })
    }

    /// Post a message off the caller's task. Failures are logged at debug;
    /// the notifier is never load-bearing.
    pub fn send(&self, message: String) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            let body = serde_json::json!({ "content": message });
            if let Err(e) = http.post(&url).json(&body).send().await {
                debug!(error = %e, "discord notify failed");
            }
        });
    }
}
