//! Summary dispatch to external channels.
//!
//! Delivery is best effort: a channel that fails is logged and skipped, and
//! never changes the outcome of the run it describes.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::NotifyConfig;

/// The single operation a messaging channel must offer.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send_summary(&self, text: &str) -> Result<()>;
}

/// Writes the summary to the tracing log.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_summary(&self, text: &str) -> Result<()> {
        for line in text.lines() {
            info!(target: "probebench::summary", "{}", line);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    source: &'static str,
}

/// POSTs `{"text": ..., "source": "probebench"}` to a URL; non-2xx is a
/// failure.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_summary(&self, text: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&WebhookPayload {
                text,
                source: "probebench",
            })
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("POST {} returned an error status", self.url))?;
        Ok(())
    }
}

/// Channels enabled by the config. Empty when notification is disabled.
pub fn from_config(config: &NotifyConfig) -> Result<Vec<Box<dyn Notifier>>> {
    if !config.enabled {
        return Ok(Vec::new());
    }
    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
    if let Some(url) = &config.webhook_url {
        notifiers.push(Box::new(WebhookNotifier::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )?));
    }
    Ok(notifiers)
}

/// Send `text` through every channel. Returns how many accepted it.
pub async fn dispatch(notifiers: &[Box<dyn Notifier>], text: &str) -> usize {
    let mut delivered = 0;
    for notifier in notifiers {
        match notifier.send_summary(text).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(channel = notifier.name(), "Notification failed: {:#}", e),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_summary(&self, text: &str) -> Result<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl Notifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send_summary(&self, _text: &str) -> Result<()> {
            anyhow::bail!("channel unreachable")
        }
    }

    #[test]
    fn test_log_notifier_accepts() {
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        assert_eq!(tokio_test::block_on(dispatch(&notifiers, "web: 1/1 passed")), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_channels() {
        let notifiers: Vec<Box<dyn Notifier>> = vec![
            Box::new(Broken),
            Box::new(Recording(Mutex::new(Vec::new()))),
        ];
        assert_eq!(dispatch(&notifiers, "summary").await, 1);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_logged_not_fatal() {
        // Grab a free port and release it so nothing is listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let webhook =
            WebhookNotifier::new(format!("http://127.0.0.1:{}/hook", port), Duration::from_secs(2))
                .unwrap();
        assert!(webhook.send_summary("x").await.is_err());
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(webhook)];
        assert_eq!(dispatch(&notifiers, "x").await, 0);
    }

    #[test]
    fn test_from_config() {
        let mut config = NotifyConfig::default();
        assert_eq!(from_config(&config).unwrap().len(), 1);
        config.webhook_url = Some("http://localhost:9/hook".into());
        let channels = from_config(&config).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1].name(), "webhook");
        config.enabled = false;
        assert!(from_config(&config).unwrap().is_empty());
    }
}
