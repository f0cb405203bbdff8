//! Slack incoming-webhook drift alerts.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use plan_harness_core::drift::DriftCounts;
use plan_harness_core::store::{DriftAlert, Notifier};

use crate::config::NotificationsConfig;

pub struct SlackNotifier {
    client: reqwest::Client,
    default_webhook: Option<String>,
    plan_url_base: Option<String>,
}

impl SlackNotifier {
    pub fn new(config: &NotificationsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            default_webhook: config.slack_webhook.clone(),
            plan_url_base: config.plan_url_base.clone(),
        })
    }
}

/// `(add, change, destroy)` as Terraform reports them; replacements count
/// as both an add and a destroy.
pub fn terraform_counts(drift: &DriftCounts) -> (u64, u64, u64) {
    (
        drift.create + drift.replace,
        drift.update,
        drift.delete + drift.replace,
    )
}

pub fn slack_payload(alert: &DriftAlert, plan_url: Option<&str>) -> Value {
    let (add, change, destroy) = terraform_counts(&alert.drift);
    let color = if destroy > 0 { "#e01e5a" } else { "#ecb22e" };

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": format!("Drift Detected: {} ({})", alert.component_name, alert.environment)
            }
        }),
        json!({
            "type": "section",
            "fields": [
                {"type": "mrkdwn", "text": format!("*Project:*\n{}", alert.project_name)},
                {"type": "mrkdwn", "text": format!("*Environment:*\n{}", alert.environment)}
            ]
        }),
        json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!(
                    "*Changes Detected: {}*\n+ {} to add\n~ {} to change\n- {} to destroy",
                    alert.drift.drift_total(), add, change, destroy
                )
            }
        }),
    ];

    if let Some(url) = plan_url {
        blocks.push(json!({
            "type": "actions",
            "elements": [{
                "type": "button",
                "text": {"type": "plain_text", "text": "View Plan"},
                "url": url,
                "style": "primary"
            }]
        }));
    }

    json!({
        "blocks": blocks,
        "attachments": [{
            "color": color,
            "fallback": format!("Drift detected in {}", alert.component_name)
        }]
    })
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn drift_detected(&self, alert: &DriftAlert) -> Result<()> {
        let Some(webhook) = alert.webhook.as_ref().or(self.default_webhook.as_ref()) else {
            tracing::debug!(project = %alert.project_id, "no webhook configured, alert skipped");
            return Ok(());
        };

        let plan_url = self
            .plan_url_base
            .as_deref()
            .map(|base| format!("{}/plans/{}", base.trim_end_matches('/'), alert.plan_id));
        let payload = slack_payload(alert, plan_url.as_deref());

        let resp = self.client.post(webhook).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Slack webhook returned {}: {}", status, body);
        }

        tracing::info!(
            component = %alert.component_name,
            environment = %alert.environment,
            "drift alert sent"
        );
        Ok(())
    }
}
