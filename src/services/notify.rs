use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::NtfyConfig;
use crate::db::users::UserStore;
use crate::models::Media;
use crate::services::email::EmailService;
use crate::services::webpush::WebPushService;

/// Operator alert channel over ntfy.
pub struct NtfyClient {
    http: reqwest::Client,
    config: NtfyConfig,
}

impl NtfyClient {
    pub fn new(http: reqwest::Client, config: NtfyConfig) -> Self {
        Self { http, config }
    }

    pub async fn publish(&self, title: &str, message: &str, tags: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/{}",
            self.config.server_url.trim_end_matches('/'),
            self.config.topic
        );
        let mut req = self
            .http
            .post(url)
            .header("Title", title)
            .header("Tags", tags)
            .body(message.to_string());
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        } else if let Some(username) = &self.config.username {
            req = req.basic_auth(username, self.config.password.as_deref());
        }
        req.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Fans one engine decision out to every configured channel. Nothing here
/// ever fails the caller; delivery problems end as warnings.
pub struct NotifyService {
    email: Option<Arc<EmailService>>,
    ntfy: Option<NtfyClient>,
    webpush: Option<Arc<WebPushService>>,
}

impl NotifyService {
    pub fn new(
        email: Option<Arc<EmailService>>,
        ntfy: Option<NtfyClient>,
        webpush: Option<Arc<WebPushService>>,
    ) -> Self {
        Self { email, ntfy, webpush }
    }

    pub async fn admin_alert(&self, title: &str, message: &str) {
        let Some(ntfy) = &self.ntfy else { return };
        if let Err(e) = ntfy.publish(title, message, "broom").await {
            warn!("ntfy alert '{title}' failed: {e}");
        }
    }

    /// Per-user email summaries for a batch of freshly picked-up media,
    /// grouped by requester, plus one operator summary.
    pub async fn cleanup_summaries(&self, pool: &SqlitePool, picked: &[Media]) {
        if picked.is_empty() {
            return;
        }

        if let Some(email) = &self.email {
            let mut by_requester: HashMap<&str, Vec<&Media>> = HashMap::new();
            for media in picked {
                if !media.requested_by.is_empty() {
                    by_requester.entry(&media.requested_by).or_default().push(media);
                }
            }
            for (username, items) in by_requester {
                let address = match UserStore::get_by_username(pool, username).await {
                    Ok(user) => user.and_then(|u| u.email),
                    Err(e) => {
                        warn!("summary for '{username}': user lookup failed: {e}");
                        continue;
                    }
                };
                let Some(address) = address else {
                    info!("summary for '{username}' skipped, no email address");
                    continue;
                };
                if let Err(e) = email.send_cleanup_summary(&address, username, &items).await {
                    warn!("summary email to '{username}' failed: {e}");
                }
            }
        }

        self.admin_alert(
            "Media picked up for deletion",
            &format!("{} item(s) entered the deletion queue.", picked.len()),
        )
        .await;
    }

    pub async fn pending_keep_request(&self, username: &str, title: &str) {
        self.admin_alert(
            "Keep request awaiting review",
            &format!("{username} asked to keep '{title}'."),
        )
        .await;
    }

    /// Push to the original requester once an operator decided.
    pub async fn keep_decision(&self, username: &str) {
        if let Some(webpush) = &self.webpush {
            webpush.notify(username).await;
        }
    }
}
