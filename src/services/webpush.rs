use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::WebPushConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A browser push subscription as handed over by the Push API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

/// Sends VAPID-authorized pushes and keeps the per-user subscription
/// registry. Pushes carry no payload; the service worker fetches state on
/// wake-up.
pub struct WebPushService {
    http: reqwest::Client,
    config: WebPushConfig,
    subscriptions: RwLock<HashMap<String, Vec<PushSubscription>>>,
}

impl WebPushService {
    pub fn new(http: reqwest::Client, config: WebPushConfig) -> Self {
        Self {
            http,
            config,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.config.public_key
    }

    pub async fn subscribe(&self, username: &str, subscription: PushSubscription) {
        let mut registry = self.subscriptions.write().await;
        let subs = registry.entry(username.to_string()).or_default();
        subs.retain(|s| s.endpoint != subscription.endpoint);
        subs.push(subscription);
    }

    pub async fn unsubscribe(&self, username: &str, endpoint: &str) {
        let mut registry = self.subscriptions.write().await;
        if let Some(subs) = registry.get_mut(username) {
            subs.retain(|s| s.endpoint != endpoint);
        }
    }

    /// Wake every device of `username`. Dead subscriptions are dropped from
    /// the registry; failures never propagate beyond a warning.
    pub async fn notify(&self, username: &str) {
        let subs = {
            let registry = self.subscriptions.read().await;
            registry.get(username).cloned().unwrap_or_default()
        };
        if subs.is_empty() {
            return;
        }

        let mut gone = Vec::new();
        for sub in &subs {
            let auth = match self.vapid_authorization(&sub.endpoint) {
                Ok(auth) => auth,
                Err(e) => {
                    warn!("web push: VAPID header for {username} failed: {e}");
                    return;
                }
            };
            let resp = self
                .http
                .post(&sub.endpoint)
                .header("Authorization", auth)
                .header("TTL", "43200")
                .header("Urgency", "normal")
                .send()
                .await;
            match resp {
                Ok(resp) if resp.status() == StatusCode::GONE => {
                    debug!("web push: subscription of {username} expired");
                    gone.push(sub.endpoint.clone());
                }
                Ok(resp) if !resp.status().is_success() => {
                    warn!("web push: endpoint answered {}", resp.status());
                }
                Ok(_) => {}
                Err(e) => warn!("web push: delivery to {username} failed: {e}"),
            }
        }
        for endpoint in gone {
            self.unsubscribe(username, &endpoint).await;
        }
    }

    /// `vapid t=<jwt>, k=<public key>` per RFC 8292, signed with ES256.
    fn vapid_authorization(&self, endpoint: &str) -> anyhow::Result<String> {
        let url = reqwest::Url::parse(endpoint)?;
        let audience = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().ok_or_else(|| anyhow::anyhow!("endpoint without host"))?
        );

        let header = URL_SAFE_NO_PAD.encode(serde_json::json!({ "typ": "JWT", "alg": "ES256" }).to_string());
        let claims = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "aud": audience,
                "exp": (Utc::now() + Duration::hours(12)).timestamp(),
                "sub": format!("mailto:{}", self.config.vapid_email),
            })
            .to_string(),
        );
        let signing_input = format!("{header}.{claims}");

        let key_bytes = URL_SAFE_NO_PAD.decode(&self.config.private_key)?;
        let key = SigningKey::from_slice(&key_bytes)?;
        let signature: Signature = key.sign(signing_input.as_bytes());
        let jwt = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()));

        Ok(format!("vapid t={jwt}, k={}", self.config.public_key))
    }
}

/// Fresh VAPID keypair as (public, private), base64url without padding.
pub fn generate_vapid_keys() -> (String, String) {
    let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let public = secret.public_key().to_encoded_point(false);
    (
        URL_SAFE_NO_PAD.encode(public.as_bytes()),
        URL_SAFE_NO_PAD.encode(secret.to_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::http_client;

    fn service() -> WebPushService {
        let (public_key, private_key) = generate_vapid_keys();
        WebPushService::new(
            http_client(),
            WebPushConfig {
                vapid_email: "admin@example.org".into(),
                public_key,
                private_key,
            },
        )
    }

    #[test]
    fn generated_keys_have_the_expected_shapes() {
        let (public, private) = generate_vapid_keys();
        // Uncompressed P-256 point and raw scalar.
        assert_eq!(URL_SAFE_NO_PAD.decode(public).unwrap().len(), 65);
        assert_eq!(URL_SAFE_NO_PAD.decode(private).unwrap().len(), 32);
    }

    #[test]
    fn vapid_header_carries_a_signed_jwt() {
        let service = service();
        let auth = service
            .vapid_authorization("https://push.example.org/send/abc123")
            .unwrap();
        assert!(auth.starts_with("vapid t="));
        let jwt = auth
            .strip_prefix("vapid t=")
            .unwrap()
            .split(", k=")
            .next()
            .unwrap();
        assert_eq!(jwt.split('.').count(), 3);
    }

    #[tokio::test]
    async fn registry_replaces_and_removes_endpoints() {
        let service = service();
        let sub = |endpoint: &str| PushSubscription {
            endpoint: endpoint.into(),
            keys: SubscriptionKeys { p256dh: "k".into(), auth: "a".into() },
        };

        service.subscribe("alice", sub("https://push/1")).await;
        service.subscribe("alice", sub("https://push/1")).await;
        service.subscribe("alice", sub("https://push/2")).await;
        assert_eq!(service.subscriptions.read().await["alice"].len(), 2);

        service.unsubscribe("alice", "https://push/1").await;
        assert_eq!(service.subscriptions.read().await["alice"].len(), 1);
    }
}
