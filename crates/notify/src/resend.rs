//! E-mail alerts through the Resend HTTP API.

use crate::dispatcher::{Alert, AlertDispatcher, DispatchError, DispatchReceipt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://api.resend.com";
const DEFAULT_FROM: &str = "Ray Safety <safety@resend.dev>";

/// Notification channel settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub api_key: String,
    pub from: String,
    /// Who receives crisis alerts.
    pub recipient: String,
    pub base_url: String,
}

impl NotifyConfig {
    /// Reads `RESEND_API_KEY`, `RESEARCHER_EMAIL`, optionally `RAY_ALERT_FROM`
    /// and `RESEND_BASE_URL`. Missing or blank required values are an error.
    pub fn from_env() -> Result<Self, DispatchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, DispatchError> {
        let required = |key: &str| {
            get(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DispatchError::Config(format!("{key} is not set")))
        };
        Ok(Self {
            api_key: required("RESEND_API_KEY")?,
            recipient: required("RESEARCHER_EMAIL")?,
            from: get("RAY_ALERT_FROM").unwrap_or_else(|| DEFAULT_FROM.to_owned()),
            base_url: get("RESEND_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
        })
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

/// Resend e-mail dispatcher.
pub struct ResendDispatcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl ResendDispatcher {
    pub fn new(cfg: &NotifyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            from: cfg.from.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/emails", self.base_url)
    }

    async fn send_email(&self, alert: Alert) -> Result<DispatchReceipt, DispatchError> {
        let body = SendEmailRequest {
            from: self.from.as_str(),
            to: [alert.recipient.as_str()],
            subject: &alert.subject,
            html: &alert.body_html,
            text: &alert.body_text,
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: SendEmailResponse = resp
            .json()
            .await
            .map_err(|e| DispatchError::RequestFailed(e.to_string()))?;
        tracing::debug!(message_id = ?api.id, "alert e-mail accepted");
        Ok(DispatchReceipt { message_id: api.id })
    }
}

/// Map a non-success status, returning RateLimited for 429.
fn check_error(status: reqwest::StatusCode, body: String) -> DispatchError {
    if status.as_u16() == 429 {
        DispatchError::RateLimited
    } else {
        DispatchError::RequestFailed(format!("{status}: {body}"))
    }
}

impl AlertDispatcher for ResendDispatcher {
    fn name(&self) -> &str {
        "resend"
    }

    fn send(
        &self,
        alert: Alert,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchReceipt, DispatchError>> + Send + '_>> {
        Box::pin(self.send_email(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn config_requires_api_key() {
        let err = NotifyConfig::from_lookup(lookup(&[("RESEARCHER_EMAIL", "r@example.org")]))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Config(ref m) if m.contains("RESEND_API_KEY")));
    }

    #[test]
    fn config_requires_recipient() {
        let err = NotifyConfig::from_lookup(lookup(&[
            ("RESEND_API_KEY", "re_test"),
            ("RESEARCHER_EMAIL", "   "),
        ]))
        .unwrap_err();
        assert!(matches!(err, DispatchError::Config(ref m) if m.contains("RESEARCHER_EMAIL")));
    }

    #[test]
    fn config_defaults() {
        let cfg = NotifyConfig::from_lookup(lookup(&[
            ("RESEND_API_KEY", "re_test"),
            ("RESEARCHER_EMAIL", "r@example.org"),
        ]))
        .unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.from, DEFAULT_FROM);
        assert_eq!(cfg.recipient, "r@example.org");
    }

    #[test]
    fn default_endpoint() {
        let cfg = NotifyConfig::from_lookup(lookup(&[
            ("RESEND_API_KEY", "re_test"),
            ("RESEARCHER_EMAIL", "r@example.org"),
        ]))
        .unwrap();
        let d = ResendDispatcher::new(&cfg);
        assert_eq!(d.endpoint(), "https://api.resend.com/emails");
        assert_eq!(d.name(), "resend");
    }

    #[test]
    fn custom_base_url_override() {
        let cfg = NotifyConfig::from_lookup(lookup(&[
            ("RESEND_API_KEY", "re_test"),
            ("RESEARCHER_EMAIL", "r@example.org"),
            ("RESEND_BASE_URL", "https://mail-proxy.internal/"),
        ]))
        .unwrap();
        let d = ResendDispatcher::new(&cfg);
        assert_eq!(d.endpoint(), "https://mail-proxy.internal/emails");
    }

    #[test]
    fn rate_limit_is_distinguished() {
        let err = check_error(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(matches!(err, DispatchError::RateLimited));
        let err = check_error(reqwest::StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(matches!(err, DispatchError::RequestFailed(ref m) if m.contains("bad key")));
    }
}
