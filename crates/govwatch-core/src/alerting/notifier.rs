//! Notification delivery for alerts

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use console::{Style, Term};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::{Client, Method};
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{AlertEvent, ChannelConfig, LimitStatus, Severity, SmtpSettings};

/// A delivery channel for alerts
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Channel kind (`console`, `email`, `slack`, `webhook`)
    fn kind(&self) -> &'static str;

    /// Unique channel name, used for logging and cooldown
    fn name(&self) -> &str;

    /// Deliver one alert. Errors only affect this channel.
    async fn send(&self, event: &AlertEvent) -> Result<()>;
}

/// Build one notifier per configured channel.
///
/// Channel names are the kind, suffixed with a counter when a kind repeats
/// (`slack`, `slack-2`).
pub fn build_notifiers(channels: &[ChannelConfig]) -> Result<Vec<Arc<dyn Notifier>>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("govwatch/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let mut seen: HashMap<&'static str, usize> = HashMap::new();

    Ok(channels
        .iter()
        .map(|channel| {
            let count = seen.entry(channel.kind()).or_insert(0);
            *count += 1;
            let name = if *count == 1 {
                channel.kind().to_string()
            } else {
                format!("{}-{}", channel.kind(), count)
            };

            let notifier: Arc<dyn Notifier> = match channel {
                ChannelConfig::Console => Arc::new(ConsoleNotifier::new(name)),
                ChannelConfig::Email { smtp, from, to } => {
                    Arc::new(EmailNotifier::new(name, smtp.clone(), from.clone(), to.clone()))
                }
                ChannelConfig::Slack {
                    webhook_url,
                    channel,
                } => Arc::new(SlackNotifier::new(
                    name,
                    client.clone(),
                    webhook_url.clone(),
                    channel.clone(),
                )),
                ChannelConfig::Webhook {
                    url,
                    method,
                    headers,
                } => Arc::new(WebhookNotifier::new(
                    name,
                    client.clone(),
                    url.clone(),
                    method.clone(),
                    headers.clone(),
                )),
            };
            notifier
        })
        .collect())
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🚨",
        Severity::Warning => "⚠️",
        Severity::Info => "ℹ️",
    }
}

/// Prints alerts to the terminal
#[derive(Debug)]
pub struct ConsoleNotifier {
    name: String,
    term: Term,
}

impl ConsoleNotifier {
    /// Create a console notifier writing to stdout
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            term: Term::stdout(),
        }
    }
}

/// Plain text lines of a console alert
pub fn format_console(event: &AlertEvent) -> Vec<String> {
    let mut lines = vec![
        format!("🚨 ALERT [{}]", event.severity.as_str().to_uppercase()),
        format!("Time: {}", event.timestamp.to_rfc3339()),
    ];

    if let Some(org) = &event.org {
        lines.push(format!("Org: {org}"));
    }

    if !event.limits.is_empty() {
        lines.push(String::new());
        lines.push("Affected Limits:".to_string());
        for limit in &event.limits {
            lines.push(format!(
                "  • {}: {}% ({})",
                limit.display_name(),
                limit.percentage,
                limit.status
            ));
        }
    }

    if let Some(message) = &event.message {
        lines.push(String::new());
        lines.push(format!("Message: {message}"));
    }

    lines
}

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    fn kind(&self) -> &'static str {
        "console"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let color = match event.severity {
            Severity::Critical => Style::new().red(),
            Severity::Warning => Style::new().yellow(),
            Severity::Info => Style::new().blue(),
        };

        self.term.write_line("")?;
        for line in format_console(event) {
            self.term.write_line(&color.apply_to(line).to_string())?;
        }
        self.term.write_line("")?;
        Ok(())
    }
}

/// Sends HTML email through an SMTP relay
#[derive(Debug)]
pub struct EmailNotifier {
    name: String,
    smtp: SmtpSettings,
    from: String,
    to: Vec<String>,
}

impl EmailNotifier {
    /// Create an email notifier
    pub fn new(name: impl Into<String>, smtp: SmtpSettings, from: String, to: Vec<String>) -> Self {
        Self {
            name: name.into(),
            smtp,
            from,
            to,
        }
    }

    fn build_message(&self, event: &AlertEvent) -> Result<Message> {
        if self.smtp.host.is_empty() {
            return Err(Error::config(format!("{}: smtp.host is not set", self.name)));
        }
        if self.to.is_empty() {
            return Err(Error::config(format!("{}: no recipients configured", self.name)));
        }

        let parse = |addr: &str| {
            addr.parse::<Mailbox>()
                .map_err(|e| Error::config(format!("{}: invalid address {addr:?}: {e}", self.name)))
        };

        let mut builder = Message::builder()
            .from(parse(&self.from)?)
            .subject(email_subject(event))
            .header(ContentType::TEXT_HTML);
        for recipient in &self.to {
            builder = builder.to(parse(recipient)?);
        }

        builder
            .body(email_body(event))
            .map_err(|e| Error::delivery(&self.name, e.to_string()))
    }
}

/// Subject line, e.g. `🚨 govwatch Alert [CRITICAL] - prod`
pub fn email_subject(event: &AlertEvent) -> String {
    let org = event
        .org
        .as_ref()
        .map(|o| format!(" - {o}"))
        .unwrap_or_default();
    format!(
        "{} govwatch Alert [{}]{}",
        severity_emoji(event.severity),
        event.severity.as_str().to_uppercase(),
        org
    )
}

/// HTML body with a table of the affected limits
pub fn email_body(event: &AlertEvent) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<html><body style="font-family: Arial, sans-serif; background-color: #f5f5f5; padding: 20px;">
<div style="max-width: 600px; margin: 0 auto; background-color: white; border-radius: 8px;">
<div style="background-color: {}; color: white; padding: 20px; border-radius: 8px 8px 0 0;">
<h2 style="margin: 0;">govwatch Alert</h2>
<p style="margin: 5px 0 0 0;">{} - {}</p>
</div>
<div style="padding: 20px;">"#,
        event.severity.color(),
        event.severity.as_str().to_uppercase(),
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    if let Some(org) = &event.org {
        let _ = write!(html, "<p><strong>Org:</strong> {}</p>", escape_html(org));
    }

    if !event.limits.is_empty() {
        html.push_str(
            "<h3>Affected Governor Limits</h3><table style=\"width: 100%; border-collapse: collapse;\">\
             <thead><tr><th align=\"left\">Limit</th><th align=\"right\">Usage</th><th>Status</th></tr></thead><tbody>",
        );
        for limit in &event.limits {
            let color = match limit.status {
                LimitStatus::Critical => "#dc3545",
                _ => "#ffc107",
            };
            let _ = write!(
                html,
                "<tr><td>{}</td><td align=\"right\">{}%</td>\
                 <td align=\"center\"><span style=\"background-color: {}; color: white; padding: 4px 8px;\">{}</span></td></tr>",
                escape_html(&limit.display_name()),
                limit.percentage,
                color,
                limit.status
            );
        }
        html.push_str("</tbody></table>");
    }

    if let Some(message) = &event.message {
        let _ = write!(html, "<p><strong>Message:</strong> {}</p>", escape_html(message));
    }

    html.push_str(
        "<p style=\"color: #6c757d; font-size: 14px;\">This alert was generated by govwatch.</p>\
         </div></div></body></html>",
    );
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn kind(&self) -> &'static str {
        "email"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let message = self.build_message(event)?;

        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.smtp.host)
            .map_err(|e| Error::delivery(&self.name, e.to_string()))?
            .port(self.smtp.port);
        if let (Some(username), Some(password)) = (&self.smtp.username, &self.smtp.password) {
            transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
        }

        transport
            .build()
            .send(message)
            .await
            .map_err(|e| Error::delivery(&self.name, e.to_string()))?;

        info!(channel = %self.name, recipients = self.to.len(), "Email notification sent");
        Ok(())
    }
}

/// Posts to a Slack incoming webhook
#[derive(Debug)]
pub struct SlackNotifier {
    name: String,
    client: Client,
    webhook_url: String,
    channel: Option<String>,
}

impl SlackNotifier {
    /// Create a Slack notifier
    pub fn new(
        name: impl Into<String>,
        client: Client,
        webhook_url: String,
        channel: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            webhook_url,
            channel,
        }
    }
}

/// Slack attachment payload for an alert
fn slack_payload(event: &AlertEvent, channel: Option<&str>) -> SlackPayload {
    let emoji = match event.severity {
        Severity::Critical => ":rotating_light:",
        Severity::Warning => ":warning:",
        Severity::Info => ":information_source:",
    };

    let mut fields = Vec::new();
    if let Some(org) = &event.org {
        fields.push(SlackField {
            title: "Org".to_string(),
            value: org.clone(),
            short: true,
        });
    }
    fields.push(SlackField {
        title: "Severity".to_string(),
        value: event.severity.as_str().to_uppercase(),
        short: true,
    });
    if !event.limits.is_empty() {
        let value = event
            .limits
            .iter()
            .map(|l| format!("• {}: {}% ({})", l.display_name(), l.percentage, l.status))
            .collect::<Vec<_>>()
            .join("\n");
        fields.push(SlackField {
            title: "Affected Limits".to_string(),
            value,
            short: false,
        });
    }

    SlackPayload {
        channel: channel.map(String::from),
        username: Some("govwatch".to_string()),
        icon_emoji: Some(":shield:".to_string()),
        attachments: vec![SlackAttachment {
            color: event.severity.color().to_string(),
            title: format!("{emoji} govwatch Alert"),
            text: event.message_or_default().to_string(),
            fields,
            footer: Some("govwatch".to_string()),
            ts: Some(event.timestamp.timestamp()),
        }],
    }
}

async fn ensure_success(channel: &str, response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::delivery(channel, format!("HTTP {status}: {body}")))
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    fn kind(&self) -> &'static str {
        "slack"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        if self.webhook_url.is_empty() {
            return Err(Error::config(format!("{}: webhook_url is not set", self.name)));
        }

        let payload = slack_payload(event, self.channel.as_deref());
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::delivery(&self.name, e.to_string()))?;
        ensure_success(&self.name, response).await?;

        info!(channel = %self.name, alert_id = %event.id, "Slack notification sent");
        Ok(())
    }
}

/// Sends the alert as JSON to an arbitrary endpoint
#[derive(Debug)]
pub struct WebhookNotifier {
    name: String,
    client: Client,
    url: String,
    method: String,
    headers: HashMap<String, String>,
}

impl WebhookNotifier {
    /// Create a webhook notifier
    pub fn new(
        name: impl Into<String>,
        client: Client,
        url: String,
        method: String,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            url,
            method,
            headers,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::config(format!("{}: url is not set", self.name)));
        }
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| Error::config(format!("{}: invalid method {:?}", self.name, self.method)))?;

        let payload = WebhookPayload {
            alert: event,
            source: "govwatch",
            version: env!("CARGO_PKG_VERSION"),
        };

        let mut request = self.client.request(method, &self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::delivery(&self.name, e.to_string()))?;
        ensure_success(&self.name, response).await?;

        info!(channel = %self.name, url = %self.url, "Webhook notification sent");
        Ok(())
    }
}

// Slack payload types
#[derive(Debug, Serialize)]
struct SlackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<String>,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: String,
    title: String,
    text: String,
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

// Generic webhook payload
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    alert: &'a AlertEvent,
    source: &'static str,
    version: &'static str,
}

/// Fixed sample alert used to test channel configuration
pub fn sample_alert(org: Option<String>) -> AlertEvent {
    let limit = crate::models::LimitRecord {
        name: "DailyApiRequests".to_string(),
        used: 85_000,
        max: 100_000,
        remaining: Some(15_000),
        percentage: 85.0,
        status: LimitStatus::Warning,
    };

    let mut event = AlertEvent::from_limits(vec![limit])
        .with_message("This is a test alert from govwatch")
        .with_subject("test")
        .with_org(org.or_else(|| Some("test-org".to_string())));
    event.severity = Severity::Info;
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        Client::new()
    }

    #[test]
    fn test_console_lines() {
        let event = sample_alert(Some("prod".to_string()));
        let lines = format_console(&event);

        assert_eq!(lines[0], "🚨 ALERT [INFO]");
        assert!(lines.contains(&"Org: prod".to_string()));
        assert!(lines.contains(&"  • Daily Api Requests: 85% (WARNING)".to_string()));
        assert_eq!(
            lines.last().unwrap(),
            "Message: This is a test alert from govwatch"
        );
    }

    #[test]
    fn test_email_subject_and_body() {
        let mut event = sample_alert(Some("prod".to_string()));
        event.severity = Severity::Critical;

        assert_eq!(email_subject(&event), "🚨 govwatch Alert [CRITICAL] - prod");

        let body = email_body(&event);
        assert!(body.contains("Daily Api Requests"));
        assert!(body.contains("#dc3545"));
        assert!(body.contains("This is a test alert from govwatch"));
    }

    #[tokio::test]
    async fn test_email_without_recipients_is_config_error() {
        let notifier = EmailNotifier::new(
            "email",
            SmtpSettings {
                host: "smtp.example.com".to_string(),
                port: 587,
                username: None,
                password: None,
            },
            "govwatch@example.com".to_string(),
            vec![],
        );

        let err = notifier.send(&sample_alert(None)).await.unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_slack_payload_fields() {
        let event = sample_alert(Some("prod".to_string()));
        let payload = serde_json::to_value(slack_payload(&event, Some("#ops"))).unwrap();

        assert_eq!(payload["channel"], "#ops");
        assert_eq!(payload["attachments"][0]["color"], "#17a2b8");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "prod");
        assert_eq!(payload["attachments"][0]["fields"][1]["value"], "INFO");
        assert_eq!(
            payload["attachments"][0]["fields"][2]["value"],
            "• Daily Api Requests: 85% (WARNING)"
        );
    }

    #[tokio::test]
    async fn test_slack_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({"username": "govwatch"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new("slack", client(), format!("{}/hook", server.uri()), None);

        notifier.send(&sample_alert(None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_slack_error_status_is_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("invalid_payload"))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new("slack", client(), server.uri(), None);
        let err = notifier.send(&sample_alert(None)).await.unwrap_err();

        assert!(matches!(err, Error::ChannelDelivery { ref reason, .. } if reason.contains("500")));
    }

    #[tokio::test]
    async fn test_webhook_send_with_method_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/alerts"))
            .and(header("x-api-key", "secret"))
            .and(body_partial_json(serde_json::json!({
                "source": "govwatch",
                "alert": {"severity": "info", "subject_id": "test"}
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(
            "webhook",
            client(),
            format!("{}/alerts", server.uri()),
            "put".to_string(),
            HashMap::from([("x-api-key".to_string(), "secret".to_string())]),
        );

        notifier.send(&sample_alert(None)).await.unwrap();
    }

    #[test]
    fn test_build_notifiers_names() {
        let notifiers = build_notifiers(&[
            ChannelConfig::Console,
            ChannelConfig::Slack {
                webhook_url: "https://hooks.example.com/a".to_string(),
                channel: None,
            },
            ChannelConfig::Slack {
                webhook_url: "https://hooks.example.com/b".to_string(),
                channel: None,
            },
        ])
        .unwrap();

        let names: Vec<&str> = notifiers.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["console", "slack", "slack-2"]);
    }
}
