//! Alerting system for govwatch
//!
//! Fans classified alerts out to console, email, Slack and webhook channels,
//! with per-channel cooldown.

mod cooldown;
mod dispatcher;
mod notifier;

pub use cooldown::{CooldownKey, CooldownTracker, Permit, Reservation};
pub use dispatcher::AlertDispatcher;
pub use notifier::{
    build_notifiers, email_body, email_subject, format_console, sample_alert, ConsoleNotifier,
    EmailNotifier, Notifier, SlackNotifier, WebhookNotifier,
};
