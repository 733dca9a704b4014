//! Batches SLA alerts into one message and dispatches them on a background
//! worker (§4.8 `AlertManager` + `Dispatcher`).

pub mod mail;

pub use mail::{DispatchError, EmailMessage, FakeMailTransport, LettreTransport, MailTransport};

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{ConfigKey, Configuration};
use crate::job::{Job, JobId};
use crate::policy::{
    Alert, AlertStatus, CommentedExpressionPolicy, MalformedExpressionPolicy, Policy,
    PolicyEngine, TimeSinceLastSuccessPolicy,
};

/// The dry-run recipient (§4.8, §6): when `alert.email.address.to` is this
/// address, the composed message is logged instead of actually sent.
const DRY_RUN_SENTINEL: &str = "someone@example.com";

/// Owns the three SLA policy engines, the current configuration, and the
/// single-worker mail dispatcher they feed.
pub struct AlertManager {
    engines: Vec<PolicyEngine>,
    config: ArcSwap<Configuration>,
    clock: Arc<dyn Clock>,
    hostname: String,
    sender: mpsc::Sender<EmailMessage>,
}

impl AlertManager {
    pub fn new(
        clock: Arc<dyn Clock>,
        hostname: String,
        transport: Arc<dyn MailTransport>,
    ) -> AlertManager {
        // A one-slot queue (§5 "Suspension points"/§4.8): the single
        // dispatcher worker drains it immediately under normal operation, so
        // capacity 1 is enough to hold the in-flight batch plus the next one.
        let (sender, receiver) = mpsc::channel(1);
        spawn_dispatcher(receiver, transport);
        AlertManager {
            engines: vec![
                PolicyEngine::new(Box::new(TimeSinceLastSuccessPolicy) as Box<dyn Policy>),
                PolicyEngine::new(Box::new(CommentedExpressionPolicy) as Box<dyn Policy>),
                PolicyEngine::new(Box::new(MalformedExpressionPolicy) as Box<dyn Policy>),
            ],
            config: ArcSwap::from_pointee(Configuration::defaults()),
            clock,
            hostname,
            sender,
        }
    }

    pub fn update_configuration(&self, config: Configuration) {
        self.config.store(Arc::new(config));
    }

    /// Evaluates every policy over `jobs` (§4.6 step "called outside the
    /// launch loop"), drops alerts for jobs whose own configuration has
    /// `alert.email.enabled=false` (the per-row override, §6), and — if
    /// anything survives — enqueues one batched message for delivery.
    pub fn send_alerts(&self, jobs: &[Arc<Job>]) {
        let now = self.clock.now();
        let mut outbox: Vec<Alert> = Vec::new();
        for engine in &self.engines {
            outbox.extend(engine.evaluate(jobs, now));
        }
        if outbox.is_empty() {
            return;
        }

        let job_by_id: HashMap<JobId, &Arc<Job>> =
            jobs.iter().map(|job| (job.job_id, job)).collect();
        outbox.retain(|alert| {
            job_by_id
                .get(&alert.job_id)
                .map(|job| job.configuration.get_bool(ConfigKey::AlertEmailEnabled))
                .unwrap_or(false)
        });
        if outbox.is_empty() {
            return;
        }

        let config = self.config.load();
        let to = config.get_string(ConfigKey::AlertEmailAddressTo).to_string();
        let from = config
            .get_string(ConfigKey::AlertEmailAddressFrom)
            .to_string();
        let message = build_message(&self.hostname, &from, &to, &outbox);

        if to == DRY_RUN_SENTINEL {
            info!(
                subject = %message.subject,
                body = %message.body,
                "dry-run recipient configured, logging alert instead of sending"
            );
            return;
        }

        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("alert dispatcher busy, dropping this tick's alert batch");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("alert dispatcher worker has shut down, dropping alert batch");
            }
        }
    }
}

/// The alert dispatcher worker (§4.8, §5): a single background task behind
/// the channel, serialising outgoing mail attempts. Any send failure is
/// caught, logged, and never retried or propagated to the scheduler loop.
fn spawn_dispatcher(mut receiver: mpsc::Receiver<EmailMessage>, transport: Arc<dyn MailTransport>) {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if let Err(e) = transport.send(message).await {
                warn!(error = %e, "alert email delivery failed; dropping, never retried");
            }
        }
    });
}

/// Formats the subject and body for one batched alert email (§4.8).
fn build_message(hostname: &str, from: &str, to: &str, alerts: &[Alert]) -> EmailMessage {
    let failures = alerts
        .iter()
        .filter(|a| a.status == AlertStatus::Failure)
        .count();
    let successes = alerts
        .iter()
        .filter(|a| a.status == AlertStatus::Success)
        .count();

    let mut subject = format!("[OMICRON ALERT: {hostname}]");
    if failures > 0 {
        subject.push_str(&format!(" failures: {failures}"));
    }
    if successes > 0 {
        subject.push_str(&format!(" successes: {successes}"));
    }

    let mut body = format!("{} alert(s) from omicron on {hostname}:\n\n", alerts.len());
    for alert in alerts {
        body.push_str(&alert.raw_expression);
        body.push_str("\n\n");
        let prefix = match alert.status {
            AlertStatus::Failure => "FAIL: ",
            AlertStatus::Success => "SUCCESS: ",
            AlertStatus::NotApplicable => "",
        };
        body.push_str(prefix);
        body.push_str(&alert.message);
        body.push_str("\n\n");
    }
    body.push_str("-- \nomicron\n");

    EmailMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject,
        body,
    }
}
