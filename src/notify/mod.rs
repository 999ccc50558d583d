//! Result notifications.
//!
//! A finished run is reported to the task owner (and the task's extra
//! addresses) when the task's notification policy asks for it. Every failure
//! on this path is logged and dropped: losing a notification is acceptable,
//! holding up the runner is not.

pub mod mail;
pub mod template;

use std::sync::Arc;

pub use mail::{LogMailer, Mail, Mailer, SmtpMailer};
pub use template::{HtmlTemplate, MessagePayload, MessageRenderer};

use crate::error::NotifyError;
use crate::job::RunResult;
use crate::store::AccountStore;
use crate::task::{RunStatus, Task};

/// Start time format used in notification bodies.
const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What happened to a notification for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Policy did not ask for one.
    Skipped,
    /// Owner account could not be resolved; silently abandoned.
    NoRecipient,
    /// Handed to the transport successfully.
    Sent,
    /// Transport failed or an address was rejected; logged.
    Failed,
}

/// Builds and sends result notifications.
pub struct Notifier {
    accounts: Arc<dyn AccountStore>,
    renderer: Arc<dyn MessageRenderer>,
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        renderer: Arc<dyn MessageRenderer>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            accounts,
            renderer,
            mailer,
        }
    }

    /// HTML template, mail sent through `mailer`.
    pub fn with_mailer(accounts: Arc<dyn AccountStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self::new(accounts, Arc::new(HtmlTemplate), mailer)
    }

    /// Report a finished run if the task's policy asks for it.
    pub async fn notify(&self, task: &Task, result: &RunResult) -> Delivery {
        if !task.notify.should_notify(result.status) {
            return Delivery::Skipped;
        }

        let owner = match self.accounts.get_user(task.owner_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::debug!(
                    task_id = task.id,
                    owner_id = task.owner_id,
                    "Task owner not found, skipping notification"
                );
                return Delivery::NoRecipient;
            }
            Err(e) => {
                let err = NotifyError::AccountLookup {
                    user_id: task.owner_id,
                    reason: e.to_string(),
                };
                tracing::debug!(task_id = task.id, "{}, skipping notification", err);
                return Delivery::NoRecipient;
            }
        };

        let payload = MessagePayload {
            username: owner.username.clone(),
            task_id: task.id,
            task_name: task.name.clone(),
            start_time: result.started_at.format(START_TIME_FORMAT).to_string(),
            process_time: result.elapsed_ms as f64 / 1000.0,
            status: status_phrase(result),
            output: result.stdout.clone(),
        };

        match self
            .send(task, &owner.email, &owner.username, &payload, result.status)
            .await
        {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                tracing::error!(task_id = task.id, "Failed to send notification: {}", e);
                Delivery::Failed
            }
        }
    }

    async fn send(
        &self,
        task: &Task,
        to_address: &str,
        to_name: &str,
        payload: &MessagePayload,
        status: RunStatus,
    ) -> Result<(), NotifyError> {
        let body = self.renderer.render(payload);
        let mail = Mail {
            to_address: to_address.to_string(),
            to_name: to_name.to_string(),
            cc: task.cc_list(),
            subject: subject(task.id, status),
            body,
        };
        self.mailer.send(&mail).await
    }
}

/// Subject line: `task result notification #<id>: <outcome>`.
pub fn subject(task_id: i64, status: RunStatus) -> String {
    format!("task result notification #{}: {}", task_id, status)
}

/// Human-readable status for the message body.
pub fn status_phrase(result: &RunResult) -> String {
    match result.status {
        RunStatus::Success => "success".to_string(),
        RunStatus::Failure => format!(
            "failure ({})",
            result.cause.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::Timeout => format!("timeout ({} seconds)", result.timeout.as_secs()),
    }
}
