//! Alerts sent to a user when one of their readings is abnormal.

use std::sync::Arc;

use async_trait::async_trait;
use entities::{Reading, User};
use health_store::HealthStore;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::config::SmtpConfig;

/// Subject line of abnormal reading alerts.
pub const ALERT_SUBJECT: &str = "Abnormal Health Reading Alert";

/// Notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address:?}: {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// An alert ready to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Alert {
    /// Composes the alert for `reading`, addressed to its owner.
    pub fn for_reading(user: &User, reading: &Reading) -> Self {
        let body = format!(
            "Dear {},\n\n\
             Your recent health reading shows abnormal values:\n\
             Blood Pressure: {}/{} mmHg\n\
             Glucose Level: {} {}\n\n\
             Please consult your healthcare provider.",
            user.full_name(),
            reading.systolic,
            reading.diastolic,
            reading.glucose_level,
            reading.glucose_unit.as_str(),
        );

        Self {
            to: user.email.clone(),
            subject: ALERT_SUBJECT.to_string(),
            body,
        }
    }
}

/// Delivers abnormal reading alerts.
#[async_trait]
pub trait AbnormalReadingNotifier: Send + Sync {
    async fn notify(&self, user: &User, reading: &Reading) -> NotifyResult<()>;
}

/// Notifier that only logs the alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl AbnormalReadingNotifier for LogNotifier {
    async fn notify(&self, user: &User, reading: &Reading) -> NotifyResult<()> {
        let alert = Alert::for_reading(user, reading);
        tracing::info!(
            user_id = %user.id,
            reading_id = %reading.id,
            to = %alert.to,
            subject = %alert.subject,
            "Abnormal reading alert (SMTP not configured)"
        );
        Ok(())
    }
}

/// Notifier that sends alerts over SMTP.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Builds the transport from configuration. No connection is made until
    /// the first alert is sent.
    pub fn new(config: &SmtpConfig) -> NotifyResult<Self> {
        let from = parse_mailbox(&config.from_address)?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            starttls = config.starttls,
            "SMTP notifier configured"
        );

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl AbnormalReadingNotifier for SmtpNotifier {
    async fn notify(&self, user: &User, reading: &Reading) -> NotifyResult<()> {
        let alert = Alert::for_reading(user, reading);
        let message = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(&alert.to)?)
            .subject(alert.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(alert.body)?;

        self.transport.send(message).await?;
        tracing::debug!(user_id = %user.id, reading_id = %reading.id, "Sent abnormal reading alert");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> NotifyResult<Mailbox> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Sends the alert for `reading` to its owner in the background if the
/// reading is abnormal.
///
/// Returns immediately. Failures to load the owner or deliver the alert are
/// logged and never reach the request that stored the reading.
pub fn dispatch_abnormal_alert(
    store: Arc<dyn HealthStore>,
    notifier: Arc<dyn AbnormalReadingNotifier>,
    reading: Reading,
) -> Option<tokio::task::JoinHandle<()>> {
    if !reading.is_abnormal() {
        return None;
    }

    Some(tokio::spawn(async move {
        let user = match store.get_user(reading.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(reading_id = %reading.id, "Owner of abnormal reading is gone");
                return;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    reading_id = %reading.id,
                    "Failed to load owner of abnormal reading"
                );
                return;
            }
        };

        if let Err(e) = notifier.notify(&user, &reading).await {
            tracing::warn!(
                error = %e,
                user_id = %user.id,
                reading_id = %reading.id,
                "Failed to send abnormal reading alert"
            );
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use entities::{GlucoseUnit, ReadingValues};
    use health_store::MemoryHealthStore;

    use super::*;

    struct CountingNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AbnormalReadingNotifier for CountingNotifier {
        async fn notify(&self, _user: &User, _reading: &Reading) -> NotifyResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Other("mailbox full".into()))
        }
    }

    fn reading(user: &User, systolic: i32, diastolic: i32) -> Reading {
        Reading::new(
            user.id,
            ReadingValues {
                systolic,
                diastolic,
                glucose_level: 5.5,
                glucose_unit: GlucoseUnit::MmolL,
                notes: String::new(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_alert_contents() {
        let user = User::new("jane@example.com", "hash", Utc::now()).with_name("Jane", "Doe");
        let alert = Alert::for_reading(&user, &reading(&user, 150, 95));

        assert_eq!(alert.to, "jane@example.com");
        assert_eq!(alert.subject, ALERT_SUBJECT);
        assert!(alert.body.starts_with("Dear Jane Doe,"));
        assert!(alert.body.contains("Blood Pressure: 150/95 mmHg"));
        assert!(alert.body.contains("Glucose Level: 5.5 mmol/L"));
    }

    async fn setup() -> (Arc<MemoryHealthStore>, Arc<CountingNotifier>, User) {
        let store = Arc::new(MemoryHealthStore::new());
        let user = store
            .create_user(User::new("a@example.com", "hash", Utc::now()))
            .await
            .unwrap();
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
        });
        (store, notifier, user)
    }

    #[tokio::test]
    async fn test_dispatch_skips_normal_readings() {
        let (store, notifier, user) = setup().await;

        let handle = dispatch_abnormal_alert(store, notifier.clone(), reading(&user, 120, 80));
        assert!(handle.is_none());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let (store, notifier, user) = setup().await;

        let handle = dispatch_abnormal_alert(store, notifier.clone(), reading(&user, 160, 100))
            .expect("abnormal reading is dispatched");
        handle.await.unwrap();
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_owner() {
        let (store, notifier, _) = setup().await;
        let stranger = User::new("gone@example.com", "hash", Utc::now());

        let handle = dispatch_abnormal_alert(store, notifier.clone(), reading(&stranger, 160, 100))
            .expect("abnormal reading is dispatched");
        handle.await.unwrap();
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_smtp_notifier_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "localhost".into(),
            port: 25,
            username: None,
            password: None,
            from_address: "not an address".into(),
            starttls: false,
        };
        assert!(matches!(
            SmtpNotifier::new(&config),
            Err(NotifyError::Address { .. })
        ));
    }
}
