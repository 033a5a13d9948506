//! Application state

use std::sync::Arc;

use auth::{Argon2Hasher, PasswordHasher, PasswordPolicy};
use health_store::{Clock, HealthStore, MemoryHealthStore, SqliteHealthStore, SystemClock};

use crate::{
    config::ServerConfig,
    services::{AbnormalReadingNotifier, LogNotifier, RegistrationThrottle, SmtpNotifier},
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Health data store
    pub store: Arc<dyn HealthStore>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Password hashing
    pub hasher: Arc<dyn PasswordHasher>,

    /// Password strength rules for new passwords
    pub password_policy: Arc<PasswordPolicy>,

    /// Registration throttle
    pub throttle: Arc<RegistrationThrottle>,

    /// Abnormal reading alerts
    pub notifier: Arc<dyn AbnormalReadingNotifier>,

    /// Server configuration
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create a new application state
    pub async fn new(config: ServerConfig) -> Result<Self, StateError> {
        // Initialize store based on the database URL
        let store: Arc<dyn HealthStore> = if config.uses_memory_store() {
            Arc::new(MemoryHealthStore::new())
        } else {
            let store = SqliteHealthStore::connect(&config.database_url)
                .await
                .map_err(|e| StateError::Database(e.to_string()))?;
            Arc::new(store)
        };

        // Alerts go out over SMTP when configured, otherwise they are logged
        let notifier: Arc<dyn AbnormalReadingNotifier> = match &config.smtp {
            Some(smtp) => Arc::new(
                SmtpNotifier::new(smtp).map_err(|e| StateError::Notifier(e.to_string()))?,
            ),
            None => {
                tracing::info!("SMTP not configured, abnormal reading alerts will be logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::from_parts(config, store).with_notifier(notifier))
    }

    /// Assembles state around an existing store with the system clock, the
    /// default hasher and a log-only notifier
    pub fn from_parts(config: ServerConfig, store: Arc<dyn HealthStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let throttle = RegistrationThrottle::new(
            config.registration_limit,
            config.registration_window_secs,
            clock.clone(),
        );

        Self {
            store,
            clock,
            hasher: Arc::new(Argon2Hasher::new()),
            password_policy: Arc::new(PasswordPolicy::with_min_length(config.min_password_length)),
            throttle: Arc::new(throttle),
            notifier: Arc::new(LogNotifier),
            config: Arc::new(config),
        }
    }

    /// Replaces the clock. The throttle is rebuilt on the new clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.throttle = Arc::new(RegistrationThrottle::new(
            self.config.registration_limit,
            self.config.registration_window_secs,
            clock.clone(),
        ));
        self.clock = clock;
        self
    }

    /// Replaces the password hasher
    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Replaces the notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn AbnormalReadingNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// State initialization errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize database: {0}")]
    Database(String),

    #[error("Failed to initialize notifier: {0}")]
    Notifier(String),
}
