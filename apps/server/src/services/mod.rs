//! Services shared by the request handlers.

pub mod notifier;
pub mod throttle;

pub use notifier::{
    AbnormalReadingNotifier, Alert, LogNotifier, NotifyError, NotifyResult, SmtpNotifier,
    dispatch_abnormal_alert,
};
pub use throttle::RegistrationThrottle;
