//! Password strength policy.

use entities::ValidationErrors;

use crate::DEFAULT_MIN_PASSWORD_LENGTH;

/// Passwords rejected outright regardless of the other rules.
const COMMON_PASSWORDS: &[&str] = &[
    "123456", "12345678", "123456789", "1234567890", "password", "password1",
    "password123", "passw0rd", "qwerty", "qwerty123", "qwertyuiop", "abc123",
    "abcd1234", "111111", "000000", "iloveyou", "letmein", "welcome",
    "welcome1", "monkey", "dragon", "football", "baseball", "sunshine",
    "princess", "admin", "admin123", "login", "master", "trustno1",
    "superman", "starwars", "whatever", "changeme", "secret", "zaq12wsx",
];

/// Attribute parts shorter than this are ignored by the similarity check.
const MIN_SIMILAR_PART: usize = 3;

/// User attributes a password is compared against.
#[derive(Debug, Clone, Default)]
pub struct PasswordContext<'a> {
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

/// A single password rule.
pub trait PasswordValidator: Send + Sync {
    /// Returns a message for every way the password breaks this rule.
    fn validate(&self, password: &str, context: &PasswordContext<'_>) -> Vec<String>;
}

/// Rejects passwords shorter than a minimum length.
#[derive(Debug, Clone)]
pub struct MinimumLength(pub usize);

impl PasswordValidator for MinimumLength {
    fn validate(&self, password: &str, _context: &PasswordContext<'_>) -> Vec<String> {
        if password.chars().count() < self.0 {
            vec![format!(
                "This password is too short. It must contain at least {} characters.",
                self.0
            )]
        } else {
            Vec::new()
        }
    }
}

/// Rejects passwords made only of digits.
#[derive(Debug, Clone, Default)]
pub struct NotNumeric;

impl PasswordValidator for NotNumeric {
    fn validate(&self, password: &str, _context: &PasswordContext<'_>) -> Vec<String> {
        if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
            vec!["This password is entirely numeric.".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Rejects well-known passwords.
#[derive(Debug, Clone, Default)]
pub struct NotCommon;

impl PasswordValidator for NotCommon {
    fn validate(&self, password: &str, _context: &PasswordContext<'_>) -> Vec<String> {
        let lowered = password.trim().to_lowercase();
        if COMMON_PASSWORDS.contains(&lowered.as_str()) {
            vec!["This password is too common.".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Rejects passwords that contain, or are contained in, the user's email
/// local part or names.
#[derive(Debug, Clone, Default)]
pub struct NotSimilarToUser;

impl NotSimilarToUser {
    fn parts<'a>(value: &'a str) -> impl Iterator<Item = String> + 'a {
        std::iter::once(value.to_lowercase())
            .chain(
                value
                    .split(|c: char| !c.is_alphanumeric())
                    .map(str::to_lowercase),
            )
            .filter(|part| part.chars().count() >= MIN_SIMILAR_PART)
    }
}

impl PasswordValidator for NotSimilarToUser {
    fn validate(&self, password: &str, context: &PasswordContext<'_>) -> Vec<String> {
        let lowered = password.to_lowercase();
        let local_part = context.email.split('@').next().unwrap_or_default();

        let attributes = [
            ("email address", local_part),
            ("first name", context.first_name),
            ("last name", context.last_name),
        ];

        for (label, value) in attributes {
            let similar = Self::parts(value)
                .any(|part| lowered.contains(&part) || part.contains(&lowered));
            if similar {
                return vec![format!("The password is too similar to the {label}.")];
            }
        }

        Vec::new()
    }
}

/// An ordered set of password rules.
pub struct PasswordPolicy {
    validators: Vec<Box<dyn PasswordValidator>>,
}

impl PasswordPolicy {
    /// Creates a policy with no rules.
    pub fn empty() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    /// Creates the default policy with the given minimum length.
    pub fn with_min_length(min_length: usize) -> Self {
        Self::empty()
            .with(NotSimilarToUser)
            .with(MinimumLength(min_length))
            .with(NotCommon)
            .with(NotNumeric)
    }

    /// Appends a rule.
    pub fn with(mut self, validator: impl PasswordValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Returns every message produced by the rules, in order.
    pub fn messages(&self, password: &str, context: &PasswordContext<'_>) -> Vec<String> {
        self.validators
            .iter()
            .flat_map(|v| v.validate(password, context))
            .collect()
    }

    /// Checks a password, reporting failures against `field`.
    pub fn check(
        &self,
        field: &str,
        password: &str,
        context: &PasswordContext<'_>,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for message in self.messages(password, context) {
            errors.add(field, message);
        }
        errors.into_result(())
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::with_min_length(DEFAULT_MIN_PASSWORD_LENGTH)
    }
}

impl std::fmt::Debug for PasswordPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordPolicy")
            .field("validators", &self.validators.len())
            .finish()
    }
}
