//! User-related entity definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics;

/// A permission that can be granted to a user on top of owning their data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read access to every user's readings (reviewers).
    ViewAllReadings,
}

impl Permission {
    /// Returns the string representation used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewAllReadings => "view_all_readings",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view_all_readings" => Some(Self::ViewAllReadings),
            _ => None,
        }
    }
}

/// Normalizes an email address for storage and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The profile fields a user controls, already validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileValues {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub age: Option<u32>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub has_diabetes: bool,
    pub has_hypertension: bool,
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: Uuid,
    /// Email address, normalized. Used as the login handle.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Age in years.
    pub age: Option<u32>,
    /// Weight in kilograms.
    pub weight: Option<f64>,
    /// Height in centimetres.
    pub height: Option<f64>,
    /// Diagnosed with diabetes.
    pub has_diabetes: bool,
    /// Diagnosed with hypertension.
    pub has_hypertension: bool,
    /// Inactive users cannot log in.
    pub is_active: bool,
    /// Staff status.
    pub is_staff: bool,
    /// Superusers hold every permission.
    pub is_superuser: bool,
    /// Explicitly granted permissions.
    pub permissions: Vec<Permission>,
    /// Argon2 PHC string.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// When the user registered.
    pub date_joined: DateTime<Utc>,
    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Last successful login.
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Creates a new active user with the given email and password hash,
    /// joined at `now`.
    pub fn new(email: &str, password_hash: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            first_name: String::new(),
            last_name: String::new(),
            age: None,
            weight: None,
            height: None,
            has_diabetes: false,
            has_hypertension: false,
            is_active: true,
            is_staff: false,
            is_superuser: false,
            permissions: Vec::new(),
            password_hash: password_hash.into(),
            date_joined: now,
            updated_at: now,
            last_login: None,
        }
    }

    /// Sets first and last name.
    pub fn with_name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }

    /// Grants a permission.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
        self
    }

    /// Creates a user from validated profile values.
    pub fn from_profile(
        profile: ProfileValues,
        password_hash: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut user = Self::new(&profile.email, password_hash, now);
        user.apply_profile(profile, now);
        user
    }

    /// Creates an active staff superuser.
    pub fn superuser(email: &str, password_hash: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            is_staff: true,
            is_superuser: true,
            ..Self::new(email, password_hash, now)
        }
    }

    /// Returns the current profile values.
    pub fn profile(&self) -> ProfileValues {
        ProfileValues {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            age: self.age,
            weight: self.weight,
            height: self.height,
            has_diabetes: self.has_diabetes,
            has_hypertension: self.has_hypertension,
        }
    }

    /// Replaces the profile values and bumps `updated_at`.
    pub fn apply_profile(&mut self, profile: ProfileValues, now: DateTime<Utc>) {
        self.email = normalize_email(&profile.email);
        self.first_name = profile.first_name;
        self.last_name = profile.last_name;
        self.age = profile.age;
        self.weight = profile.weight;
        self.height = profile.height;
        self.has_diabetes = profile.has_diabetes;
        self.has_hypertension = profile.has_hypertension;
        self.updated_at = now;
    }

    /// Full name, falling back to the email.
    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }

    /// Body-mass index, if weight and height are known.
    pub fn bmi(&self) -> Option<f64> {
        metrics::bmi(self.weight, self.height)
    }

    /// Returns true if the user holds the permission.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_superuser || self.permissions.contains(&permission)
    }
}
