//! Validation rules applied before anything is persisted.
//!
//! Payload types mirror what clients send: every field is optional so that
//! missing fields can be reported per field instead of failing
//! deserialization. Validation merges a payload with the current values (for
//! partial updates) and either returns the complete, checked values or a
//! [`ValidationErrors`] map naming each offending field.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::metrics::GlucoseUnit;
use crate::reading::ReadingValues;
use crate::user::{ProfileValues, normalize_email};

/// Accepted systolic range in mmHg.
pub const SYSTOLIC_RANGE: (i32, i32) = (50, 300);
/// Accepted diastolic range in mmHg.
pub const DIASTOLIC_RANGE: (i32, i32) = (30, 200);
/// Highest plausible glucose level in mmol/L.
pub const MAX_GLUCOSE_MMOL_L: f64 = 50.0;
/// Highest plausible glucose level in mg/dL.
pub const MAX_GLUCOSE_MG_DL: f64 = 900.0;
/// Accepted age range in years.
pub const AGE_RANGE: (i64, i64) = (0, 150);
/// Accepted weight range in kilograms.
pub const WEIGHT_RANGE: (f64, f64) = (20.0, 500.0);
/// Accepted height range in centimetres.
pub const HEIGHT_RANGE: (f64, f64) = (50.0, 250.0);
/// Maximum length of first and last names.
pub const MAX_NAME_LENGTH: usize = 50;

const REQUIRED: &str = "This field is required.";

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$").expect("email pattern is valid")
});

/// Field-scoped validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Creates an empty error set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an error set with a single message.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Records a message against a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Moves every message of `other` into this set.
    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.fields {
            self.fields.entry(field).or_default().extend(messages);
        }
    }

    /// Returns the messages recorded for a field.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// Returns true if the field has at least one message.
    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the offending field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Returns `Ok(value)` when empty, `Err(self)` otherwise.
    pub fn into_result<T>(self, value: T) -> ValidationResult<T> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: ")?;
        let mut first = true;
        for (field, messages) in &self.fields {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(" "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Result type for validation.
pub type ValidationResult<T> = Result<T, ValidationErrors>;

/// Reading fields as sent by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingPayload {
    pub systolic: Option<i32>,
    pub diastolic: Option<i32>,
    pub glucose_level: Option<f64>,
    pub glucose_unit: Option<String>,
    pub notes: Option<String>,
}

/// Validates a reading payload.
///
/// With `current` set, fields missing from the payload keep their current
/// value and the merged reading is validated as a whole.
pub fn validate_reading(
    payload: &ReadingPayload,
    current: Option<&ReadingValues>,
) -> ValidationResult<ReadingValues> {
    let mut errors = ValidationErrors::new();

    let systolic = payload.systolic.or(current.map(|c| c.systolic));
    let diastolic = payload.diastolic.or(current.map(|c| c.diastolic));
    let glucose_level = payload.glucose_level.or(current.map(|c| c.glucose_level));

    let mut pressure_ok = true;
    match systolic {
        None => {
            errors.add("systolic", REQUIRED);
            pressure_ok = false;
        }
        Some(value) if !in_range(value, SYSTOLIC_RANGE) => {
            errors.add(
                "systolic",
                format!(
                    "Systolic pressure must be between {} and {} mmHg",
                    SYSTOLIC_RANGE.0, SYSTOLIC_RANGE.1
                ),
            );
            pressure_ok = false;
        }
        Some(_) => {}
    }
    match diastolic {
        None => {
            errors.add("diastolic", REQUIRED);
            pressure_ok = false;
        }
        Some(value) if !in_range(value, DIASTOLIC_RANGE) => {
            errors.add(
                "diastolic",
                format!(
                    "Diastolic pressure must be between {} and {} mmHg",
                    DIASTOLIC_RANGE.0, DIASTOLIC_RANGE.1
                ),
            );
            pressure_ok = false;
        }
        Some(_) => {}
    }

    let glucose_unit = match payload.glucose_unit.as_deref() {
        Some(label) => match GlucoseUnit::parse(label) {
            Some(unit) => unit,
            None => {
                errors.add("glucose_unit", format!("\"{label}\" is not a valid choice."));
                GlucoseUnit::default()
            }
        },
        None => current.map(|c| c.glucose_unit).unwrap_or_default(),
    };

    match glucose_level {
        None => errors.add("glucose_level", REQUIRED),
        Some(level) if level.is_nan() || level <= 0.0 => {
            errors.add("glucose_level", "Glucose level must be positive")
        }
        Some(level) => match glucose_unit {
            GlucoseUnit::MmolL if level > MAX_GLUCOSE_MMOL_L => {
                errors.add("glucose_level", "Glucose level in mmol/L seems too high")
            }
            GlucoseUnit::MgDl if level > MAX_GLUCOSE_MG_DL => {
                errors.add("glucose_level", "Glucose level in mg/dL seems too high")
            }
            _ => {}
        },
    }

    if let (true, Some(s), Some(d)) = (pressure_ok, systolic, diastolic) {
        if s <= d {
            errors.add("systolic", "Systolic pressure must be higher than diastolic");
        }
    }

    let notes = payload
        .notes
        .clone()
        .or_else(|| current.map(|c| c.notes.clone()))
        .unwrap_or_default();

    match (systolic, diastolic, glucose_level) {
        (Some(systolic), Some(diastolic), Some(glucose_level)) => errors.into_result(ReadingValues {
            systolic,
            diastolic,
            glucose_level,
            glucose_unit,
            notes,
        }),
        _ => Err(errors),
    }
}

/// Profile fields as sent by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePayload {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub has_diabetes: Option<bool>,
    pub has_hypertension: Option<bool>,
}

/// Returns true if the address has an acceptable shape.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Validates a profile payload.
///
/// Without `current` (registration) email and both names are required.
/// Email uniqueness needs the store and is checked by the caller.
pub fn validate_profile(
    payload: &ProfilePayload,
    current: Option<&ProfileValues>,
) -> ValidationResult<ProfileValues> {
    let mut errors = ValidationErrors::new();

    let email = match (&payload.email, current) {
        (Some(email), _) => {
            let email = email.trim();
            if email.is_empty() {
                errors.add("email", "This field may not be blank.");
            } else if !is_valid_email(email) {
                errors.add("email", "Invalid email format");
            }
            normalize_email(email)
        }
        (None, Some(current)) => current.email.clone(),
        (None, None) => {
            errors.add("email", REQUIRED);
            String::new()
        }
    };

    let first_name = validate_name(
        "first_name",
        payload.first_name.as_deref(),
        current.map(|c| c.first_name.as_str()),
        &mut errors,
    );
    let last_name = validate_name(
        "last_name",
        payload.last_name.as_deref(),
        current.map(|c| c.last_name.as_str()),
        &mut errors,
    );

    let age = match payload.age {
        Some(age) if !in_range(age, AGE_RANGE) => {
            errors.add(
                "age",
                format!("Age must be between {} and {}", AGE_RANGE.0, AGE_RANGE.1),
            );
            None
        }
        Some(age) => u32::try_from(age).ok(),
        None => current.and_then(|c| c.age),
    };

    let weight = match payload.weight {
        Some(weight) if !in_range_f64(weight, WEIGHT_RANGE) => {
            errors.add(
                "weight",
                format!(
                    "Weight must be between {} and {} kg",
                    WEIGHT_RANGE.0, WEIGHT_RANGE.1
                ),
            );
            None
        }
        Some(weight) => Some(weight),
        None => current.and_then(|c| c.weight),
    };

    let height = match payload.height {
        Some(height) if !in_range_f64(height, HEIGHT_RANGE) => {
            errors.add(
                "height",
                format!(
                    "Height must be between {} and {} cm",
                    HEIGHT_RANGE.0, HEIGHT_RANGE.1
                ),
            );
            None
        }
        Some(height) => Some(height),
        None => current.and_then(|c| c.height),
    };

    let has_diabetes = payload
        .has_diabetes
        .or(current.map(|c| c.has_diabetes))
        .unwrap_or(false);
    let has_hypertension = payload
        .has_hypertension
        .or(current.map(|c| c.has_hypertension))
        .unwrap_or(false);

    if has_diabetes && age.is_some_and(|age| age < 10) {
        errors.add("has_diabetes", "Diabetes diagnosis unlikely for age under 10");
    }

    errors.into_result(ProfileValues {
        email,
        first_name,
        last_name,
        age,
        weight,
        height,
        has_diabetes,
        has_hypertension,
    })
}

fn validate_name(
    field: &str,
    value: Option<&str>,
    current: Option<&str>,
    errors: &mut ValidationErrors,
) -> String {
    match (value, current) {
        (Some(value), _) => {
            let value = value.trim();
            if value.is_empty() {
                errors.add(field, "This field may not be blank.");
            } else if value.chars().count() > MAX_NAME_LENGTH {
                errors.add(
                    field,
                    format!("Ensure this field has no more than {MAX_NAME_LENGTH} characters."),
                );
            }
            value.to_string()
        }
        (None, Some(current)) => current.to_string(),
        (None, None) => {
            errors.add(field, REQUIRED);
            String::new()
        }
    }
}

fn in_range<T: PartialOrd>(value: T, (min, max): (T, T)) -> bool {
    value >= min && value <= max
}

fn in_range_f64(value: f64, range: (f64, f64)) -> bool {
    !value.is_nan() && in_range(value, range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(systolic: i32, diastolic: i32, glucose_level: f64) -> ReadingPayload {
        ReadingPayload {
            systolic: Some(systolic),
            diastolic: Some(diastolic),
            glucose_level: Some(glucose_level),
            ..Default::default()
        }
    }

    fn registration() -> ProfilePayload {
        ProfilePayload {
            email: Some("Jane@Example.com".to_string()),
            first_name: Some("Jane".to_string()),
            last_name: Some("Doe".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_reading_defaults() {
        let values = validate_reading(&reading(120, 80, 95.0), None).unwrap();
        assert_eq!(values.glucose_unit, GlucoseUnit::MgDl);
        assert_eq!(values.notes, "");
    }

    #[test]
    fn test_systolic_must_exceed_diastolic() {
        for (s, d) in [(80, 80), (90, 120), (60, 61)] {
            let errors = validate_reading(&reading(s, d, 95.0), None).unwrap_err();
            assert!(errors.has("systolic"), "{s}/{d} should fail");
            assert!(!errors.has("diastolic"));
        }
    }

    #[test]
    fn test_pressure_ranges() {
        assert!(validate_reading(&reading(300, 200, 95.0), None).is_ok());
        assert!(validate_reading(&reading(50, 30, 95.0), None).is_ok());

        let errors = validate_reading(&reading(301, 80, 95.0), None).unwrap_err();
        assert_eq!(
            errors.get("systolic").unwrap(),
            ["Systolic pressure must be between 50 and 300 mmHg"]
        );

        let errors = validate_reading(&reading(120, 29, 95.0), None).unwrap_err();
        assert!(errors.has("diastolic"));
        // The cross-field rule is skipped when a range check already failed.
        assert!(!errors.has("systolic"));
    }

    #[test]
    fn test_glucose_bounds_depend_on_unit() {
        assert!(validate_reading(&reading(120, 80, 900.0), None).is_ok());
        assert!(validate_reading(&reading(120, 80, 900.5), None).unwrap_err().has("glucose_level"));
        assert!(validate_reading(&reading(120, 80, 0.0), None).unwrap_err().has("glucose_level"));

        let mut payload = reading(120, 80, 50.0);
        payload.glucose_unit = Some("mmol/L".to_string());
        assert!(validate_reading(&payload, None).is_ok());

        payload.glucose_level = Some(51.0);
        let errors = validate_reading(&payload, None).unwrap_err();
        assert_eq!(
            errors.get("glucose_level").unwrap(),
            ["Glucose level in mmol/L seems too high"]
        );
    }

    #[test]
    fn test_invalid_unit() {
        let mut payload = reading(120, 80, 5.0);
        payload.glucose_unit = Some("mg".to_string());
        assert!(validate_reading(&payload, None).unwrap_err().has("glucose_unit"));
    }

    #[test]
    fn test_missing_fields_are_required() {
        let errors = validate_reading(&ReadingPayload::default(), None).unwrap_err();
        let fields: Vec<_> = errors.field_names().collect();
        assert_eq!(fields, ["diastolic", "glucose_level", "systolic"]);
    }

    #[test]
    fn test_partial_update_merges_current_values() {
        let current = validate_reading(&reading(130, 85, 6.0), None).unwrap();

        let patch = ReadingPayload {
            diastolic: Some(90),
            ..Default::default()
        };
        let merged = validate_reading(&patch, Some(&current)).unwrap();
        assert_eq!(merged.systolic, 130);
        assert_eq!(merged.diastolic, 90);

        let patch = ReadingPayload {
            diastolic: Some(130),
            ..Default::default()
        };
        assert!(validate_reading(&patch, Some(&current)).unwrap_err().has("systolic"));
    }

    #[test]
    fn test_valid_registration_profile() {
        let values = validate_profile(&registration(), None).unwrap();
        assert_eq!(values.email, "jane@example.com");
        assert_eq!(values.first_name, "Jane");
        assert!(!values.has_diabetes);
    }

    #[test]
    fn test_registration_requires_identity_fields() {
        let errors = validate_profile(&ProfilePayload::default(), None).unwrap_err();
        assert!(errors.has("email"));
        assert!(errors.has("first_name"));
        assert!(errors.has("last_name"));
    }

    #[test]
    fn test_email_format() {
        assert!(is_valid_email("a.b-c@mail.example.org"));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("user@localhost"));

        let mut payload = registration();
        payload.email = Some("broken@".to_string());
        assert_eq!(
            validate_profile(&payload, None).unwrap_err().get("email").unwrap(),
            ["Invalid email format"]
        );
    }

    #[test]
    fn test_body_ranges() {
        let mut payload = registration();
        payload.age = Some(151);
        payload.weight = Some(19.5);
        payload.height = Some(251.0);
        let errors = validate_profile(&payload, None).unwrap_err();
        assert!(errors.has("age"));
        assert!(errors.has("weight"));
        assert!(errors.has("height"));

        payload.age = Some(0);
        payload.weight = Some(20.0);
        payload.height = Some(250.0);
        assert!(validate_profile(&payload, None).is_ok());
    }

    #[test]
    fn test_diabetes_age_gate() {
        let mut payload = registration();
        payload.age = Some(9);
        payload.has_diabetes = Some(true);
        assert!(validate_profile(&payload, None).unwrap_err().has("has_diabetes"));

        payload.age = Some(10);
        assert!(validate_profile(&payload, None).is_ok());
    }

    #[test]
    fn test_profile_update_keeps_current_values() {
        let current = validate_profile(&registration(), None).unwrap();
        let patch = ProfilePayload {
            age: Some(42),
            ..Default::default()
        };
        let updated = validate_profile(&patch, Some(&current)).unwrap();
        assert_eq!(updated.email, current.email);
        assert_eq!(updated.age, Some(42));
    }

    #[test]
    fn test_errors_serialize_as_field_map() {
        let mut errors = ValidationErrors::single("systolic", "too low");
        errors.add("systolic", "still too low");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["systolic"][1], "still too low");
        assert_eq!(errors.to_string(), "validation failed: systolic: too low still too low");
    }
}
