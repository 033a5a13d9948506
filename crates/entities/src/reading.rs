//! Health reading entity definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::{self, BloodPressureCategory, GlucoseUnit};
use crate::validation::{ValidationErrors, ValidationResult};

/// The user-controlled values of a reading, already validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingValues {
    /// Systolic pressure in mmHg.
    pub systolic: i32,
    /// Diastolic pressure in mmHg.
    pub diastolic: i32,
    /// Blood glucose level in `glucose_unit`.
    pub glucose_level: f64,
    /// Unit of `glucose_level`.
    #[serde(default)]
    pub glucose_unit: GlucoseUnit,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
}

/// One blood-pressure and glucose measurement owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Unique identifier.
    pub id: Uuid,
    /// Owner of this reading.
    pub user_id: Uuid,
    /// Systolic pressure in mmHg.
    pub systolic: i32,
    /// Diastolic pressure in mmHg.
    pub diastolic: i32,
    /// Blood glucose level in `glucose_unit`.
    pub glucose_level: f64,
    /// Unit of `glucose_level`.
    pub glucose_unit: GlucoseUnit,
    /// Free-text notes.
    pub notes: String,
    /// When the reading was recorded. Never changes.
    pub created_at: DateTime<Utc>,
    /// When the reading was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Reading {
    /// Creates a reading for `user_id` recorded at `now`.
    pub fn new(user_id: Uuid, values: ReadingValues, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            systolic: values.systolic,
            diastolic: values.diastolic,
            glucose_level: values.glucose_level,
            glucose_unit: values.glucose_unit,
            notes: values.notes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the current user-controlled values.
    pub fn values(&self) -> ReadingValues {
        ReadingValues {
            systolic: self.systolic,
            diastolic: self.diastolic,
            glucose_level: self.glucose_level,
            glucose_unit: self.glucose_unit,
            notes: self.notes.clone(),
        }
    }

    /// Replaces the user-controlled values and bumps `updated_at`.
    pub fn apply(&mut self, values: ReadingValues, now: DateTime<Utc>) {
        self.systolic = values.systolic;
        self.diastolic = values.diastolic;
        self.glucose_level = values.glucose_level;
        self.glucose_unit = values.glucose_unit;
        self.notes = values.notes;
        self.updated_at = now;
    }

    /// Checks the invariants that must hold for every stored reading.
    pub fn check_invariants(&self) -> ValidationResult<()> {
        let mut errors = ValidationErrors::new();
        if self.systolic <= self.diastolic {
            errors.add(
                "systolic",
                "Systolic blood pressure must be greater than diastolic blood pressure.",
            );
        }
        errors.into_result(())
    }

    /// Blood-pressure classification.
    pub fn blood_pressure_category(&self) -> BloodPressureCategory {
        metrics::blood_pressure_category(Some(self.systolic), Some(self.diastolic))
    }

    /// Glucose level in mmol/L.
    pub fn glucose_mmol(&self) -> f64 {
        metrics::glucose_to_mmol(self.glucose_level, self.glucose_unit)
    }

    /// Glucose level in mg/dL.
    pub fn glucose_mg_dl(&self) -> f64 {
        metrics::glucose_to_mg_dl(self.glucose_level, self.glucose_unit)
    }

    /// Returns true if the reading should trigger an alert.
    pub fn is_abnormal(&self) -> bool {
        metrics::is_abnormal(self.systolic, self.diastolic, self.glucose_level)
    }
}
