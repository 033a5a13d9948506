//! Derived medical metrics.
//!
//! Everything in this module is a pure function over stored values. Nothing
//! computed here is ever persisted; responses compute it on read.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Conversion factor between mg/dL and mmol/L for blood glucose.
pub const MG_DL_PER_MMOL_L: f64 = 18.0;

/// Systolic pressure at or above which a reading is abnormal.
pub const ABNORMAL_SYSTOLIC: i32 = 140;

/// Diastolic pressure at or above which a reading is abnormal.
pub const ABNORMAL_DIASTOLIC: i32 = 90;

/// Raw glucose level at or above which a reading is abnormal.
pub const ABNORMAL_GLUCOSE: f64 = 200.0;

/// Unit a glucose level is recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GlucoseUnit {
    /// Milligrams per decilitre.
    #[default]
    #[serde(rename = "mg/dL")]
    MgDl,
    /// Millimoles per litre.
    #[serde(rename = "mmol/L")]
    MmolL,
}

impl GlucoseUnit {
    /// Returns the canonical label stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MgDl => "mg/dL",
            Self::MmolL => "mmol/L",
        }
    }

    /// Parses a stored label.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mg/dL" => Some(Self::MgDl),
            "mmol/L" => Some(Self::MmolL),
            _ => None,
        }
    }
}

impl fmt::Display for GlucoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a blood-pressure pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodPressureCategory {
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Elevated")]
    Elevated,
    #[serde(rename = "Hypertension Stage 1")]
    HypertensionStage1,
    #[serde(rename = "Hypertension Stage 2")]
    HypertensionStage2,
    #[serde(rename = "Hypertensive Crisis")]
    HypertensiveCrisis,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl BloodPressureCategory {
    /// Returns the human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Elevated => "Elevated",
            Self::HypertensionStage1 => "Hypertension Stage 1",
            Self::HypertensionStage2 => "Hypertension Stage 2",
            Self::HypertensiveCrisis => "Hypertensive Crisis",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BloodPressureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies a blood-pressure pair.
///
/// Rules are evaluated in order and the first match wins. The stage 2 rule
/// comes before the crisis rule, so values above the crisis thresholds are
/// reported as [`BloodPressureCategory::HypertensionStage2`]. Keep this order
/// until the product owners decide otherwise.
pub fn blood_pressure_category(
    systolic: Option<i32>,
    diastolic: Option<i32>,
) -> BloodPressureCategory {
    let (Some(s), Some(d)) = (systolic, diastolic) else {
        return BloodPressureCategory::Unknown;
    };

    if s < 120 && d < 80 {
        BloodPressureCategory::Normal
    } else if (120..=129).contains(&s) && d < 80 {
        BloodPressureCategory::Elevated
    } else if (130..=139).contains(&s) || (80..=89).contains(&d) {
        BloodPressureCategory::HypertensionStage1
    } else if s >= 140 || d >= 90 {
        BloodPressureCategory::HypertensionStage2
    } else if s > 180 || d > 120 {
        BloodPressureCategory::HypertensiveCrisis
    } else {
        BloodPressureCategory::Unknown
    }
}

/// Rounds to two decimal places, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts a glucose level to mmol/L.
pub fn glucose_to_mmol(level: f64, unit: GlucoseUnit) -> f64 {
    match unit {
        GlucoseUnit::MgDl => round2(level / MG_DL_PER_MMOL_L),
        GlucoseUnit::MmolL => level,
    }
}

/// Converts a glucose level to mg/dL.
pub fn glucose_to_mg_dl(level: f64, unit: GlucoseUnit) -> f64 {
    match unit {
        GlucoseUnit::MmolL => round2(level * MG_DL_PER_MMOL_L),
        GlucoseUnit::MgDl => level,
    }
}

/// Body-mass index from weight in kilograms and height in centimetres.
pub fn bmi(weight_kg: Option<f64>, height_cm: Option<f64>) -> Option<f64> {
    match (weight_kg, height_cm) {
        (Some(w), Some(h)) if w > 0.0 && h > 0.0 => {
            let height_m = h / 100.0;
            Some(round2(w / (height_m * height_m)))
        }
        _ => None,
    }
}

/// Returns true if the values warrant an alert.
///
/// The glucose threshold applies to the raw stored value whatever its unit.
pub fn is_abnormal(systolic: i32, diastolic: i32, glucose_level: f64) -> bool {
    systolic >= ABNORMAL_SYSTOLIC
        || diastolic >= ABNORMAL_DIASTOLIC
        || glucose_level >= ABNORMAL_GLUCOSE
}
