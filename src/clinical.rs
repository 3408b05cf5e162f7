//! Derived clinical values shown alongside the vitals and intake steps.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::steps::StepData;

/// Naegele's rule: LMP + 280 days
const PREGNANCY_DAYS: i64 = 280;

/// Body-mass index from weight (kg) and height (cm), one decimal place
pub fn bmi(weight_kg: Option<f32>, height_cm: Option<f32>) -> Option<f32> {
    let weight = weight_kg?;
    let height = height_cm?;
    if !(weight.is_finite() && height.is_finite()) || weight <= 0.0 || height <= 0.0 {
        return None;
    }
    let meters = height / 100.0;
    Some((weight / (meters * meters) * 10.0).round() / 10.0)
}

/// WHO adult BMI classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl BmiCategory {
    pub fn from_bmi(bmi: f32) -> Self {
        if bmi < 18.5 {
            BmiCategory::Underweight
        } else if bmi < 25.0 {
            BmiCategory::Normal
        } else if bmi < 30.0 {
            BmiCategory::Overweight
        } else {
            BmiCategory::Obese
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BmiCategory::Underweight => "Underweight",
            BmiCategory::Normal => "Normal weight",
            BmiCategory::Overweight => "Overweight",
            BmiCategory::Obese => "Obese",
        }
    }
}

pub fn estimated_due_date(last_menstrual_period: NaiveDate) -> NaiveDate {
    last_menstrual_period + Duration::days(PREGNANCY_DAYS)
}

/// Gestational age in completed weeks plus days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestationalAge {
    pub weeks: u32,
    pub days: u32,
}

/// Gestational age on `on`, or `None` if `on` precedes the LMP
pub fn gestational_age(last_menstrual_period: NaiveDate, on: NaiveDate) -> Option<GestationalAge> {
    let elapsed = (on - last_menstrual_period).num_days();
    if elapsed < 0 {
        return None;
    }
    let elapsed = elapsed as u32;
    Some(GestationalAge {
        weeks: elapsed / 7,
        days: elapsed % 7,
    })
}

/// Values derived from the recorded intake and vitals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClinicalSummary {
    pub bmi: Option<f32>,
    pub bmi_category: Option<BmiCategory>,
    pub estimated_due_date: Option<NaiveDate>,
    pub gestational_age: Option<GestationalAge>,
}

impl ClinicalSummary {
    /// Summarise `data` as of `on`
    pub fn from_data(data: &StepData, on: NaiveDate) -> Self {
        let bmi = data.vitals.computed_bmi();
        let lmp = data.intake.last_menstrual_period;
        Self {
            bmi,
            bmi_category: bmi.map(BmiCategory::from_bmi),
            estimated_due_date: lmp.map(estimated_due_date),
            gestational_age: lmp.and_then(|lmp| gestational_age(lmp, on)),
        }
    }
}
