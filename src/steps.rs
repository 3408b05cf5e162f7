//! Step data containers for the consultation workflow.
//!
//! Each of the seven workflow steps owns an explicit record. `StepPayload`
//! ties a record to its step so the controller can switch over steps
//! exhaustively, and `StepData` holds the payloads of every step at once.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::clinical;

/// Number of steps in a consultation
pub const STEP_COUNT: usize = 7;

/// A consultation step, 0-based internally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Intake,
    Vitals,
    ChiefComplaint,
    PhysicalExam,
    SpecialtyExam,
    Soap,
    Prescription,
}

impl Step {
    pub const ALL: [Step; STEP_COUNT] = [
        Step::Intake,
        Step::Vitals,
        Step::ChiefComplaint,
        Step::PhysicalExam,
        Step::SpecialtyExam,
        Step::Soap,
        Step::Prescription,
    ];

    pub fn first() -> Self {
        Step::Intake
    }

    pub fn last() -> Self {
        Step::Prescription
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Step number as the backend counts it (1-based)
    pub fn wire_number(self) -> u8 {
        self as u8 + 1
    }

    /// Parse a backend (1-based) step number
    pub fn from_wire_number(number: u8) -> Option<Self> {
        number
            .checked_sub(1)
            .and_then(|i| Self::from_index(i as usize))
    }

    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn prev(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn is_last(self) -> bool {
        self == Self::last()
    }

    /// Human-readable title shown by the wizard
    pub fn title(self) -> &'static str {
        match self {
            Step::Intake => "Patient Intake",
            Step::Vitals => "Vital Signs",
            Step::ChiefComplaint => "Chief Complaint",
            Step::PhysicalExam => "Physical Examination",
            Step::SpecialtyExam => "Specialty Examination",
            Step::Soap => "SOAP Assessment",
            Step::Prescription => "Prescription & Follow-up",
        }
    }

    /// Fields that must be non-empty before the workflow may leave this step
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Step::Intake => &["reason_for_visit"],
            Step::Vitals => &["blood_pressure", "heart_rate", "temperature"],
            Step::ChiefComplaint => &["chief_complaint"],
            Step::PhysicalExam | Step::SpecialtyExam => &[],
            Step::Soap => &["assessment", "plan"],
            Step::Prescription => &[],
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeData {
    pub reason_for_visit: String,
    pub symptoms_duration: Option<String>,
    pub allergies: Vec<String>,
    pub current_medications: Vec<String>,
    pub medical_history: Option<String>,
    /// Used for the estimated due date in obstetric consultations
    pub last_menstrual_period: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsData {
    /// Systolic/diastolic, e.g. "120/80"
    pub blood_pressure: String,
    pub heart_rate: Option<u32>,
    /// Degrees Celsius
    pub temperature: Option<f32>,
    pub respiratory_rate: Option<u32>,
    pub oxygen_saturation: Option<u32>,
    pub weight_kg: Option<f32>,
    pub height_cm: Option<f32>,
    pub bmi: Option<f32>,
}

impl VitalsData {
    /// BMI derived from the recorded weight and height
    pub fn computed_bmi(&self) -> Option<f32> {
        clinical::bmi(self.weight_kg, self.height_cm)
    }

    /// Refresh the stored BMI from weight and height
    pub fn with_computed_bmi(mut self) -> Self {
        self.bmi = self.computed_bmi();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChiefComplaintData {
    pub chief_complaint: String,
    pub history_of_present_illness: Option<String>,
    pub onset: Option<String>,
    /// Patient-reported severity, 1-10
    pub severity: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalExamData {
    pub general_appearance: Option<String>,
    /// Findings keyed by body system ("cardiovascular", "respiratory", ...)
    pub systems: BTreeMap<String, String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialtyExamData {
    pub specialty_code: Option<String>,
    pub findings: BTreeMap<String, String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnosis {
    pub code: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoapData {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
    pub diagnoses: Vec<Diagnosis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUp {
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrescriptionData {
    pub medications: Vec<Medication>,
    pub follow_up: Option<FollowUp>,
    pub notes: Option<String>,
}

/// Payload of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", content = "data", rename_all = "snake_case")]
pub enum StepPayload {
    Intake(IntakeData),
    Vitals(VitalsData),
    ChiefComplaint(ChiefComplaintData),
    PhysicalExam(PhysicalExamData),
    SpecialtyExam(SpecialtyExamData),
    Soap(SoapData),
    Prescription(PrescriptionData),
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl StepPayload {
    pub fn step(&self) -> Step {
        match self {
            StepPayload::Intake(_) => Step::Intake,
            StepPayload::Vitals(_) => Step::Vitals,
            StepPayload::ChiefComplaint(_) => Step::ChiefComplaint,
            StepPayload::PhysicalExam(_) => Step::PhysicalExam,
            StepPayload::SpecialtyExam(_) => Step::SpecialtyExam,
            StepPayload::Soap(_) => Step::Soap,
            StepPayload::Prescription(_) => Step::Prescription,
        }
    }

    /// Required fields of this payload that are empty, in table order
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self {
            StepPayload::Intake(d) => {
                if blank(&d.reason_for_visit) {
                    missing.push("reason_for_visit");
                }
            }
            StepPayload::Vitals(d) => {
                if blank(&d.blood_pressure) {
                    missing.push("blood_pressure");
                }
                if d.heart_rate.unwrap_or(0) == 0 {
                    missing.push("heart_rate");
                }
                if d.temperature.map_or(true, |t| t == 0.0 || !t.is_finite()) {
                    missing.push("temperature");
                }
            }
            StepPayload::ChiefComplaint(d) => {
                if blank(&d.chief_complaint) {
                    missing.push("chief_complaint");
                }
            }
            StepPayload::Soap(d) => {
                if blank(&d.assessment) {
                    missing.push("assessment");
                }
                if blank(&d.plan) {
                    missing.push("plan");
                }
            }
            StepPayload::PhysicalExam(_)
            | StepPayload::SpecialtyExam(_)
            | StepPayload::Prescription(_) => {}
        }
        missing
    }

    /// Apply derived values before the payload is stored
    pub fn normalized(self) -> Self {
        match self {
            StepPayload::Vitals(d) => StepPayload::Vitals(d.with_computed_bmi()),
            other => other,
        }
    }

    /// The bare record as JSON, without the step tag
    pub fn data_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StepPayload::Intake(d) => serde_json::to_value(d),
            StepPayload::Vitals(d) => serde_json::to_value(d),
            StepPayload::ChiefComplaint(d) => serde_json::to_value(d),
            StepPayload::PhysicalExam(d) => serde_json::to_value(d),
            StepPayload::SpecialtyExam(d) => serde_json::to_value(d),
            StepPayload::Soap(d) => serde_json::to_value(d),
            StepPayload::Prescription(d) => serde_json::to_value(d),
        }
    }
}

/// Payloads of every step of one consultation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StepData {
    pub intake: IntakeData,
    pub vitals: VitalsData,
    pub chief_complaint: ChiefComplaintData,
    pub physical_exam: PhysicalExamData,
    pub specialty_exam: SpecialtyExamData,
    pub soap: SoapData,
    pub prescription: PrescriptionData,
}

impl StepData {
    pub fn get(&self, step: Step) -> StepPayload {
        match step {
            Step::Intake => StepPayload::Intake(self.intake.clone()),
            Step::Vitals => StepPayload::Vitals(self.vitals.clone()),
            Step::ChiefComplaint => StepPayload::ChiefComplaint(self.chief_complaint.clone()),
            Step::PhysicalExam => StepPayload::PhysicalExam(self.physical_exam.clone()),
            Step::SpecialtyExam => StepPayload::SpecialtyExam(self.specialty_exam.clone()),
            Step::Soap => StepPayload::Soap(self.soap.clone()),
            Step::Prescription => StepPayload::Prescription(self.prescription.clone()),
        }
    }

    pub fn set(&mut self, payload: StepPayload) {
        match payload {
            StepPayload::Intake(d) => self.intake = d,
            StepPayload::Vitals(d) => self.vitals = d,
            StepPayload::ChiefComplaint(d) => self.chief_complaint = d,
            StepPayload::PhysicalExam(d) => self.physical_exam = d,
            StepPayload::SpecialtyExam(d) => self.specialty_exam = d,
            StepPayload::Soap(d) => self.soap = d,
            StepPayload::Prescription(d) => self.prescription = d,
        }
    }

    pub fn missing_fields(&self, step: Step) -> Vec<&'static str> {
        self.get(step).missing_fields()
    }

    /// Recompute derived values, e.g. after hydrating from the server or a draft
    pub fn normalized(mut self) -> Self {
        self.vitals = self.vitals.with_computed_bmi();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn complete_vitals() -> VitalsData {
        VitalsData {
            blood_pressure: "120/80".to_string(),
            heart_rate: Some(72),
            temperature: Some(36.5),
            ..Default::default()
        }
    }

    #[test]
    fn test_step_index_roundtrip() {
        for (i, step) in Step::ALL.iter().enumerate() {
            assert_eq!(step.index(), i);
            assert_eq!(Step::from_index(i), Some(*step));
        }
        assert_eq!(Step::from_index(STEP_COUNT), None);
    }

    #[test]
    fn test_wire_numbers_are_one_based() {
        assert_eq!(Step::Intake.wire_number(), 1);
        assert_eq!(Step::Prescription.wire_number(), 7);
        assert_eq!(Step::from_wire_number(1), Some(Step::Intake));
        assert_eq!(Step::from_wire_number(6), Some(Step::Soap));
        assert_eq!(Step::from_wire_number(0), None);
        assert_eq!(Step::from_wire_number(8), None);
    }

    #[test]
    fn test_next_and_prev_bounds() {
        assert_eq!(Step::Intake.prev(), None);
        assert_eq!(Step::Intake.next(), Some(Step::Vitals));
        assert_eq!(Step::Prescription.next(), None);
        assert_eq!(Step::Prescription.prev(), Some(Step::Soap));
        assert!(Step::Prescription.is_last());
        assert!(!Step::Soap.is_last());
    }

    #[test]
    fn test_required_fields_table() {
        assert_eq!(Step::Intake.required_fields(), &["reason_for_visit"]);
        assert_eq!(
            Step::Vitals.required_fields(),
            &["blood_pressure", "heart_rate", "temperature"]
        );
        assert_eq!(Step::ChiefComplaint.required_fields(), &["chief_complaint"]);
        assert!(Step::PhysicalExam.required_fields().is_empty());
        assert!(Step::SpecialtyExam.required_fields().is_empty());
        assert_eq!(Step::Soap.required_fields(), &["assessment", "plan"]);
        assert!(Step::Prescription.required_fields().is_empty());
    }

    #[test]
    fn test_default_payloads_report_all_required_fields() {
        let data = StepData::default();
        for step in Step::ALL {
            assert_eq!(data.missing_fields(step), step.required_fields());
        }
    }

    #[test]
    fn test_complete_vitals_pass() {
        let payload = StepPayload::Vitals(complete_vitals());
        assert!(payload.missing_fields().is_empty());
    }

    #[test]
    fn test_zero_heart_rate_is_missing() {
        let mut vitals = complete_vitals();
        vitals.heart_rate = Some(0);
        assert_eq!(StepPayload::Vitals(vitals).missing_fields(), vec!["heart_rate"]);
    }

    #[test]
    fn test_whitespace_assessment_is_missing() {
        let soap = SoapData {
            assessment: "   ".to_string(),
            plan: "Rest and fluids".to_string(),
            ..Default::default()
        };
        assert_eq!(StepPayload::Soap(soap).missing_fields(), vec!["assessment"]);
    }

    #[test]
    fn test_set_and_get_by_step() {
        let mut data = StepData::default();
        data.set(StepPayload::Vitals(complete_vitals()));
        assert_eq!(data.get(Step::Vitals), StepPayload::Vitals(complete_vitals()));
        assert_eq!(data.get(Step::Vitals).step(), Step::Vitals);
    }

    #[test]
    fn test_normalized_vitals_compute_bmi() {
        let mut vitals = complete_vitals();
        vitals.weight_kg = Some(70.0);
        vitals.height_cm = Some(175.0);
        match StepPayload::Vitals(vitals).normalized() {
            StepPayload::Vitals(v) => assert_eq!(v.bmi, Some(22.9)),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_step_data_normalized_recomputes_bmi() {
        let mut data = StepData::default();
        data.vitals = VitalsData {
            weight_kg: Some(70.0),
            height_cm: Some(175.0),
            bmi: Some(40.0),
            ..complete_vitals()
        };
        assert_eq!(data.normalized().vitals.bmi, Some(22.9));
    }

    #[test]
    fn test_data_value_is_untagged_record() {
        let payload = StepPayload::Intake(IntakeData {
            reason_for_visit: "Headache".to_string(),
            ..Default::default()
        });
        let value = payload.data_value().unwrap();
        assert_eq!(value["reason_for_visit"], "Headache");
        assert!(value.get("step").is_none());
    }

    #[test]
    fn test_step_data_uses_camel_case_keys() {
        let json = serde_json::to_value(StepData::default()).unwrap();
        assert!(json.get("chiefComplaint").is_some());
        assert!(json.get("specialtyExam").is_some());
        assert!(json["chiefComplaint"].get("chief_complaint").is_some());
    }

    proptest! {
        #[test]
        fn prop_blank_required_text_always_blocks(ws in "[ \t\n]{0,4}") {
            let intake = StepPayload::Intake(IntakeData { reason_for_visit: ws.clone(), ..Default::default() });
            prop_assert_eq!(intake.missing_fields(), vec!["reason_for_visit"]);

            let complaint = StepPayload::ChiefComplaint(ChiefComplaintData { chief_complaint: ws.clone(), ..Default::default() });
            prop_assert_eq!(complaint.missing_fields(), vec!["chief_complaint"]);

            let mut vitals = complete_vitals();
            vitals.blood_pressure = ws;
            prop_assert_eq!(StepPayload::Vitals(vitals).missing_fields(), vec!["blood_pressure"]);
        }

        #[test]
        fn prop_non_blank_required_text_passes(text in "[a-z]{1,12}", hr in 1u32..250, temp in 30.0f32..43.0) {
            let vitals = VitalsData {
                blood_pressure: text.clone(),
                heart_rate: Some(hr),
                temperature: Some(temp),
                ..Default::default()
            };
            prop_assert!(StepPayload::Vitals(vitals).missing_fields().is_empty());

            let soap = SoapData { assessment: text.clone(), plan: text, ..Default::default() };
            prop_assert!(StepPayload::Soap(soap).missing_fields().is_empty());
        }
    }
}
