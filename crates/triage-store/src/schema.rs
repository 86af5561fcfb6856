use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const ASSESSMENTS_TABLE: &str = "assessments";
pub const DIAGNOSES_TABLE: &str = "possible_diagnoses";

pub fn build_assessment_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("symptom_description", DataType::Utf8, false),
        Field::new("image_ref", DataType::Utf8, true),
        Field::new("patient_name", DataType::Utf8, true),
        Field::new("patient_age", DataType::UInt32, true),
        Field::new("predicted_label", DataType::Utf8, true),
        Field::new("label_description", DataType::Utf8, true),
        Field::new("severity_score", DataType::UInt8, true),
        Field::new("severity_reason", DataType::Utf8, true),
        Field::new("recommendation_status", DataType::Utf8, true),
        Field::new("recommendation_text", DataType::Utf8, true),
        Field::new("created_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

/// Every column is nullable: rows are validated when read back, not on write.
pub fn build_diagnosis_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, true),
        Field::new("assessment_id", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("confidence", DataType::Float64, true),
        Field::new("description", DataType::Utf8, true),
        Field::new("created_at", DataType::Utf8, true),
    ]))
}
