//! LanceDB-backed assessment store.
//!
//! Tables are created on first use. Assessments are upserted with
//! `merge_insert` on `id`; diagnosis rows are append-only and deleted only to
//! undo a failed pipeline run.
use anyhow::{anyhow, Result as AnyResult};
use arrow_array::{
    Array, Float64Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray, UInt32Array,
    UInt8Array,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::future::Future;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Runtime;
use tracing::{debug, info};
use uuid::Uuid;

use triage_core::traits::AssessmentStore;
use triage_core::types::{AssessmentRecord, Diagnosis, DiagnosisRecord};
use triage_core::{Error, Result};

use crate::schema::{build_assessment_schema, build_diagnosis_schema, ASSESSMENTS_TABLE, DIAGNOSES_TABLE};

pub struct LanceStore {
    conn: Connection,
    rt: Runtime,
    /// Serializes the id check and the append of `insert_diagnoses`.
    diagnosis_writer: Mutex<()>,
}

impl LanceStore {
    pub fn open(uri: &str) -> Result<Self> {
        let rt = Runtime::new().map_err(Error::storage)?;
        let conn = rt
            .block_on(async { connect(uri).execute().await })
            .map_err(Error::storage)?;
        let store = Self { conn, rt, diagnosis_writer: Mutex::new(()) };
        store.block_on(async {
            ensure_table(&store.conn, ASSESSMENTS_TABLE, build_assessment_schema()).await?;
            ensure_table(&store.conn, DIAGNOSES_TABLE, build_diagnosis_schema()).await
        })?;
        info!(uri, "opened assessment store");
        Ok(store)
    }

    fn block_on<T>(&self, fut: impl Future<Output = AnyResult<T>>) -> Result<T> {
        self.rt.block_on(fut).map_err(|e| Error::Storage(format!("{e:#}")))
    }

    /// Insert raw rows as-is; lets callers load data written by other tools.
    pub fn insert_raw_diagnoses(&self, records: &[DiagnosisRecord]) -> Result<()> {
        self.block_on(append_diagnoses(&self.conn, records))
    }
}

async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> AnyResult<()> {
    let names = conn.table_names().execute().await?;
    if names.contains(&name.to_string()) {
        return Ok(());
    }
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> AnyResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("{name} column missing"))
}

fn opt_str(col: &StringArray, i: usize) -> Option<String> {
    (!col.is_null(i)).then(|| col.value(i).to_string())
}

fn timestamp_at(batch: &RecordBatch, name: &str, i: usize) -> AnyResult<DateTime<Utc>> {
    let col = batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
        .ok_or_else(|| anyhow!("{name} column missing"))?;
    DateTime::from_timestamp_millis(col.value(i)).ok_or_else(|| anyhow!("{name} out of range"))
}

fn assessment_batch(r: &AssessmentRecord) -> AnyResult<RecordBatch> {
    Ok(RecordBatch::try_new(
        build_assessment_schema(),
        vec![
            Arc::new(StringArray::from(vec![r.id.to_string()])),
            Arc::new(StringArray::from(vec![r.symptom_description.clone()])),
            Arc::new(StringArray::from(vec![r.image_ref.clone()])),
            Arc::new(StringArray::from(vec![r.patient_name.clone()])),
            Arc::new(UInt32Array::from(vec![r.patient_age])),
            Arc::new(StringArray::from(vec![r.predicted_label.clone()])),
            Arc::new(StringArray::from(vec![r.label_description.clone()])),
            Arc::new(UInt8Array::from(vec![r.severity_score])),
            Arc::new(StringArray::from(vec![r.severity_reason.clone()])),
            Arc::new(StringArray::from(vec![r.recommendation_status.clone()])),
            Arc::new(StringArray::from(vec![r.recommendation_text.clone()])),
            Arc::new(TimestampMillisecondArray::from(vec![r.created_at.timestamp_millis()])),
            Arc::new(TimestampMillisecondArray::from(vec![r.updated_at.timestamp_millis()])),
        ],
    )?)
}

fn read_assessment(batch: &RecordBatch, i: usize) -> AnyResult<AssessmentRecord> {
    let id = string_col(batch, "id")?.value(i);
    let age = batch
        .column_by_name("patient_age")
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
        .ok_or_else(|| anyhow!("patient_age column missing"))?;
    let severity = batch
        .column_by_name("severity_score")
        .and_then(|c| c.as_any().downcast_ref::<UInt8Array>())
        .ok_or_else(|| anyhow!("severity_score column missing"))?;
    Ok(AssessmentRecord {
        id: Uuid::parse_str(id)?,
        symptom_description: string_col(batch, "symptom_description")?.value(i).to_string(),
        image_ref: opt_str(string_col(batch, "image_ref")?, i),
        patient_name: opt_str(string_col(batch, "patient_name")?, i),
        patient_age: (!age.is_null(i)).then(|| age.value(i)),
        predicted_label: opt_str(string_col(batch, "predicted_label")?, i),
        label_description: opt_str(string_col(batch, "label_description")?, i),
        severity_score: (!severity.is_null(i)).then(|| severity.value(i)),
        severity_reason: opt_str(string_col(batch, "severity_reason")?, i),
        recommendation_status: opt_str(string_col(batch, "recommendation_status")?, i),
        recommendation_text: opt_str(string_col(batch, "recommendation_text")?, i),
        created_at: timestamp_at(batch, "created_at", i)?,
        updated_at: timestamp_at(batch, "updated_at", i)?,
    })
}

fn strings(records: &[DiagnosisRecord], f: impl Fn(&DiagnosisRecord) -> Option<String>) -> StringArray {
    StringArray::from(records.iter().map(f).collect::<Vec<_>>())
}

fn diagnosis_batch(records: &[DiagnosisRecord]) -> AnyResult<RecordBatch> {
    Ok(RecordBatch::try_new(
        build_diagnosis_schema(),
        vec![
            Arc::new(strings(records, |r| r.id.clone())),
            Arc::new(strings(records, |r| r.assessment_id.clone())),
            Arc::new(strings(records, |r| r.name.clone())),
            Arc::new(Float64Array::from(records.iter().map(|r| r.confidence).collect::<Vec<_>>())),
            Arc::new(strings(records, |r| r.description.clone())),
            Arc::new(strings(records, |r| r.created_at.clone())),
        ],
    )?)
}

fn read_diagnosis(batch: &RecordBatch, i: usize) -> AnyResult<DiagnosisRecord> {
    let confidence = batch
        .column_by_name("confidence")
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| anyhow!("confidence column missing"))?;
    Ok(DiagnosisRecord {
        id: opt_str(string_col(batch, "id")?, i),
        assessment_id: opt_str(string_col(batch, "assessment_id")?, i),
        name: opt_str(string_col(batch, "name")?, i),
        confidence: (!confidence.is_null(i)).then(|| confidence.value(i)),
        description: opt_str(string_col(batch, "description")?, i),
        created_at: opt_str(string_col(batch, "created_at")?, i),
    })
}

fn id_list(ids: &[Uuid]) -> String {
    ids.iter().map(|id| quote(&id.to_string())).collect::<Vec<_>>().join(",")
}

/// Ids among `ids` that already have a diagnosis row.
async fn stored_diagnosis_ids(conn: &Connection, ids: &[Uuid]) -> AnyResult<Vec<String>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let t = conn.open_table(DIAGNOSES_TABLE).execute().await?;
    let mut stream = t
        .query()
        .only_if(format!("id IN ({})", id_list(ids)))
        .execute()
        .await?;
    let mut out = Vec::new();
    while let Some(batch) = stream.try_next().await? {
        let col = string_col(&batch, "id")?;
        out.extend((0..batch.num_rows()).filter_map(|i| opt_str(col, i)));
    }
    Ok(out)
}

async fn append_diagnoses(conn: &Connection, records: &[DiagnosisRecord]) -> AnyResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    let t = conn.open_table(DIAGNOSES_TABLE).execute().await?;
    let batch = diagnosis_batch(records)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), build_diagnosis_schema()));
    t.add(reader).execute().await?;
    Ok(())
}

impl AssessmentStore for LanceStore {
    fn get_assessment(&self, id: Uuid) -> Result<Option<AssessmentRecord>> {
        self.block_on(async {
            let t = self.conn.open_table(ASSESSMENTS_TABLE).execute().await?;
            let mut stream = t
                .query()
                .only_if(format!("id = {}", quote(&id.to_string())))
                .execute()
                .await?;
            while let Some(batch) = stream.try_next().await? {
                if batch.num_rows() > 0 {
                    return Ok(Some(read_assessment(&batch, 0)?));
                }
            }
            Ok(None)
        })
    }

    fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<()> {
        self.block_on(async {
            let t = self.conn.open_table(ASSESSMENTS_TABLE).execute().await?;
            let batch = assessment_batch(record)?;
            let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), build_assessment_schema()));
            let mut mi = t.merge_insert(&["id"]);
            mi.when_matched_update_all(None).when_not_matched_insert_all();
            let _ = mi.execute(reader).await?;
            debug!(id = %record.id, "upserted assessment");
            Ok(())
        })
    }

    fn list_diagnoses(&self, assessment_id: Uuid) -> Result<Vec<DiagnosisRecord>> {
        self.block_on(async {
            let t = self.conn.open_table(DIAGNOSES_TABLE).execute().await?;
            let mut stream = t
                .query()
                .only_if(format!("assessment_id = {}", quote(&assessment_id.to_string())))
                .execute()
                .await?;
            let mut out = Vec::new();
            while let Some(batch) = stream.try_next().await? {
                for i in 0..batch.num_rows() {
                    out.push(read_diagnosis(&batch, i)?);
                }
            }
            Ok(out)
        })
    }

    fn insert_diagnoses(&self, diagnoses: &[Diagnosis]) -> Result<()> {
        let ids: Vec<Uuid> = diagnoses.iter().map(|d| d.id).collect();
        let mut batch_ids = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !batch_ids.insert(**id)) {
            return Err(Error::Storage(format!("diagnosis {dup} appears twice in one insert")));
        }

        let _writer = self.diagnosis_writer.lock().unwrap_or_else(PoisonError::into_inner);
        let clash = self.block_on(stored_diagnosis_ids(&self.conn, &ids))?;
        if let Some(id) = clash.first() {
            return Err(Error::Storage(format!("diagnosis {id} already exists")));
        }
        let records: Vec<DiagnosisRecord> = diagnoses.iter().map(DiagnosisRecord::from).collect();
        self.block_on(append_diagnoses(&self.conn, &records))
    }

    fn delete_diagnoses(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let list = id_list(ids);
        self.block_on(async {
            let t = self.conn.open_table(DIAGNOSES_TABLE).execute().await?;
            t.delete(&format!("id IN ({list})")).await?;
            Ok(())
        })
    }
}
