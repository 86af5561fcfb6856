use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use triage_core::traits::AssessmentStore;
use triage_core::types::{AssessmentRecord, Diagnosis, DiagnosisRecord};
use triage_core::{Error, Result};

#[derive(Default)]
struct Tables {
    assessments: HashMap<Uuid, AssessmentRecord>,
    /// Insertion order is preserved so reads are deterministic.
    diagnoses: Vec<DiagnosisRecord>,
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row without validation, as an external writer might.
    pub fn insert_raw_diagnosis(&self, record: DiagnosisRecord) {
        self.lock().diagnoses.push(record);
    }

    pub fn diagnosis_count(&self) -> usize {
        self.lock().diagnoses.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AssessmentStore for MemoryStore {
    fn get_assessment(&self, id: Uuid) -> Result<Option<AssessmentRecord>> {
        Ok(self.lock().assessments.get(&id).cloned())
    }

    fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<()> {
        self.lock().assessments.insert(record.id, record.clone());
        Ok(())
    }

    fn list_diagnoses(&self, assessment_id: Uuid) -> Result<Vec<DiagnosisRecord>> {
        let key = assessment_id.to_string();
        Ok(self
            .lock()
            .diagnoses
            .iter()
            .filter(|d| d.assessment_id.as_deref() == Some(key.as_str()))
            .cloned()
            .collect())
    }

    fn insert_diagnoses(&self, diagnoses: &[Diagnosis]) -> Result<()> {
        let mut batch_ids = HashSet::with_capacity(diagnoses.len());
        if let Some(dup) = diagnoses.iter().find(|d| !batch_ids.insert(d.id)) {
            return Err(Error::Storage(format!("diagnosis {} appears twice in one insert", dup.id)));
        }
        let mut tables = self.lock();
        for d in diagnoses {
            let id = d.id.to_string();
            if tables.diagnoses.iter().any(|r| r.id.as_deref() == Some(id.as_str())) {
                return Err(Error::Storage(format!("diagnosis {id} already exists")));
            }
        }
        tables.diagnoses.extend(diagnoses.iter().map(DiagnosisRecord::from));
        Ok(())
    }

    fn delete_diagnoses(&self, ids: &[Uuid]) -> Result<()> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.lock()
            .diagnoses
            .retain(|r| !r.id.as_ref().is_some_and(|id| ids.contains(id)));
        Ok(())
    }
}
