use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    ChapterRecord, ComplianceReport, JobRecord, LogEntry, PersistenceApi, RetrievalService,
    SearchHit, SearchQuery, Section, StandardsLookup,
};
use crate::error::AttemptError;

/// Retrieval with an empty knowledge base.
pub struct NullRetrieval;

#[async_trait]
impl RetrievalService for NullRetrieval {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchHit>, AttemptError> {
        Ok(Vec::new())
    }
}

/// Standards service that knows no sections and checks nothing.
pub struct NullStandards;

#[async_trait]
impl StandardsLookup for NullStandards {
    async fn get_section(&self, _domain_id: &str) -> Result<Option<Section>, AttemptError> {
        Ok(None)
    }

    async fn validate(&self, _content: &str) -> Result<ComplianceReport, AttemptError> {
        Ok(ComplianceReport {
            status: "skipped".into(),
            findings: Vec::new(),
            score: 100.0,
        })
    }
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<String, JobRecord>,
    chapters: HashMap<String, ChapterRecord>,
    logs: Vec<LogEntry>,
}

/// Process-local persistence, used when no persistence service is configured.
#[derive(Default)]
pub struct MemoryPersistence {
    tables: Mutex<Tables>,
}

impl MemoryPersistence {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.tables().logs.clone()
    }

    pub fn chapter(&self, id: &str) -> Option<ChapterRecord> {
        self.tables().chapters.get(id).cloned()
    }

    pub fn chapter_count(&self) -> usize {
        self.tables().chapters.len()
    }
}

#[async_trait]
impl PersistenceApi for MemoryPersistence {
    async fn create_job(&self, job: &JobRecord) -> Result<(), AttemptError> {
        self.tables().jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &JobRecord) -> Result<(), AttemptError> {
        let mut tables = self.tables();
        match tables.jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(AttemptError::Rejected(format!("job {} not found", job.id))),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, AttemptError> {
        Ok(self.tables().jobs.get(id).cloned())
    }

    async fn create_chapter(&self, chapter: &ChapterRecord) -> Result<(), AttemptError> {
        self.tables()
            .chapters
            .insert(chapter.id.clone(), chapter.clone());
        Ok(())
    }

    async fn update_chapter(&self, chapter: &ChapterRecord) -> Result<(), AttemptError> {
        let mut tables = self.tables();
        match tables.chapters.get_mut(&chapter.id) {
            Some(existing) => {
                *existing = chapter.clone();
                Ok(())
            }
            None => Err(AttemptError::Rejected(format!(
                "chapter {} not found",
                chapter.id
            ))),
        }
    }

    async fn log(&self, entry: &LogEntry) -> Result<(), AttemptError> {
        self.tables().logs.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use chrono::Utc;

    fn record(id: &str, status: JobStatus) -> JobRecord {
        JobRecord {
            id: id.into(),
            title: "Rust in Practice".into(),
            domain_id: "CS-200".into(),
            status,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn memory_persistence_updates_existing_job() {
        let store = MemoryPersistence::default();
        store.create_job(&record("j1", JobStatus::Pending)).await.unwrap();
        store.update_job(&record("j1", JobStatus::Running)).await.unwrap();

        let loaded = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(store.get_job("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn updating_unknown_job_is_rejected() {
        let store = MemoryPersistence::default();
        let err = store
            .update_job(&record("ghost", JobStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, AttemptError::Rejected(_)));
    }

    #[tokio::test]
    async fn null_collaborators_return_empty_results() {
        assert!(NullRetrieval.search(&SearchQuery::default()).await.unwrap().is_empty());
        assert_eq!(NullStandards.get_section("any").await.unwrap(), None);
        assert_eq!(NullStandards.validate("text").await.unwrap().status, "skipped");
    }
}
