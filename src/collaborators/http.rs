//! JSON-over-HTTP clients for the retrieval, standards and persistence services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{
    ChapterRecord, ComplianceReport, JobRecord, LogEntry, PersistenceApi, RetrievalService,
    SearchHit, SearchQuery, Section, StandardsLookup,
};
use crate::error::AttemptError;

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// 429 and 5xx are transport failures, any other non-success is a rejection.
async fn check(response: Response) -> Result<Response, AttemptError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("status {}: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(AttemptError::Transport(message))
    } else {
        Err(AttemptError::Rejected(message))
    }
}

pub struct HttpRetrieval {
    client: Client,
    base_url: String,
}

impl HttpRetrieval {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[async_trait]
impl RetrievalService for HttpRetrieval {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, AttemptError> {
        let response = self
            .client
            .post(join(&self.base_url, "search"))
            .json(query)
            .send()
            .await?;
        let body: SearchResponse = check(response).await?.json().await?;
        Ok(body.results)
    }
}

pub struct HttpStandards {
    client: Client,
    base_url: String,
}

impl HttpStandards {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StandardsLookup for HttpStandards {
    async fn get_section(&self, domain_id: &str) -> Result<Option<Section>, AttemptError> {
        let response = self
            .client
            .get(join(&self.base_url, &format!("sections/{domain_id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let section = check(response).await?.json().await?;
        Ok(Some(section))
    }

    async fn validate(&self, content: &str) -> Result<ComplianceReport, AttemptError> {
        let response = self
            .client
            .post(join(&self.base_url, "validate"))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

pub struct HttpPersistence {
    client: Client,
    base_url: String,
}

impl HttpPersistence {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            base_url: base_url.into(),
        }
    }

    async fn send_json<T: serde::Serialize + Sync>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &T,
    ) -> Result<(), AttemptError> {
        let response = self
            .client
            .request(method, join(&self.base_url, path))
            .json(body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceApi for HttpPersistence {
    async fn create_job(&self, job: &JobRecord) -> Result<(), AttemptError> {
        self.send_json(reqwest::Method::POST, "jobs", job).await
    }

    async fn update_job(&self, job: &JobRecord) -> Result<(), AttemptError> {
        self.send_json(reqwest::Method::PUT, &format!("jobs/{}", job.id), job)
            .await
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, AttemptError> {
        let response = self
            .client
            .get(join(&self.base_url, &format!("jobs/{id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    async fn create_chapter(&self, chapter: &ChapterRecord) -> Result<(), AttemptError> {
        self.send_json(reqwest::Method::POST, "chapters", chapter).await
    }

    async fn update_chapter(&self, chapter: &ChapterRecord) -> Result<(), AttemptError> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("chapters/{}", chapter.id),
            chapter,
        )
        .await
    }

    async fn log(&self, entry: &LogEntry) -> Result<(), AttemptError> {
        self.send_json(reqwest::Method::POST, "logs", entry).await
    }
}
