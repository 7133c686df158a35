//! Concurrent resource fetcher.
//!
//! One task per distinct URL not yet mapped, all awaited together. Each task
//! asks for the size of likely images up front, retries transient failures,
//! resolves its path once the response is in and writes the file.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::http::{HttpClient, HttpResponse};
use crate::reference::{ResourceUrl, SkipReason};
use crate::resolver::{ResolveRequest, Resolution, ResourceRecord, Resolver};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::snapshot::ResourceType;
use crate::store::{MappingStore, ResourceMapping};

/// Terminal outcome of a download job.
#[derive(Debug)]
pub enum JobOutcome {
    Saved(ResourceRecord),
    NotFound,
    Failed(FetchError),
    Skipped(SkipReason),
}

#[derive(Debug)]
pub struct DownloadJob {
    pub url: ResourceUrl,
    pub attempts_remaining: u32,
    pub outcome: JobOutcome,
}

/// Result of one `fetch_all` call.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub jobs: Vec<DownloadJob>,
    /// Mapping after every job reached its outcome.
    pub mapping: ResourceMapping,
    /// URLs already mapped or in flight when the call started.
    pub already_mapped: usize,
}

impl FetchReport {
    pub fn saved(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Saved(_)))
    }

    pub fn not_found(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::NotFound))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.jobs.iter().filter(|j| pred(&j.outcome)).count()
    }
}

pub struct Fetcher {
    client: HttpClient,
    resolver: Resolver,
    store: Arc<MappingStore>,
    retry: RetryPolicy,
    root: PathBuf,
}

impl Fetcher {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<MappingStore>,
        client: HttpClient,
        resolver: Resolver,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            resolver,
            store,
            retry,
            root: root.into(),
        }
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    /// Download every URL not already mapped and return once all tasks have
    /// reached a terminal outcome.
    pub async fn fetch_all<I>(&self, urls: I, hints: &HashMap<ResourceUrl, ResourceType>) -> FetchReport
    where
        I: IntoIterator<Item = ResourceUrl>,
    {
        let distinct: HashSet<ResourceUrl> = urls.into_iter().collect();
        let mut already_mapped = 0;
        let mut jobs = Vec::new();
        let mut tasks = Vec::new();

        for url in distinct {
            if !url.is_fetchable() {
                let reason = match url.scheme() {
                    "data" => SkipReason::DataUri,
                    other => SkipReason::UnsupportedScheme(other.to_string()),
                };
                jobs.push(DownloadJob {
                    url,
                    attempts_remaining: self.retry.max_attempts,
                    outcome: JobOutcome::Skipped(reason),
                });
                continue;
            }
            if !self.store.claim(&url) {
                already_mapped += 1;
                continue;
            }
            let hint = hints.get(&url).copied();
            tasks.push(self.run_job(url, hint));
        }

        jobs.extend(join_all(tasks).await);

        let report = FetchReport {
            jobs,
            mapping: self.store.snapshot(),
            already_mapped,
        };
        info!(
            saved = report.saved(),
            not_found = report.not_found(),
            failed = report.failed(),
            already_mapped,
            "fetch complete"
        );
        report
    }

    async fn run_job(&self, url: ResourceUrl, hint: Option<ResourceType>) -> DownloadJob {
        let max = self.retry.max_attempts;
        let mut attempt = 1u32;
        let reported_len = self.resolver.reported_size(&url, hint).await;

        let outcome = loop {
            match self.attempt(&url).await {
                Ok(resp) => break self.persist(&url, resp, hint, reported_len).await,
                Err(FetchError::NotFound) => {
                    warn!(url = %url, "resource not found");
                    break JobOutcome::NotFound;
                }
                Err(e) => match self.retry.decide(attempt, e.kind()) {
                    RetryDecision::RetryAfter(delay) => {
                        debug!(url = %url, attempt, error = %e, "retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::NoRetry => {
                        warn!(url = %url, attempt, error = %e, "giving up on resource");
                        break JobOutcome::Failed(e);
                    }
                },
            }
        };

        self.store.finish(&url);
        DownloadJob {
            url,
            attempts_remaining: max.saturating_sub(attempt),
            outcome,
        }
    }

    /// One GET, judged by status and body.
    async fn attempt(&self, url: &ResourceUrl) -> Result<HttpResponse, FetchError> {
        let resp = self.client.get(url.as_str()).await?;
        match resp.status {
            200..=299 if resp.body.is_empty() => Err(FetchError::EmptyBody),
            200..=299 => Ok(resp),
            404 => Err(FetchError::NotFound),
            status => Err(FetchError::Status(status)),
        }
    }

    async fn persist(
        &self,
        url: &ResourceUrl,
        resp: HttpResponse,
        hint: Option<ResourceType>,
        reported_len: Option<u64>,
    ) -> JobOutcome {
        let request = ResolveRequest {
            url,
            content_type: resp.content_type.as_deref(),
            hint,
            reported_len,
            body_len: Some(resp.body.len() as u64),
        };
        let record = match self.resolver.resolve(request) {
            Resolution::Record(record) => record,
            Resolution::Skip(reason) => return JobOutcome::Skipped(reason),
        };

        let full = self.root.join(&record.local_path);
        let written = async {
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, &resp.body).await
        }
        .await;

        if let Err(e) = written {
            warn!(url = %url, path = %record.local_path, error = %e, "failed to write resource");
            self.resolver.release(&record);
            return JobOutcome::Failed(FetchError::Storage(e));
        }

        self.store.put(url.clone(), record.local_path.clone());
        debug!(url = %url, path = %record.local_path, bytes = resp.body.len(), "saved");
        JobOutcome::Saved(record)
    }
}
