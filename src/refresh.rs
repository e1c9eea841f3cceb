use serde::Serialize;
use serde_json::Value;

use crate::config::RegistrySettings;
use crate::domain::DescriptorId;
use crate::error::SyncError;
use crate::logging::TaskLog;
use crate::store::DescriptorCache;
use crate::task::{BackgroundJob, CancelToken, Outcome};
use crate::zenodo::{DescriptorRegistry, SearchQuery};

pub const REFRESH_TASK: &str = "update-pipeline-data";

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub query: String,
    pub max_results: usize,
    pub force: bool,
}

impl From<&RegistrySettings> for RefreshOptions {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            query: settings.query.clone(),
            max_results: settings.max_results,
            force: settings.force,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub cache_dir: String,
    pub descriptors: usize,
    pub summary_path: String,
    pub detailed_path: String,
}

pub struct RegistryRefresher<R: DescriptorRegistry> {
    registry: R,
    cache: DescriptorCache,
    options: RefreshOptions,
    log: TaskLog,
}

impl<R: DescriptorRegistry> RegistryRefresher<R> {
    pub fn new(registry: R, cache: DescriptorCache, options: RefreshOptions, log: TaskLog) -> Self {
        Self {
            registry,
            cache,
            options,
            log,
        }
    }

    pub fn run(&self, cancel: &CancelToken) -> Outcome<RefreshSummary> {
        self.log.in_scope(|| match self.refresh(cancel) {
            Ok(Some(summary)) => {
                tracing::info!(
                    "Refreshed {} descriptors into {}",
                    summary.descriptors,
                    summary.cache_dir
                );
                Outcome::Succeeded(summary)
            }
            Ok(None) => {
                tracing::warn!("Descriptor refresh cancelled; cache left unchanged.");
                Outcome::Cancelled
            }
            Err(err) => {
                tracing::error!("Descriptor refresh failed: {}", err.chain());
                Outcome::Failed(err)
            }
        })
    }

    fn refresh(&self, cancel: &CancelToken) -> Result<Option<RefreshSummary>, SyncError> {
        self.cache.ensure_root()?;

        if cancel.is_cancelled() {
            return Ok(None);
        }
        let query = SearchQuery {
            query: self.options.query.clone(),
            max_results: self.options.max_results,
            no_trunc: true,
        };
        let records = self.registry.search(&query)?;

        if cancel.is_cancelled() {
            return Ok(None);
        }
        let ids = records
            .iter()
            .map(|record| record.id.clone())
            .collect::<Vec<DescriptorId>>();
        self.registry
            .pull(&ids, self.cache.root(), self.options.force)?;

        let mut detailed: Vec<Value> = Vec::with_capacity(ids.len());
        for id in &ids {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            detailed.push(self.cache.read_descriptor(id)?);
        }

        let summary_path = self.cache.summary_path();
        let detailed_path = self.cache.detailed_path();
        DescriptorCache::write_json(&summary_path, &records)?;
        DescriptorCache::write_json(&detailed_path, &detailed)?;

        Ok(Some(RefreshSummary {
            cache_dir: self.cache.root().to_string(),
            descriptors: records.len(),
            summary_path: summary_path.to_string(),
            detailed_path: detailed_path.to_string(),
        }))
    }
}

impl<R: DescriptorRegistry + 'static> BackgroundJob for RegistryRefresher<R> {
    type Output = RefreshSummary;

    fn name(&self) -> &str {
        REFRESH_TASK
    }

    fn log(&self) -> &TaskLog {
        &self.log
    }

    fn run(&self, cancel: &CancelToken) -> Outcome<RefreshSummary> {
        RegistryRefresher::run(self, cancel)
    }
}
