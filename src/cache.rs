use anyhow::Context as _;

use crate::formats::{StageKind, StageResult, StageResults};
use crate::store::{LocalStore, WORKFLOW_RESULTS_KEY};

/// Latest result per stage kind, last write wins. Absent means nothing has
/// been generated yet.
pub trait ResultCache: Send + Sync {
    fn save(&self, result: &StageResult) -> anyhow::Result<()>;
    fn load(&self, kind: StageKind) -> anyhow::Result<Option<StageResult>>;
    fn save_bundle(&self, results: &StageResults) -> anyhow::Result<()>;
    fn load_bundle(&self) -> anyhow::Result<Option<StageResults>>;
    fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsResultCache {
    store: LocalStore,
}

impl LocalFsResultCache {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

impl ResultCache for LocalFsResultCache {
    fn save(&self, result: &StageResult) -> anyhow::Result<()> {
        let kind = result.kind();
        self.store
            .write(kind.cache_key(), result)
            .with_context(|| format!("save {kind} result"))
    }

    fn load(&self, kind: StageKind) -> anyhow::Result<Option<StageResult>> {
        let Some(result) = self
            .store
            .read::<StageResult>(kind.cache_key())
            .with_context(|| format!("load {kind} result"))?
        else {
            return Ok(None);
        };
        if result.kind() != kind {
            anyhow::bail!(
                "cached entry {} holds a {} result",
                kind.cache_key(),
                result.kind()
            );
        }
        Ok(Some(result))
    }

    fn save_bundle(&self, results: &StageResults) -> anyhow::Result<()> {
        self.store
            .write(WORKFLOW_RESULTS_KEY, results)
            .context("save workflow results")
    }

    fn load_bundle(&self) -> anyhow::Result<Option<StageResults>> {
        self.store
            .read(WORKFLOW_RESULTS_KEY)
            .context("load workflow results")
    }

    fn clear(&self) -> anyhow::Result<()> {
        for kind in StageKind::ALL {
            self.store.remove(kind.cache_key())?;
        }
        self.store.remove(WORKFLOW_RESULTS_KEY)
    }
}

impl StageResults {
    /// Rebuilds accumulated results from the cache; per-stage entries win
    /// over the bundle.
    pub fn rehydrate(cache: &dyn ResultCache) -> anyhow::Result<Self> {
        let mut results = cache.load_bundle()?.unwrap_or_default();
        for kind in StageKind::ALL {
            if let Some(result) = cache.load(kind)? {
                results.insert(result);
            }
        }
        Ok(results)
    }
}
