use std::sync::Arc;

use storage::local::{LocalStore, last_user, remember_user};
use storage::repository::Storage;
use storage::table::ResourceStore;

use course_core::model::UserId;

use crate::Clock;
use crate::catalog::CatalogService;
use crate::config::SyncConfig;
use crate::error::AppServicesError;
use crate::progress_cache::ProgressCache;
use crate::realtime::RealtimeListener;
use crate::test_service::TestService;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    store: Arc<dyn ResourceStore>,
    local: Arc<dyn LocalStore>,
    progress: Arc<ProgressCache>,
    realtime: Arc<RealtimeListener>,
    catalog: Arc<CatalogService>,
    tests: Arc<TestService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage at `config.db_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(config: &SyncConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        Ok(Self::from_storage(storage, config, clock))
    }

    /// Wire services over an existing storage bundle.
    #[must_use]
    pub fn from_storage(storage: Storage, config: &SyncConfig, clock: Clock) -> Self {
        let progress = Arc::new(
            ProgressCache::new(
                clock.clone(),
                Arc::clone(&storage.courses),
                Arc::clone(&storage.enrollments),
            )
            .with_freshness(config.freshness)
            .with_retry(config.retry_policy())
            .with_local_store(Arc::clone(&storage.local)),
        );
        let realtime = Arc::new(RealtimeListener::new(Arc::clone(&storage.store)));
        let catalog = Arc::new(CatalogService::new(
            Arc::clone(&storage.courses),
            Arc::clone(&progress),
        ));
        let tests = Arc::new(TestService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.assessments),
            Arc::clone(&progress),
        ));

        Self {
            store: storage.store,
            local: storage.local,
            progress,
            realtime,
            catalog,
            tests,
        }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressCache> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn realtime(&self) -> Arc<RealtimeListener> {
        Arc::clone(&self.realtime)
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogService> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn tests(&self) -> Arc<TestService> {
        Arc::clone(&self.tests)
    }

    /// Raw table access, used for seeding and diagnostics.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ResourceStore> {
        Arc::clone(&self.store)
    }

    /// Resolves the acting user: `explicit` wins and is remembered, otherwise
    /// the last remembered user is used.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Storage` if the local store fails.
    pub async fn session_user(
        &self,
        explicit: Option<UserId>,
    ) -> Result<Option<UserId>, AppServicesError> {
        if let Some(user) = explicit {
            remember_user(self.local.as_ref(), user).await?;
            return Ok(Some(user));
        }
        Ok(last_user(self.local.as_ref()).await?)
    }
}
