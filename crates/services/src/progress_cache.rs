//! Time-boxed memoization of per-user course progress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use course_core::model::{CourseId, CourseProgress, UserId};
use storage::StorageError;
use storage::local::{LocalStore, ProgressSnapshot, load_snapshot, save_snapshot};
use storage::repository::{CourseRepository, EnrollmentRepository};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::config::DEFAULT_FRESHNESS_SECS;
use crate::error::ProgressError;
use crate::retry::{RetryPolicy, retry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    user: UserId,
    course: CourseId,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CourseProgress,
    stored_at: DateTime<Utc>,
}

/// Options for [`ProgressCache::get_progress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the cache and always ask the remote store.
    pub force_refresh: bool,
}

impl FetchOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

/// Serves enrollment progress from memory while it is younger than the
/// freshness window, and from the remote store otherwise.
///
/// Entries are only written after a remote call succeeds, so a failed or
/// abandoned fetch leaves the previous value in place. Two callers missing
/// at the same time both fetch; the later write wins. Each write also drops
/// every expired entry, so memory stays bounded by the pairs read within
/// one freshness window.
pub struct ProgressCache {
    clock: Clock,
    freshness: Duration,
    retry: RetryPolicy,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    local: Option<Arc<dyn LocalStore>>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ProgressCache {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
    ) -> Self {
        Self {
            clock,
            freshness: Duration::from_secs(DEFAULT_FRESHNESS_SECS),
            retry: RetryPolicy::default(),
            courses,
            enrollments,
            local: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Mirrors every stored value into `local` so it survives restarts.
    #[must_use]
    pub fn with_local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    #[must_use]
    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    //
    // ─── READS ────────────────────────────────────────────────────────────────
    //

    /// Progress of `user` in `course`.
    ///
    /// A user who never enrolled gets [`CourseProgress::not_enrolled`].
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotAuthenticated` when `user` is `None`, without
    /// contacting the remote store.
    /// Returns `ProgressError::Transport` if the remote fetch fails; the cache
    /// is left unchanged.
    pub async fn get_progress(
        &self,
        user: Option<UserId>,
        course: CourseId,
        options: FetchOptions,
    ) -> Result<CourseProgress, ProgressError> {
        let user = user.ok_or(ProgressError::NotAuthenticated)?;
        let key = CacheKey { user, course };

        if !options.force_refresh {
            if let Some(value) = self.fresh_entry(key) {
                debug!(%user, %course, "progress cache hit");
                return Ok(value);
            }
        }

        debug!(%user, %course, forced = options.force_refresh, "fetching progress");
        let fetched = retry("fetch_progress", self.retry, || {
            self.enrollments.fetch_progress(user, course)
        })
        .await
        .map_err(|err| {
            warn!(%user, %course, error = %err, "progress fetch failed");
            ProgressError::Transport(err)
        })?;

        let value = fetched.unwrap_or_else(CourseProgress::not_enrolled);
        self.store(key, value.clone()).await;
        Ok(value)
    }

    /// The most recent value known for `user` in `course`, however old.
    ///
    /// Falls back to the local snapshot when nothing is cached in memory,
    /// which includes entries already pruned after expiry.
    /// Used to keep prior state visible after a transport error.
    pub async fn last_known(&self, user: UserId, course: CourseId) -> Option<CourseProgress> {
        let cached = self
            .entries()
            .get(&CacheKey { user, course })
            .map(|entry| entry.value.clone());
        if cached.is_some() {
            return cached;
        }

        let local = self.local.as_ref()?;
        match load_snapshot(local.as_ref(), user, course).await {
            Ok(snapshot) => snapshot.and_then(|s| s.into_progress().ok()),
            Err(err) => {
                warn!(%user, %course, error = %err, "could not read progress snapshot");
                None
            }
        }
    }

    //
    // ─── WRITES ───────────────────────────────────────────────────────────────
    //

    /// Enrolls `user` in `course` and primes the cache with a fresh
    /// enrollment.
    ///
    /// Returns `Ok(false)` without touching the cache when either argument
    /// is missing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if the course does not exist.
    /// Returns `ProgressError::Transport` if a remote call fails.
    pub async fn enroll(
        &self,
        user: Option<UserId>,
        course: Option<CourseId>,
    ) -> Result<bool, ProgressError> {
        let (Some(user), Some(course)) = (user, course) else {
            debug!("enroll skipped: missing user or course");
            return Ok(false);
        };

        let exists = retry("get_course", self.retry, || self.courses.get_course(course))
            .await
            .map_err(ProgressError::Transport)?;
        if exists.is_none() {
            return Err(ProgressError::NotFound(course));
        }

        let now = self.clock.now();
        retry("enroll", self.retry, || {
            self.enrollments.enroll(user, course, now)
        })
        .await
        .map_err(ProgressError::Transport)?;

        info!(%user, %course, "enrolled");
        self.store(CacheKey { user, course }, CourseProgress::just_enrolled(now))
            .await;
        Ok(true)
    }

    /// Writes a new completion percentage, enrolling the user first when no
    /// enrollment exists, and refreshes the cache entry.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Invalid` if `progress` exceeds 100.
    /// Returns `ProgressError::Transport` if a remote call fails.
    pub async fn record_progress(
        &self,
        user: UserId,
        course: CourseId,
        progress: u8,
    ) -> Result<CourseProgress, ProgressError> {
        let now = self.clock.now();
        let value = CourseProgress::just_enrolled(now)
            .with_progress(progress, now)
            .map_err(ProgressError::Invalid)?;

        let write = || self.enrollments.set_progress(user, course, progress, now);
        match retry("set_progress", self.retry, write).await {
            Ok(()) => {}
            Err(StorageError::NotFound) => {
                debug!(%user, %course, "no enrollment yet, enrolling before progress write");
                retry("enroll", self.retry, || {
                    self.enrollments.enroll(user, course, now)
                })
                .await
                .map_err(ProgressError::Transport)?;
                retry("set_progress", self.retry, write)
                    .await
                    .map_err(ProgressError::Transport)?;
            }
            Err(err) => return Err(ProgressError::Transport(err)),
        }

        self.store(CacheKey { user, course }, value.clone()).await;
        Ok(value)
    }

    /// Forgets the cached value for one pair. The local snapshot is kept.
    pub fn invalidate(&self, user: UserId, course: CourseId) {
        self.entries().remove(&CacheKey { user, course });
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    //
    // ─── INTERNALS ────────────────────────────────────────────────────────────
    //

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        // An entry stamped in the future (clock moved back) counts as fresh.
        (now - entry.stored_at)
            .to_std()
            .map_or(true, |age| age < self.freshness)
    }

    fn fresh_entry(&self, key: CacheKey) -> Option<CourseProgress> {
        let now = self.clock.now();
        let entries = self.entries();
        let entry = entries.get(&key)?;
        self.is_fresh(entry, now).then(|| entry.value.clone())
    }

    async fn store(&self, key: CacheKey, value: CourseProgress) {
        let stored_at = self.clock.now();
        {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|_, entry| self.is_fresh(entry, stored_at));
            let pruned = before - entries.len();
            if pruned > 0 {
                debug!(pruned, "dropped expired progress entries");
            }
            entries.insert(
                key,
                CacheEntry {
                    value: value.clone(),
                    stored_at,
                },
            );
        }

        if let Some(local) = &self.local {
            let snapshot = ProgressSnapshot::from_progress(&value, stored_at);
            if let Err(err) = save_snapshot(local.as_ref(), key.user, key.course, &snapshot).await {
                warn!(
                    user = %key.user,
                    course = %key.course,
                    error = %err,
                    "could not save progress snapshot"
                );
            }
        }
    }
}
