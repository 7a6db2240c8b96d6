#![forbid(unsafe_code)]

pub mod app_services;
pub mod catalog;
pub mod config;
pub mod error;
pub mod progress_cache;
pub mod realtime;
pub mod retry;
pub mod test_service;

pub use course_core::Clock;

pub use app_services::AppServices;
pub use catalog::{CatalogService, EnrolledCourse};
pub use config::SyncConfig;
pub use error::{AppServicesError, CatalogError, ProgressError, RealtimeError, TestServiceError};
pub use progress_cache::{FetchOptions, ProgressCache};
pub use realtime::{RealtimeListener, Subscription, SubscriptionStatus};
pub use retry::RetryPolicy;
pub use test_service::{TestService, TestSubmission};
