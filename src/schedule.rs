//! Job triggering. The core never parses cron expressions: serverless
//! deployments expose [`JobRegistry::run`] behind a cron-hit endpoint and
//! hand the schedule strings to the platform, while long-running processes
//! let [`JobRegistry::spawn`] drive the same callbacks off plain intervals.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::jobs::{Clock, JobEngine};
use crate::store::DocumentStore;

type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub slug: String,
    /// Opaque cron expression, passed through to external schedulers.
    pub schedule: String,
    /// Trigger period for in-process execution.
    pub every: Duration,
}

struct RegisteredJob {
    descriptor: JobDescriptor,
    callback: JobCallback,
}

/// Named jobs plus the two ways of triggering them.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Vec<RegisteredJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, descriptor: JobDescriptor, callback: F)
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        self.jobs.push(RegisteredJob {
            descriptor,
            callback: Arc::new(callback),
        });
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.jobs.iter().map(|job| &job.descriptor)
    }

    /// One-shot invocation by slug, the serverless trigger path.
    pub async fn run(&self, slug: &str) -> anyhow::Result<()> {
        let job = self
            .jobs
            .iter()
            .find(|job| job.descriptor.slug == slug)
            .ok_or_else(|| anyhow::anyhow!("unknown job: {slug}"))?;
        info!(slug, "job triggered");
        match (job.callback)().await {
            Ok(()) => Ok(()),
            Err(err) => {
                // No in-core retry; the scheduler re-invokes the whole period.
                error!(slug, error = %err, "job failed");
                Err(err)
            }
        }
    }

    /// Recurring in-process execution, one task per job. The first tick
    /// fires immediately.
    pub fn spawn(self) -> Vec<tokio::task::JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(|job| {
                let slug = job.descriptor.slug.clone();
                let every = job.descriptor.every;
                let callback = job.callback;
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(every);
                    loop {
                        interval.tick().await;
                        if let Err(err) = callback().await {
                            error!(slug, error = %err, "job failed");
                        }
                    }
                })
            })
            .collect()
    }
}

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Wires the four standard analytics jobs against a job engine. Slugs are
/// prefixed with the collection slug so several plugin instances can share
/// one scheduler namespace.
pub fn analytics_jobs<S, Tz>(engine: Arc<JobEngine<S, Tz>>) -> JobRegistry
where
    S: DocumentStore + 'static,
    Tz: Clock + Send + Sync + 'static,
    Tz::Offset: Display + Send + Sync,
{
    let options = engine.options().clone();
    let slug = options.collection_slug.clone();
    let mut registry = JobRegistry::new();

    let hourly = engine.clone();
    registry.register(
        JobDescriptor {
            slug: format!("{slug}_aggregate_hourly"),
            schedule: options.aggregation_schedule.hourly.clone(),
            every: HOUR,
        },
        move || {
            let engine = hourly.clone();
            Box::pin(async move {
                engine.run_hourly_aggregation(None).await?;
                Ok(())
            })
        },
    );

    let daily = engine.clone();
    registry.register(
        JobDescriptor {
            slug: format!("{slug}_aggregate_daily"),
            schedule: options.aggregation_schedule.daily.clone(),
            every: DAY,
        },
        move || {
            let engine = daily.clone();
            Box::pin(async move {
                engine.run_daily_aggregation(None).await?;
                Ok(())
            })
        },
    );

    let cleanup = engine.clone();
    registry.register(
        JobDescriptor {
            slug: format!("{slug}_cleanup_aggregations"),
            schedule: options.aggregation_schedule.cleanup.clone(),
            every: WEEK,
        },
        move || {
            let engine = cleanup.clone();
            Box::pin(async move {
                engine.cleanup_old_aggregations().await?;
                Ok(())
            })
        },
    );

    registry.register(
        JobDescriptor {
            slug: format!("{slug}_delete_history"),
            schedule: options.aggregation_schedule.daily.clone(),
            every: DAY,
        },
        move || {
            let engine = engine.clone();
            Box::pin(async move {
                engine.cleanup_old_records().await?;
                Ok(())
            })
        },
    );

    registry
}
