//! Periodic background tasks
//!
//! Tasks run sequentially on each tick. A failing task is logged and
//! rescheduled like a successful one.

use crate::archive::ArchiveTransport;
use crate::config::SchedulerConfig;
use crate::lease::LeaseService;
use crate::remote::RemoteControl;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type TaskFn = Box<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct ScheduledTask {
    name: String,
    interval: Duration,
    /// Unset until the first run, so new tasks are due immediately
    next_due: Option<DateTime<Utc>>,
    run: TaskFn,
}

impl ScheduledTask {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due.is_none_or(|due| due <= now)
    }
}

/// Names of the tasks a tick ran, split by outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl TickReport {
    pub fn ran(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task that runs every `interval`, first on the next tick
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, task: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, interval = %interval, "Registered task");
        self.tasks.push(ScheduledTask {
            name,
            interval,
            next_due: None,
            run: Box::new(move |now| Box::pin(task(now))),
        });
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    /// Run every task due at `now`, in registration order
    pub async fn run_due_tasks(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        for task in &mut self.tasks {
            if !task.is_due(now) {
                continue;
            }

            let result = (task.run)(now).await;
            task.next_due = Some(now + task.interval);

            match result {
                Ok(()) => {
                    debug!(task = %task.name, "Task finished");
                    report.succeeded.push(task.name.clone());
                }
                Err(e) => {
                    error!(task = %task.name, error = ?e, "Task failed");
                    report.failed.push(task.name.clone());
                }
            }
        }

        report
    }

    /// Tick every `tick` until `cancel` fires
    pub async fn run(mut self, tick: std::time::Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick = ?tick, tasks = self.tasks.len(), "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.run_due_tasks(Utc::now()).await;
                    if report.ran() > 0 {
                        debug!(succeeded = report.succeeded.len(), failed = report.failed.len(), "Tick complete");
                    }
                }
            }
        }
    }
}

/// Scheduler with the reminder and overdue tasks for `service`
pub fn lease_tasks<R, T>(service: Arc<LeaseService<R, T>>, config: &SchedulerConfig) -> Scheduler
where
    R: RemoteControl + 'static,
    T: ArchiveTransport + 'static,
{
    let mut scheduler = Scheduler::new();
    let interval = Duration::from_std(config.tick).unwrap_or(Duration::hours(1));

    let reminders = Arc::clone(&service);
    let window = config.reminder_window;
    scheduler.register("return-reminders", interval, move |now| {
        let service = Arc::clone(&reminders);
        async move {
            service.send_return_reminders(now, window).await?;
            Ok::<_, anyhow::Error>(())
        }
    });

    let auto_return = config.auto_return;
    scheduler.register("overdue-sweep", interval, move |now| {
        let service = Arc::clone(&service);
        async move {
            let sweep = service.sweep_overdue(now, auto_return).await?;
            if sweep.failed > 0 {
                anyhow::bail!("{} of {} overdue returns failed", sweep.failed, sweep.failed + sweep.returned);
            }
            Ok::<_, anyhow::Error>(())
        }
    });

    scheduler
}
