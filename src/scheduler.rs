use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, warn};

use crate::download::RecordOutcome;
use crate::error::HarvestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub no_pdf: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    pub fn record(&mut self, id: &str, result: Result<RecordOutcome, HarvestError>) {
        match result {
            Ok(RecordOutcome::Downloaded) => self.downloaded += 1,
            Ok(RecordOutcome::Skipped) => self.skipped += 1,
            Ok(RecordOutcome::NoPdf) => self.no_pdf += 1,
            Err(err) => {
                warn!(id, error = %err, "record failed");
                self.failures.push(RecordFailure {
                    id: id.to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.no_pdf += other.no_pdf;
        self.failures.extend(other.failures);
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.no_pdf + self.failures.len()
    }
}

pub fn run_batch<T, I, F>(items: &[T], workers: usize, id_of: I, task: F) -> BatchReport
where
    T: Sync,
    I: Fn(&T) -> String + Sync,
    F: Fn(&T) -> Result<RecordOutcome, HarvestError> + Sync,
{
    let workers = workers.clamp(1, items.len().max(1));
    let cursor = &AtomicUsize::new(0);
    let (id_of, task) = (&id_of, &task);
    let mut report = BatchReport::default();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut local = BatchReport::default();
                    loop {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(item) = items.get(index) else {
                            break;
                        };
                        let id = id_of(item);
                        let result = panic::catch_unwind(AssertUnwindSafe(|| task(item)))
                            .unwrap_or_else(|payload| {
                                Err(HarvestError::WorkerPanicked(panic_message(payload.as_ref())))
                            });
                        local.record(&id, result);
                    }
                    local
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(local) => report.merge(local),
                Err(payload) => warn!(
                    message = %panic_message(payload.as_ref()),
                    "worker thread panicked outside a task"
                ),
            }
        }
    });

    debug!(
        items = items.len(),
        workers,
        downloaded = report.downloaded,
        skipped = report.skipped,
        failed = report.failures.len(),
        "batch finished"
    );
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "worker panicked".to_string()
}
