/// Per-task sync progress with an elapsed-based remaining-time estimate,
/// one-second output throttling and a one-shot "fully synced" mail.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::info;

use crate::error::Result;
use crate::mail;
use crate::util::seconds_to_human;

/// Set once block storage reaches the chain tip; the derivation tasks only
/// count as finished after the blocks they consume stopped growing.
pub static BLOCK_SYNC_FINISHED: AtomicBool = AtomicBool::new(false);

const MILESTONE_MAIL_MIN_SYNC: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
pub struct Progress {
    init_percentage: f64,
    init_time: Option<Instant>,
    init_wall: Option<DateTime<Utc>>,
    pub percentage: f64,
    remaining_time: String,
    pub finished: bool,
    mail_sent: bool,
    last_output: Option<Instant>,
}

impl Progress {
    fn update_percentage(&mut self, percentage: f64) {
        self.percentage = (percentage * 10_000.0).trunc() / 10_000.0;
    }

    fn extract_seconds(&mut self, seconds_left: u64) {
        // Meaningless once caught up.
        if self.finished {
            self.remaining_time.clear();
        } else {
            self.remaining_time = format!("({} left)", seconds_to_human(seconds_left));
        }
    }

    /// Recomputes percentage and the remaining-time estimate from the rate
    /// observed since this task started.
    pub fn estimate_remaining(&mut self, current: i64, total: i64) {
        let percentage = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        if self.init_time.is_none() {
            self.init_percentage = percentage;
            self.init_time = Some(Instant::now());
            self.init_wall = Some(Utc::now());
            self.update_percentage(percentage);
            return;
        }

        if current >= total {
            self.extract_seconds(0);
            self.percentage = 100.0;
            return;
        }

        let elapsed = self
            .init_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.update_percentage(percentage);

        let elapsed_percentage = percentage - self.init_percentage;
        // The denominator may grow faster than the cursor, e.g. 10/100
        // becomes 11/110; restart the estimate from here.
        if elapsed_percentage <= 0.0 {
            self.init_percentage = percentage;
            self.init_time = Some(Instant::now());
            self.finished = false;
            return;
        }

        let remaining = elapsed / elapsed_percentage * (100.0 - percentage);
        self.extract_seconds(remaining.ceil() as u64);
    }
}

/// Progress reporter bound to one task; refreshes its denominator when the
/// storer broadcasts a newly committed height.
pub struct TaskProgress {
    label: &'static str,
    mail_subject: &'static str,
    progress: Progress,
    max_pk: i64,
    height_rx: Option<watch::Receiver<i64>>,
    /// The block task finishes on its own; every other task additionally
    /// waits for block storage to finish.
    standalone: bool,
}

impl TaskProgress {
    pub fn new(
        label: &'static str,
        mail_subject: &'static str,
        height_rx: watch::Receiver<i64>,
    ) -> Self {
        TaskProgress {
            label,
            mail_subject,
            progress: Progress::default(),
            max_pk: 0,
            height_rx: Some(height_rx),
            standalone: false,
        }
    }

    pub fn standalone(label: &'static str, mail_subject: &'static str) -> Self {
        TaskProgress {
            label,
            mail_subject,
            progress: Progress::default(),
            max_pk: 0,
            height_rx: None,
            standalone: true,
        }
    }

    pub fn set_denominator(&mut self, value: i64) {
        self.max_pk = value;
    }

    /// Re-reads the denominator on first use and whenever new blocks were
    /// committed since the last report.
    pub async fn refresh_denominator<F, Fut>(&mut self, fetch: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let stale = match self.height_rx.as_mut() {
            Some(rx) => {
                if rx.has_changed().unwrap_or(false) {
                    rx.borrow_and_update();
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if self.max_pk == 0 || stale {
            self.max_pk = fetch().await? as i64;
        }
        Ok(())
    }

    /// Logs progress (throttled to once a second while behind) and sends the
    /// fully-synced milestone mail once.
    pub async fn report(&mut self, current: i64) {
        let now = Instant::now();
        if self.progress.last_output.is_none() {
            self.progress.last_output = Some(now);
        }
        if current < self.max_pk {
            if let Some(last) = self.progress.last_output {
                if now.duration_since(last) < Duration::from_secs(1) && self.progress.init_time.is_some() {
                    return;
                }
            }
        }

        self.progress.estimate_remaining(current, self.max_pk);
        if self.progress.percentage >= 100.0
            && (self.standalone || BLOCK_SYNC_FINISHED.load(Ordering::Relaxed))
        {
            self.progress.finished = true;
        }

        info!(
            "{}Progress of {}: {}/{}, {:.4}%",
            self.progress.remaining_time, self.label, current, self.max_pk, self.progress.percentage
        );
        self.progress.last_output = Some(now);

        if self.standalone && self.progress.finished {
            BLOCK_SYNC_FINISHED.store(true, Ordering::Relaxed);
        }

        if self.progress.finished && !self.progress.mail_sent {
            self.progress.mail_sent = true;

            // A short catch-up run is not worth a mail.
            let synced_long_enough = self
                .progress
                .init_time
                .map(|t| t.elapsed() >= MILESTONE_MAIL_MIN_SYNC)
                .unwrap_or(false);
            if !synced_long_enough {
                return;
            }

            let body = if self.standalone {
                format!("Block counts: {}", self.max_pk)
            } else {
                format!(
                    "Init time: {:?}\nEnd Time: {:?}\n",
                    self.progress.init_wall,
                    Utc::now()
                )
            };
            mail::send_notify(self.mail_subject, &body).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_estimate_sets_baseline() {
        let mut p = Progress::default();
        p.estimate_remaining(10, 100);
        assert!((p.percentage - 10.0).abs() < 1e-9);
        assert!(!p.finished);
        assert!(p.remaining_time.is_empty());
    }

    #[test]
    fn test_caught_up_is_hundred_percent() {
        let mut p = Progress::default();
        p.estimate_remaining(10, 100);
        p.estimate_remaining(100, 100);
        assert_eq!(p.percentage, 100.0);
        p.estimate_remaining(120, 100);
        assert_eq!(p.percentage, 100.0);
    }

    #[test]
    fn test_growing_denominator_resets_baseline() {
        let mut p = Progress::default();
        p.estimate_remaining(10, 100);
        // Denominator exploded; percentage dropped below the baseline.
        p.estimate_remaining(11, 1100);
        assert!(p.percentage < 10.0);
        assert!(!p.finished);
    }

    #[test]
    fn test_estimate_produces_remaining_string() {
        let mut p = Progress::default();
        p.estimate_remaining(10, 100);
        std::thread::sleep(Duration::from_millis(20));
        p.estimate_remaining(50, 100);
        assert!(p.remaining_time.starts_with('('));
        assert!(p.remaining_time.ends_with("left)"));
    }
}
