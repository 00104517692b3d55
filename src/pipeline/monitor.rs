//! Continuous monitoring: poll → store → bounce → prune

use std::time::Duration;

use tracing::{error, info};

use super::{Pipeline, PipelineResult};
use crate::config::BouncerConfig;
use crate::feed::EventFeed;
use crate::utils::CancelToken;

/// Settings for the monitor loop
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Feed scope, usually the sending domain
    pub scope: String,
    /// Wait between polls
    pub interval: Duration,
    /// Store events but never send bounces
    pub no_bounce: bool,
    /// Give up after this many failed ticks in a row; 0 retries forever
    pub max_consecutive_failures: u32,
}

impl MonitorOptions {
    /// Options taken from configuration
    pub fn from_config(config: &BouncerConfig) -> Self {
        Self {
            scope: config.domain.clone(),
            interval: config.poll_interval(),
            no_bounce: config.no_bounce,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

/// Totals over a monitor run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    /// Batches received from the feed
    pub batches: usize,
    /// Events seen in those batches
    pub events: usize,
    /// New events stored
    pub stored: usize,
    /// Bounces sent
    pub bounced: usize,
    /// Events skipped by bounce passes because of an error
    pub bounce_failures: usize,
    /// Bounced markers pruned
    pub pruned: usize,
    /// Ticks that failed with an error
    pub failed_ticks: usize,
}

/// Runs the pipeline against a polling feed until cancelled
pub struct Monitor {
    pipeline: Pipeline,
    options: MonitorOptions,
}

impl Monitor {
    pub fn new(pipeline: Pipeline, options: MonitorOptions) -> Self {
        Self { pipeline, options }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// Poll the feed until `cancel` fires or the feed ends
    ///
    /// A failed tick is logged and the loop carries on after one interval.
    /// Returns the error of the last tick once `max_consecutive_failures`
    /// ticks in a row have failed. Cancellation is only observed between
    /// store writes, so a shutdown never leaves a half-written entry.
    pub fn run(
        &self,
        feed: &mut dyn EventFeed,
        cancel: &CancelToken,
    ) -> PipelineResult<MonitorSummary> {
        let mut summary = MonitorSummary::default();
        let mut consecutive_failures = 0u32;

        info!(
            scope = %self.options.scope,
            interval_secs = self.options.interval.as_secs_f64(),
            no_bounce = self.options.no_bounce,
            "monitoring events"
        );

        loop {
            match self.tick(feed, cancel, &mut summary) {
                Ok(true) => consecutive_failures = 0,
                Ok(false) => break,
                Err(e) => {
                    summary.failed_ticks += 1;
                    consecutive_failures += 1;
                    error!(error = %e, consecutive_failures, "monitor tick failed");

                    let limit = self.options.max_consecutive_failures;
                    if limit > 0 && consecutive_failures >= limit {
                        error!(limit, "too many consecutive failures, stopping");
                        return Err(e);
                    }
                    if cancel.wait_timeout(self.options.interval) {
                        break;
                    }
                }
            }
        }

        info!(
            batches = summary.batches,
            stored = summary.stored,
            bounced = summary.bounced,
            pruned = summary.pruned,
            "monitor stopped"
        );
        Ok(summary)
    }

    /// One poll and the work following it; false once the feed is done
    fn tick(
        &self,
        feed: &mut dyn EventFeed,
        cancel: &CancelToken,
        summary: &mut MonitorSummary,
    ) -> PipelineResult<bool> {
        let Some(batch) = feed.poll(&self.options.scope, self.options.interval, cancel)? else {
            return Ok(false);
        };
        summary.batches += 1;
        summary.events += batch.len();

        for event in &batch {
            if self.pipeline.store_if_new(event)? {
                summary.stored += 1;
            }
        }
        feed.acknowledge()?;

        if !self.options.no_bounce {
            let report = self.pipeline.generate_bounces()?;
            summary.bounced += report.sent.len();
            summary.bounce_failures += report.failures.len();
        }

        summary.pruned += self.pipeline.prune_bounced()?;
        Ok(true)
    }
}
