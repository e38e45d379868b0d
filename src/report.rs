//! End-of-run reporting: derived statistics, sizing advice and output formats.

use crate::config::limits;
use crate::message::SourceId;
use crate::metrics::OccupancySample;
use crate::simulation::RunReport;
use crate::worker::{Role, WorkerOutcome};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

const RULE: &str = "------------------------------------------------------------";

/// Share of full observations above which producers are considered starved of slots.
const FULL_THRESHOLD: f64 = 0.10;
/// Share of empty observations above which consumers are considered starved of messages.
const EMPTY_THRESHOLD: f64 = 0.30;
/// Utilisation (percent) below which the queue is oversized.
const LOW_UTILISATION: f64 = 30.0;

/// Per-worker line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub role: Role,
    pub id: SourceId,
    pub items_handled: Option<u64>,
    pub times_blocked: Option<u64>,
    pub panicked: bool,
}

impl From<&WorkerOutcome> for WorkerSummary {
    fn from(outcome: &WorkerOutcome) -> Self {
        Self {
            role: outcome.role,
            id: outcome.id,
            items_handled: outcome.stats.map(|s| s.items_handled),
            times_blocked: outcome.stats.map(|s| s.times_blocked),
            panicked: outcome.stats.is_none(),
        }
    }
}

/// Derived statistics for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub producers: usize,
    pub consumers: usize,
    pub capacity: usize,
    pub runtime_secs: f64,
    pub interrupted: bool,

    pub average_occupancy: f64,
    /// Average occupancy as a percentage of capacity.
    pub utilisation: f64,
    pub peak_occupancy: usize,
    pub percent_full: f64,
    pub percent_empty: f64,

    pub produced: u64,
    pub consumed: u64,
    pub produce_rate: f64,
    pub consume_rate: f64,

    pub producer_blocks: u64,
    pub consumer_blocks: u64,
    pub average_wait_ms: Option<f64>,
    pub max_wait_ms: u64,

    pub average_latency_ms: Option<f64>,
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: u64,

    /// Messages left in the queue after shutdown.
    pub final_count: usize,
    /// `produced == consumed + final_count`.
    pub conserved: bool,

    pub workers: Vec<WorkerSummary>,

    #[serde(skip)]
    pub samples: Vec<OccupancySample>,
}

impl Summary {
    pub fn build(report: &RunReport) -> Self {
        let analytics = &report.analytics;
        let observations = analytics.occupancy_observations;
        let share = |count: u64| {
            if observations == 0 {
                0.0
            } else {
                count as f64 / observations as f64 * 100.0
            }
        };

        let average_occupancy = analytics.average_occupancy();
        let utilisation = if analytics.capacity == 0 {
            0.0
        } else {
            average_occupancy / analytics.capacity as f64 * 100.0
        };

        let runtime_secs = report.runtime.as_secs_f64();
        let rate = |count: u64| {
            if runtime_secs > 0.0 {
                count as f64 / runtime_secs
            } else {
                0.0
            }
        };

        Self {
            producers: report.config.producers,
            consumers: report.config.consumers,
            capacity: analytics.capacity,
            runtime_secs,
            interrupted: report.interrupted,
            average_occupancy,
            utilisation,
            peak_occupancy: analytics.occupancy_max,
            percent_full: share(analytics.full_observations),
            percent_empty: share(analytics.empty_observations),
            produced: analytics.produced,
            consumed: analytics.consumed,
            produce_rate: rate(analytics.produced),
            consume_rate: rate(analytics.consumed),
            producer_blocks: analytics.producer_blocks,
            consumer_blocks: analytics.consumer_blocks,
            average_wait_ms: analytics.average_wait_ms(),
            max_wait_ms: analytics.wait_max_ms,
            average_latency_ms: analytics.average_latency_ms(),
            min_latency_ms: analytics.latency_min_ms,
            max_latency_ms: analytics.latency_max_ms,
            final_count: report.final_count,
            conserved: analytics.produced == analytics.consumed + report.final_count as u64,
            workers: report.workers.iter().map(WorkerSummary::from).collect(),
            samples: analytics.samples.clone(),
        }
    }

    pub fn recommendation(&self) -> Recommendation {
        Recommendation::from_summary(self)
    }

    /// Human-readable report.
    pub fn render_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "\nANALYTICS SUMMARY")?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "CONFIGURATION")?;
        writeln!(
            out,
            "  Producers:        {:<5} Consumers:        {:<5}",
            self.producers, self.consumers
        )?;
        writeln!(
            out,
            "  Queue Capacity:   {:<5} Runtime:          {:.2} sec{}",
            self.capacity,
            self.runtime_secs,
            if self.interrupted { " (interrupted)" } else { "" }
        )?;

        writeln!(out, "\nQUEUE METRICS")?;
        writeln!(
            out,
            "  Avg Occupancy:    {:.2} items ({:.1}% Utilisation)",
            self.average_occupancy, self.utilisation
        )?;
        writeln!(out, "  Peak Occupancy:   {} items", self.peak_occupancy)?;
        writeln!(out, "  Time Full:        {:.1}%", self.percent_full)?;
        writeln!(out, "  Time Empty:       {:.1}%", self.percent_empty)?;
        writeln!(out, "  Left in Queue:    {}", self.final_count)?;

        writeln!(out, "\nTHROUGHPUT")?;
        writeln!(
            out,
            "  Produced:         {} ({:.2} msg/sec)",
            self.produced, self.produce_rate
        )?;
        writeln!(
            out,
            "  Consumed:         {} ({:.2} msg/sec)",
            self.consumed, self.consume_rate
        )?;
        writeln!(
            out,
            "  Conservation:     {}",
            if self.conserved { "OK" } else { "MISMATCH" }
        )?;

        writeln!(out, "\nLATENCY")?;
        match self.average_latency_ms {
            Some(avg) => writeln!(
                out,
                "  Avg / Min / Max:  {:.2} / {} / {} ms",
                avg,
                self.min_latency_ms.unwrap_or(0),
                self.max_latency_ms
            )?,
            None => writeln!(out, "  No messages consumed")?,
        }

        writeln!(out, "\nBLOCKING EVENTS")?;
        writeln!(out, "  Producer Blocks:  {} (Queue Full)", self.producer_blocks)?;
        writeln!(out, "  Consumer Blocks:  {} (Queue Empty)", self.consumer_blocks)?;
        if let Some(avg) = self.average_wait_ms {
            writeln!(
                out,
                "  Avg / Max Wait:   {:.2} / {} ms",
                avg, self.max_wait_ms
            )?;
        }

        writeln!(out, "\nWORKERS")?;
        for worker in &self.workers {
            match (worker.items_handled, worker.times_blocked) {
                (Some(items), Some(blocked)) => writeln!(
                    out,
                    "  {:<9} {:<3} handled {:<6} blocked {}",
                    worker.role, worker.id, items, blocked
                )?,
                _ => writeln!(out, "  {:<9} {:<3} panicked", worker.role, worker.id)?,
            }
        }
        writeln!(out, "{RULE}")?;

        self.recommendation().render_text(out)
    }

    /// Summary and recommendation as pretty-printed JSON.
    pub fn write_json<W: Write>(&self, out: W) -> serde_json::Result<()> {
        #[derive(Serialize)]
        struct Document<'a> {
            summary: &'a Summary,
            recommendation: Recommendation,
        }

        serde_json::to_writer_pretty(
            out,
            &Document {
                summary: self,
                recommendation: self.recommendation(),
            },
        )
    }
}

/// Suggested change after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    IncreaseSize,
    AddProducers,
    DecreaseSize,
    Maintain,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::IncreaseSize => "INCREASE Queue Size",
            Action::AddProducers => "ADD Producers (or Maintain Size)",
            Action::DecreaseSize => "DECREASE Queue Size",
            Action::Maintain => "MAINTAIN Current Size",
        }
    }

    fn rationale(self) -> &'static str {
        match self {
            Action::IncreaseSize => "High producer blocking frequency (Queue Full)",
            Action::AddProducers => "High consumer starvation (Queue Empty)",
            Action::DecreaseSize => "Low utilisation (<30%)",
            Action::Maintain => "Balanced utilisation",
        }
    }
}

/// Queue sizing advice derived from blocking frequency and utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub current_size: usize,
    pub suggested_size: usize,
    pub action: Action,
}

impl Recommendation {
    /// Rules, first match wins:
    ///
    /// 1. producers blocked and the queue was full in more than 10% of samples: double the
    ///    size, capped at `MAX_QUEUE_SIZE`
    /// 2. consumers blocked and the queue was empty in more than 30% of samples: add
    ///    producers, keep the size
    /// 3. utilisation below 30%: shrink to 70%, floored at `MIN_QUEUE_SIZE`
    /// 4. otherwise keep the current size
    pub fn from_summary(summary: &Summary) -> Self {
        let current = summary.capacity;
        let (action, suggested) = if summary.producer_blocks > 0
            && summary.percent_full > FULL_THRESHOLD * 100.0
        {
            (
                Action::IncreaseSize,
                (current * 2).min(limits::MAX_QUEUE_SIZE),
            )
        } else if summary.consumer_blocks > 0 && summary.percent_empty > EMPTY_THRESHOLD * 100.0 {
            (Action::AddProducers, current)
        } else if summary.utilisation < LOW_UTILISATION {
            let shrunk = (current as f64 * 0.7) as usize;
            (Action::DecreaseSize, shrunk.max(limits::MIN_QUEUE_SIZE))
        } else {
            (Action::Maintain, current)
        };

        Self {
            current_size: current,
            suggested_size: suggested,
            action,
        }
    }

    pub fn render_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "\nOPTIMIZATION RECOMMENDATION")?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "  Current Size:     {}", self.current_size)?;
        writeln!(out, "  Suggested Size:   {}", self.suggested_size)?;
        writeln!(out, "  Action:           {}", self.action.label())?;
        writeln!(out, "  Rationale:        {}", self.action.rationale())?;
        writeln!(out, "{RULE}\n")
    }
}

/// Write the occupancy trace as CSV (`time_secs,occupancy,capacity,utilisation`).
///
/// # Returns
/// Number of data rows written.
pub fn export_csv(samples: &[OccupancySample], path: impl AsRef<Path>) -> csv::Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())?;
    writer.write_record(["time_secs", "occupancy", "capacity", "utilisation"])?;
    for sample in samples {
        writer.write_record(&[
            format!("{:.2}", sample.time_secs),
            sample.occupancy.to_string(),
            sample.capacity.to_string(),
            format!("{:.1}", sample.utilisation()),
        ])?;
    }
    writer.flush()?;
    log::info!(
        "occupancy trace exported to {} ({} samples)",
        path.as_ref().display(),
        samples.len()
    );
    Ok(samples.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::metrics::Analytics;
    use crate::metrics::MetricsSink;
    use crate::worker::WorkerStats;
    use std::time::Duration;

    fn report(analytics: &Analytics, final_count: usize) -> RunReport {
        RunReport {
            config: SimulationConfig {
                capacity: analytics.capacity(),
                ..SimulationConfig::default()
            },
            analytics: analytics.snapshot(),
            workers: vec![
                WorkerOutcome {
                    role: Role::Producer,
                    id: 1,
                    stats: Some(WorkerStats {
                        items_handled: 5,
                        times_blocked: 2,
                    }),
                },
                WorkerOutcome {
                    role: Role::Consumer,
                    id: 1,
                    stats: None,
                },
            ],
            final_count,
            runtime: Duration::from_secs(2),
            interrupted: false,
        }
    }

    #[test]
    fn summary_derives_rates_and_conservation() {
        let analytics = Analytics::new(4);
        for _ in 0..6 {
            analytics.record_produce();
        }
        for _ in 0..4 {
            analytics.record_consume();
        }
        analytics.record_occupancy(0.0, 4);
        analytics.record_occupancy(1.0, 0);

        let summary = Summary::build(&report(&analytics, 2));
        assert!(summary.conserved);
        assert_eq!(summary.produce_rate, 3.0);
        assert_eq!(summary.consume_rate, 2.0);
        assert_eq!(summary.average_occupancy, 2.0);
        assert_eq!(summary.utilisation, 50.0);
        assert_eq!(summary.percent_full, 50.0);
        assert_eq!(summary.percent_empty, 50.0);
        assert!(summary.workers[1].panicked);

        let summary = Summary::build(&report(&analytics, 0));
        assert!(!summary.conserved);
    }

    #[test]
    fn full_queue_with_producer_blocks_doubles_size() {
        let analytics = Analytics::new(15);
        analytics.record_producer_block();
        analytics.record_occupancy(0.0, 15);
        let advice = Summary::build(&report(&analytics, 0)).recommendation();
        assert_eq!(advice.action, Action::IncreaseSize);
        assert_eq!(advice.suggested_size, limits::MAX_QUEUE_SIZE);
    }

    #[test]
    fn starved_consumers_suggest_more_producers() {
        let analytics = Analytics::new(8);
        analytics.record_consumer_block();
        analytics.record_occupancy(0.0, 0);
        analytics.record_occupancy(1.0, 6);
        let advice = Summary::build(&report(&analytics, 0)).recommendation();
        assert_eq!(advice.action, Action::AddProducers);
        assert_eq!(advice.suggested_size, 8);
    }

    #[test]
    fn low_utilisation_shrinks_with_floor() {
        let analytics = Analytics::new(10);
        analytics.record_occupancy(0.0, 1);
        let advice = Summary::build(&report(&analytics, 0)).recommendation();
        assert_eq!(advice.action, Action::DecreaseSize);
        assert_eq!(advice.suggested_size, 7);

        let analytics = Analytics::new(1);
        let advice = Summary::build(&report(&analytics, 0)).recommendation();
        assert_eq!(advice.suggested_size, limits::MIN_QUEUE_SIZE);
    }

    #[test]
    fn balanced_run_is_maintained() {
        let analytics = Analytics::new(10);
        analytics.record_occupancy(0.0, 5);
        let advice = Summary::build(&report(&analytics, 0)).recommendation();
        assert_eq!(advice.action, Action::Maintain);
        assert_eq!(advice.suggested_size, 10);
    }

    #[test]
    fn text_and_json_render() {
        let analytics = Analytics::new(4);
        analytics.record_latency(12);
        let summary = Summary::build(&report(&analytics, 0));

        let mut text = Vec::new();
        summary.render_text(&mut text).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("ANALYTICS SUMMARY"));
        assert!(text.contains("OPTIMIZATION RECOMMENDATION"));
        assert!(text.contains("panicked"));

        let mut json = Vec::new();
        summary.write_json(&mut json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["summary"]["capacity"], 4);
        assert_eq!(value["summary"]["min_latency_ms"], 12);
        assert!(value["recommendation"]["action"].is_string());
    }
}
