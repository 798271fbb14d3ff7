//! Report assembly for a sampling run.
//!
//! For every metric the report keeps only the top-N actors by peak value,
//! together with the round timestamps (x axis) and actor labels. Rendering
//! is left to the consumer; the report serializes to JSON.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::collector::Session;
use crate::storage::{Metric, SampleStore, Value, peak};

/// Ranks up to this position are highlighted in the text summary.
const HIGHLIGHT_RANKS: usize = 5;

const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Chart-ready data of one sampling run.
#[derive(Debug, Serialize)]
pub struct Report {
    /// Round timestamps formatted as `HH:MM:SS`.
    pub rounds: Vec<String>,
    pub charts: Vec<Chart>,
    /// Every actor ranked in at least one chart, sorted by id.
    pub services: Vec<RankedActor>,
}

/// Top-N series of one metric.
#[derive(Debug, Serialize)]
pub struct Chart {
    pub metric: Metric,
    pub subtitle: &'static str,
    pub series: Vec<Series>,
}

/// One actor's values across rounds.
#[derive(Debug, Serialize)]
pub struct Series {
    pub actor: String,
    /// Actor id, suffixed with `<timeout>`/`<error>` when the peak is a sentinel.
    pub name: String,
    pub label: Option<String>,
    /// One entry per round the actor took part in; `null` if never filled.
    pub values: Vec<Option<Value>>,
}

#[derive(Debug, Serialize)]
pub struct RankedActor {
    pub actor: String,
    pub label: Option<String>,
    pub ranks: Vec<Rank>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Rank {
    pub metric: Metric,
    /// 1-based position in the metric's top-N list.
    pub position: usize,
}

impl Report {
    /// Builds the report from the session's current data.
    pub fn build(session: &Session, top: usize) -> Self {
        Self::from_parts(session.store(), session.labels(), session.round_times(), top)
    }

    pub fn from_parts(
        store: &SampleStore,
        labels: &HashMap<String, String>,
        round_times: &[DateTime<Local>],
        top: usize,
    ) -> Self {
        let rounds = round_times
            .iter()
            .map(|t| t.format("%H:%M:%S").to_string())
            .collect();

        let mut ranked: BTreeMap<String, Vec<Rank>> = BTreeMap::new();
        let mut charts = Vec::with_capacity(Metric::REPORT_ORDER.len());

        for metric in Metric::REPORT_ORDER {
            let mut series = Vec::new();
            for (i, actor) in store.top_n(metric, top).into_iter().enumerate() {
                let samples = store.series(actor).unwrap_or_default();
                let suffix = peak(samples, metric)
                    .and_then(Value::annotation)
                    .unwrap_or("");
                series.push(Series {
                    actor: actor.to_string(),
                    name: format!("{}{}", actor, suffix),
                    label: labels.get(actor).cloned(),
                    values: samples.iter().map(|s| s.get(metric)).collect(),
                });
                ranked.entry(actor.to_string()).or_default().push(Rank {
                    metric,
                    position: i + 1,
                });
            }
            charts.push(Chart {
                metric,
                subtitle: metric.unit(),
                series,
            });
        }

        let services = ranked
            .into_iter()
            .map(|(actor, ranks)| RankedActor {
                label: labels.get(&actor).cloned(),
                actor,
                ranks,
            })
            .collect();

        Self {
            rounds,
            charts,
            services,
        }
    }

    pub fn chart(&self, metric: Metric) -> Option<&Chart> {
        self.charts.iter().find(|c| c.metric == metric)
    }

    /// Narrows the report to one metric's chart and the actors ranked in it.
    pub fn only(mut self, metric: Metric) -> Self {
        self.charts.retain(|c| c.metric == metric);
        self.services.retain_mut(|service| {
            service.ranks.retain(|r| r.metric == metric);
            !service.ranks.is_empty()
        });
        self
    }

    /// Text summary of the merged top lists, one line per actor.
    ///
    /// Ranks within the first five are wrapped in red when `colored` is set.
    pub fn summary_lines(&self, top: usize, colored: bool) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.services.len() + 1);
        lines.push(format!(
            "-----top {} services list, merge({})-----",
            top,
            self.services.len()
        ));
        for service in &self.services {
            let ranks: String = service
                .ranks
                .iter()
                .map(|r| {
                    let desc = format!("{}:<{}>st ", r.metric, r.position);
                    if colored && r.position <= HIGHLIGHT_RANKS {
                        format!("{RED}{desc}{RESET}")
                    } else {
                        desc
                    }
                })
                .collect();
            lines.push(format!(
                "{} => {} ({})",
                service.actor,
                service.label.as_deref().unwrap_or("?"),
                ranks
            ));
        }
        lines
    }

    /// Logs [`summary_lines`](Self::summary_lines) at info level.
    pub fn log_summary(&self, top: usize, colored: bool) {
        for line in self.summary_lines(top, colored) {
            info!("{}", line);
        }
    }
}
