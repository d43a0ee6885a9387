//! Concurrent fan-out over the enabled sources.
//!
//! Every source runs as its own task under its own timeout. The gather waits
//! at most for the slowest source's budget (plus a small grace period), then
//! cancels whatever is still running and reports it as timed out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::lyrics::providers::{LyricSource, collect_candidates, search_variants};
use crate::lyrics::types::{LyricsQuery, SourceId, UpstreamCandidate};

const GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult {
    Completed(Vec<UpstreamCandidate>),
    TimedOut,
    Failed(String),
}

/// What one source contributed to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub source: SourceId,
    pub elapsed: Duration,
    pub result: SourceResult,
}

/// All candidates from completed sources, in completion order.
pub fn candidates(outcomes: Vec<SourceOutcome>) -> Vec<UpstreamCandidate> {
    outcomes
        .into_iter()
        .flat_map(|o| match o.result {
            SourceResult::Completed(c) => c,
            _ => Vec::new(),
        })
        .collect()
}

pub struct Aggregator {
    sources: Vec<Arc<dyn LyricSource>>,
    max_fetch: usize,
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn LyricSource>>, max_fetch: usize) -> Self {
        Self { sources, max_fetch }
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.iter().map(|s| s.id())
    }

    /// Longest per-source budget; zero when no source is enabled.
    pub fn horizon(&self) -> Duration {
        self.sources.iter().map(|s| s.timeout()).max().unwrap_or_default()
    }

    /// Query every source concurrently and return one outcome per source,
    /// in the order they finished. Sources still running at the horizon
    /// are cancelled and reported last as `TimedOut`.
    pub async fn gather(&self, query: &LyricsQuery) -> Vec<SourceOutcome> {
        self.gather_with(query, search_variants(query, None)).await
    }

    /// [`gather`](Self::gather) with an explicit list of search variants.
    pub async fn gather_with(&self, query: &LyricsQuery, variants: Vec<LyricsQuery>) -> Vec<SourceOutcome> {
        let variants: Arc<[LyricsQuery]> = variants.into();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let mut set = JoinSet::new();
        let mut pending = HashMap::new();

        for source in &self.sources {
            let source = Arc::clone(source);
            let query = query.clone();
            let variants = Arc::clone(&variants);
            let token = cancel.child_token();
            let max_fetch = self.max_fetch;
            let id = source.id();
            let handle = set.spawn(async move {
                let budget = source.timeout();
                let result = tokio::select! {
                    _ = token.cancelled() => SourceResult::TimedOut,
                    r = tokio::time::timeout(budget, collect_candidates(source.as_ref(), &query, &variants, max_fetch)) => match r {
                        Ok(Ok(found)) => SourceResult::Completed(found),
                        Ok(Err(e)) => SourceResult::Failed(e.to_string()),
                        Err(_) => SourceResult::TimedOut,
                    },
                };
                SourceOutcome {
                    source: source.id(),
                    elapsed: started.elapsed(),
                    result,
                }
            });
            pending.insert(handle.id(), id);
        }

        let deadline = tokio::time::Instant::now() + self.horizon() + GRACE;
        let mut outcomes = Vec::with_capacity(self.sources.len());
        loop {
            match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((task, outcome)))) => {
                    pending.remove(&task);
                    log_outcome(&outcome);
                    outcomes.push(outcome);
                }
                Ok(Some(Err(e))) => {
                    let Some(source) = pending.remove(&e.id()) else { continue };
                    let outcome = SourceOutcome {
                        source,
                        elapsed: started.elapsed(),
                        result: SourceResult::Failed(format!("source task failed: {e}")),
                    };
                    log_outcome(&outcome);
                    outcomes.push(outcome);
                }
                Ok(None) => break,
                Err(_) => {
                    cancel.cancel();
                    set.abort_all();
                    let mut late: Vec<SourceId> = pending.drain().map(|(_, id)| id).collect();
                    late.sort();
                    for source in late {
                        let outcome = SourceOutcome {
                            source,
                            elapsed: started.elapsed(),
                            result: SourceResult::TimedOut,
                        };
                        log_outcome(&outcome);
                        outcomes.push(outcome);
                    }
                    break;
                }
            }
        }
        outcomes
    }
}

fn log_outcome(outcome: &SourceOutcome) {
    let ms = outcome.elapsed.as_millis() as u64;
    match &outcome.result {
        SourceResult::Completed(found) => {
            tracing::debug!(source = %outcome.source, elapsed_ms = ms, candidates = found.len(), "Source completed");
        }
        SourceResult::TimedOut => {
            tracing::warn!(source = %outcome.source, elapsed_ms = ms, "Source timed out");
        }
        SourceResult::Failed(error) => {
            tracing::warn!(source = %outcome.source, elapsed_ms = ms, error = %error, "Source failed");
        }
    }
}
