//! Gateway configuration.
//!
//! Built once at startup (see `main.rs`) and passed by value or `Arc` into
//! the components that need it. Nothing here is mutated after `validate`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::lyrics::types::SourceId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid proxy for {id}: {reason}")]
    InvalidProxy { id: SourceId, reason: String },
    #[error("{0}")]
    UnknownSource(String),
    #[error("timeout for {0} must be greater than zero")]
    ZeroTimeout(SourceId),
    #[error("no lyrics source is enabled")]
    NoSources,
    #[error("invalid matching configuration: {0}")]
    Matching(String),
}

/// Per-platform switches.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub id: SourceId,
    pub enabled: bool,
    pub proxy: Option<String>,
    /// Overrides the platform's timeout class.
    pub timeout: Option<Duration>,
}

impl SourceSettings {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            // Musixmatch needs a desktop token and is opt-in.
            enabled: id != SourceId::Musixmatch,
            proxy: None,
            timeout: None,
        }
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.id.timeout_class().duration())
    }
}

/// Scoring and selection knobs for the matching engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    pub title_weight: f64,
    pub artist_weight: f64,
    pub album_weight: f64,
    /// Candidates must score at least this much to be selected.
    pub min_score: u8,
    pub duration_tolerance_ms: u64,
    /// Tie-break order, most preferred first.
    pub priority: Vec<SourceId>,
    /// How many pre-ranked search hits each source downloads.
    pub max_fetch_per_source: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            title_weight: 0.55,
            artist_weight: 0.30,
            album_weight: 0.15,
            min_score: 60,
            duration_tolerance_ms: 2000,
            priority: SourceId::ALL.to_vec(),
            max_fetch_per_source: 3,
        }
    }
}

impl MatchConfig {
    /// Position in the priority list; unlisted sources sort last.
    pub fn priority_rank(&self, source: SourceId) -> usize {
        self.priority
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.priority.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// JSON file backing the cache. `None` keeps entries in memory only.
    pub path: Option<PathBuf>,
    pub capacity: usize,
    /// Bucket width used to fold the query duration into the fingerprint.
    pub duration_bucket_secs: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            capacity: 512,
            duration_bucket_secs: None,
        }
    }
}

/// Default enrichment backend used for shareable (standard) results.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Language translations are produced in.
    pub target_lang: String,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
            target_lang: "zh".to_string(),
        }
    }
}

/// Title translation used by the matcher's second pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslateConfig {
    pub enabled: bool,
    pub target: String,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target: "zh-CN".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub sources: Vec<SourceSettings>,
    pub matching: MatchConfig,
    pub cache: CacheConfig,
    pub enrich: EnrichConfig,
    pub translate: TranslateConfig,
    pub musixmatch_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sources: SourceId::ALL.iter().map(|id| SourceSettings::new(*id)).collect(),
            matching: MatchConfig::default(),
            cache: CacheConfig::default(),
            enrich: EnrichConfig::default(),
            translate: TranslateConfig::default(),
            musixmatch_token: None,
        }
    }
}

impl GatewayConfig {
    pub fn source(&self, id: SourceId) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn source_mut(&mut self, id: SourceId) -> &mut SourceSettings {
        if let Some(pos) = self.sources.iter().position(|s| s.id == id) {
            return &mut self.sources[pos];
        }
        self.sources.push(SourceSettings::new(id));
        let last = self.sources.len() - 1;
        &mut self.sources[last]
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceSettings> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Restrict the enabled set to `names`, in that order of priority.
    pub fn restrict_sources(&mut self, names: &[String]) -> Result<(), ConfigError> {
        let ids = names
            .iter()
            .map(|n| n.parse::<SourceId>().map_err(ConfigError::UnknownSource))
            .collect::<Result<Vec<_>, _>>()?;
        for settings in &mut self.sources {
            settings.enabled = ids.contains(&settings.id);
        }
        for id in &ids {
            self.source_mut(*id).enabled = true;
        }
        let mut priority = ids.clone();
        priority.extend(self.matching.priority.iter().filter(|s| !ids.contains(*s)));
        self.matching.priority = priority;
        Ok(())
    }

    /// Startup checks. Any error here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_sources().next().is_none() {
            return Err(ConfigError::NoSources);
        }
        for source in self.enabled_sources() {
            if source.timeout.is_some_and(|t| t.is_zero()) {
                return Err(ConfigError::ZeroTimeout(source.id));
            }
            if let Some(proxy) = &source.proxy {
                reqwest::Proxy::all(proxy.as_str()).map_err(|e| ConfigError::InvalidProxy {
                    id: source.id,
                    reason: e.to_string(),
                })?;
            }
        }

        let m = &self.matching;
        let weights = [m.title_weight, m.artist_weight, m.album_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || m.title_weight + m.artist_weight <= 0.0 {
            return Err(ConfigError::Matching(format!("bad weights {weights:?}")));
        }
        if m.min_score > 100 {
            return Err(ConfigError::Matching(format!("min_score {} exceeds 100", m.min_score)));
        }
        if m.max_fetch_per_source == 0 {
            return Err(ConfigError::Matching("max_fetch_per_source must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_musixmatch_is_opt_in() {
        let cfg = GatewayConfig::default();
        cfg.validate().unwrap();
        let enabled: Vec<SourceId> = cfg.enabled_sources().map(|s| s.id).collect();
        assert_eq!(enabled, vec![SourceId::Qq, SourceId::Kugou, SourceId::Netease, SourceId::Lrclib]);
        assert_eq!(
            cfg.source(SourceId::Lrclib).unwrap().effective_timeout(),
            Duration::from_secs(25)
        );
    }

    #[test]
    fn restrict_sources_reorders_priority() {
        let mut cfg = GatewayConfig::default();
        cfg.restrict_sources(&["lrclib".into(), "musixmatch".into()]).unwrap();
        let enabled: Vec<SourceId> = cfg.enabled_sources().map(|s| s.id).collect();
        assert_eq!(enabled, vec![SourceId::Musixmatch, SourceId::Lrclib]);
        assert_eq!(cfg.matching.priority_rank(SourceId::Lrclib), 0);
        assert_eq!(cfg.matching.priority_rank(SourceId::Musixmatch), 1);
        assert!(matches!(
            cfg.restrict_sources(&["spotify".into()]),
            Err(ConfigError::UnknownSource(_))
        ));
    }

    #[test]
    fn validation_catches_bad_settings() {
        let mut cfg = GatewayConfig::default();
        cfg.source_mut(SourceId::Qq).timeout = Some(Duration::ZERO);
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroTimeout(SourceId::Qq))));

        let mut cfg = GatewayConfig::default();
        cfg.source_mut(SourceId::Kugou).proxy = Some("not a url".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidProxy { .. })));

        let mut cfg = GatewayConfig::default();
        for s in &mut cfg.sources {
            s.enabled = false;
        }
        assert!(matches!(cfg.validate(), Err(ConfigError::NoSources)));
    }
}
