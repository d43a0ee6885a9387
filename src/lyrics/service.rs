//! Request pipeline: cache, fan-out, match, normalize, enrich, write back.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, GatewayConfig};
use crate::lyrics::aggregator::{Aggregator, candidates};
use crate::lyrics::cache::{CacheFingerprint, KeyedLocks, LyricsCache, Origin};
use crate::lyrics::enrich::{ClientConfig, EnrichError, Enricher, GoogleTranslator, OpenAiEnricher, Translator};
use crate::lyrics::matcher::{MatchEngine, NotFound};
use crate::lyrics::normalize::normalize;
use crate::lyrics::providers::{build_sources, romaji_variant, search_variants};
use crate::lyrics::types::{LyricsDocument, LyricsQuery, http_client};

/// One lookup as received from a caller.
#[derive(Debug, Clone, Default)]
pub struct LyricsRequest {
    pub query: LyricsQuery,
    /// Translation style instruction for the enricher.
    pub style: Option<String>,
    /// BYOK enrichment credentials.
    pub client: Option<ClientConfig>,
}

impl LyricsRequest {
    pub fn new(query: LyricsQuery) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    /// Style or caller credentials make the rendering caller-specific.
    pub fn origin(&self) -> Origin {
        let styled = self.style.as_deref().is_some_and(|s| !s.trim().is_empty());
        let byok = self.client.as_ref().is_some_and(|c| !c.api_key.is_empty());
        if styled || byok { Origin::Personalized } else { Origin::Standard }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found { document: LyricsDocument, cache_hit: bool },
    NotFound(NotFound),
}

pub struct LyricsService {
    aggregator: Aggregator,
    matcher: MatchEngine,
    enricher: Option<Arc<dyn Enricher>>,
    enrich_timeout: Duration,
    romaji: Option<Arc<dyn Translator>>,
    cache: LyricsCache,
    locks: KeyedLocks,
}

const ROMAJI_TIMEOUT: Duration = Duration::from_secs(3);

impl LyricsService {
    pub fn new(aggregator: Aggregator, matcher: MatchEngine, cache: LyricsCache) -> Self {
        Self {
            aggregator,
            matcher,
            enricher: None,
            enrich_timeout: Duration::from_secs(30),
            romaji: None,
            cache,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>, timeout: Duration) -> Self {
        self.enricher = Some(enricher);
        self.enrich_timeout = timeout;
        self
    }

    /// Also search with a Japanese rendering of romanized queries.
    pub fn with_romaji(mut self, translator: Arc<dyn Translator>) -> Self {
        self.romaji = Some(translator);
        self
    }

    /// Wire up every component from a validated configuration.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sources = build_sources(config)?;
        tracing::info!(
            sources = ?sources.iter().map(|s| s.id()).collect::<Vec<_>>(),
            "Lyrics sources ready"
        );
        let aggregator = Aggregator::new(sources, config.matching.max_fetch_per_source);
        let translator = Arc::new(GoogleTranslator::new(http_client().clone()));
        let matcher =
            MatchEngine::new(config.matching.clone()).with_translator(config.translate.clone(), translator.clone());
        let cache = LyricsCache::from_config(&config.cache).await;
        let enricher = Arc::new(OpenAiEnricher::new(http_client().clone(), config.enrich.clone()));
        let service = Self::new(aggregator, matcher, cache).with_enricher(enricher, config.enrich.timeout);
        Ok(if config.translate.enabled { service.with_romaji(translator) } else { service })
    }

    /// Resolve one request. Standard requests go through the shared cache
    /// and are computed at most once per fingerprint at a time;
    /// personalized requests always compute and are never stored.
    pub async fn lookup(&self, request: &LyricsRequest) -> LookupOutcome {
        let origin = request.origin();
        if origin == Origin::Personalized {
            return match self.compute(request).await {
                Ok(document) => LookupOutcome::Found { document, cache_hit: false },
                Err(reason) => LookupOutcome::NotFound(reason),
            };
        }

        let fingerprint = self.cache.fingerprint(&request.query);
        let _guard = self.locks.lock(&fingerprint).await;
        if let Some(document) = self.cache.get(&fingerprint).await {
            tracing::info!(fingerprint = %fingerprint, source = %document.source, "Serving cached lyrics");
            return LookupOutcome::Found { document, cache_hit: true };
        }

        match self.compute(request).await {
            Ok(document) => {
                self.store(fingerprint, &document, origin).await;
                LookupOutcome::Found { document, cache_hit: false }
            }
            Err(reason) => LookupOutcome::NotFound(reason),
        }
    }

    async fn store(&self, fingerprint: CacheFingerprint, document: &LyricsDocument, origin: Origin) {
        self.cache.put(fingerprint, document.clone(), origin).await;
    }

    async fn compute(&self, request: &LyricsRequest) -> Result<LyricsDocument, NotFound> {
        let query = &request.query;
        let japanese = self.japanese_variant(query).await;
        let alternates: Vec<LyricsQuery> = japanese.iter().cloned().collect();
        let outcomes = self.aggregator.gather_with(query, search_variants(query, japanese)).await;
        let found = candidates(outcomes);
        tracing::debug!(title = %query.title, artist = %query.artist, candidates = found.len(), "Collected candidates");

        let selection = self.matcher.select_with(query, &alternates, found).await?;
        let document = normalize(&selection.candidate, selection.score);
        Ok(self.enrich(document, request).await)
    }

    async fn japanese_variant(&self, query: &LyricsQuery) -> Option<LyricsQuery> {
        let translator = self.romaji.as_ref()?;
        match tokio::time::timeout(ROMAJI_TIMEOUT, romaji_variant(translator.as_ref(), query)).await {
            Ok(variant) => variant,
            Err(_) => {
                tracing::debug!(title = %query.title, "Romaji translation timed out");
                None
            }
        }
    }

    /// Enrichment never fails the request; any error returns `document` as is.
    async fn enrich(&self, document: LyricsDocument, request: &LyricsRequest) -> LyricsDocument {
        let Some(enricher) = &self.enricher else {
            return document;
        };
        let call = enricher.enrich(document.clone(), request.client.as_ref(), request.style.as_deref());
        let result = match tokio::time::timeout(self.enrich_timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(EnrichError::Timeout(self.enrich_timeout)),
        };
        match result {
            Ok(enriched) => enriched,
            Err(EnrichError::NoClient) => {
                tracing::debug!("No enrichment client, returning base document");
                document
            }
            Err(e) => {
                tracing::warn!(error = %e, "Enrichment failed, returning base document");
                document
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::lyrics::cache::MemoryStore;
    use crate::lyrics::providers::LyricSource;
    use crate::lyrics::providers::testing::{FakeSource, hit};
    use crate::lyrics::types::SourceId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source(id: SourceId, delay_ms: u64, timeout_ms: u64) -> Arc<dyn LyricSource> {
        let mut s = FakeSource::new(id).with_hit(hit(id, "t1", "Anti-Hero", "Taylor Swift", Some(200_500)));
        s.delay = Duration::from_millis(delay_ms);
        s.timeout = Duration::from_millis(timeout_ms);
        Arc::new(s)
    }

    fn service(sources: Vec<Arc<dyn LyricSource>>) -> LyricsService {
        let cache = LyricsCache::new(Arc::new(MemoryStore::new(16)), None);
        LyricsService::new(Aggregator::new(sources, 3), MatchEngine::new(MatchConfig::default()), cache)
    }

    fn request() -> LyricsRequest {
        LyricsRequest::new(
            LyricsQuery::new("Anti-Hero", "Taylor Swift")
                .with_album("Midnights")
                .with_duration(200.5),
        )
    }

    struct Tagging {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Enricher for Tagging {
        async fn enrich(
            &self,
            mut doc: LyricsDocument,
            _client: Option<&ClientConfig>,
            style: Option<&str>,
        ) -> Result<LyricsDocument, EnrichError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EnrichError::Api("boom".into()));
            }
            for line in &mut doc.lines {
                line.translation = Some(style.unwrap_or("standard").to_string());
            }
            Ok(doc)
        }
    }

    #[tokio::test]
    async fn timed_out_source_does_not_fail_the_request() {
        let svc = service(vec![
            source(SourceId::Qq, 5_000, 100),
            source(SourceId::Kugou, 10, 500),
            source(SourceId::Lrclib, 20, 500),
        ]);
        match svc.lookup(&request()).await {
            LookupOutcome::Found { document, cache_hit } => {
                assert!(!cache_hit);
                assert!(matches!(document.source, SourceId::Kugou | SourceId::Lrclib));
                assert_eq!(document.lines.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_lookup_is_a_cache_hit() {
        let svc = service(vec![source(SourceId::Lrclib, 0, 500)]);
        assert!(matches!(svc.lookup(&request()).await, LookupOutcome::Found { cache_hit: false, .. }));
        assert!(matches!(svc.lookup(&request()).await, LookupOutcome::Found { cache_hit: true, .. }));
    }

    #[tokio::test]
    async fn concurrent_lookups_compute_once() {
        let svc = Arc::new(service(vec![source(SourceId::Lrclib, 50, 500)]));
        let (first, second) = (request(), request());
        let (a, b) = tokio::join!(svc.lookup(&first), svc.lookup(&second));
        let hits = [a, b]
            .iter()
            .filter(|o| matches!(o, LookupOutcome::Found { cache_hit: true, .. }))
            .count();
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn no_candidates_is_not_found() {
        let mut broken = FakeSource::new(SourceId::Kugou);
        broken.fail_search = true;
        let svc = service(vec![Arc::new(FakeSource::new(SourceId::Qq)), Arc::new(broken)]);
        assert_eq!(svc.lookup(&request()).await, LookupOutcome::NotFound(NotFound::NoCandidates));
    }

    struct Romaji;

    #[async_trait]
    impl Translator for Romaji {
        async fn translate(&self, text: &str, _target: &str) -> Result<String, crate::lyrics::types::LyricsError> {
            Ok(match text {
                "Yoru ni Kakeru" => "夜に駆ける".to_string(),
                other => other.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn romanized_query_matches_japanese_title() {
        let source = || -> Arc<dyn LyricSource> {
            Arc::new(FakeSource::new(SourceId::Qq).with_hit(hit(SourceId::Qq, "ja", "夜に駆ける", "YOASOBI", None)))
        };
        let req = LyricsRequest::new(LyricsQuery::new("Yoru ni Kakeru", "YOASOBI"));

        let plain = service(vec![source()]);
        assert!(matches!(plain.lookup(&req).await, LookupOutcome::NotFound(_)));

        let svc = service(vec![source()]).with_romaji(Arc::new(Romaji));
        let LookupOutcome::Found { document, .. } = svc.lookup(&req).await else {
            panic!("romanized lookup failed");
        };
        assert_eq!(document.source, SourceId::Qq);
    }

    #[tokio::test]
    async fn instrumental_only_track_is_found() {
        let source = FakeSource::new(SourceId::Lrclib)
            .with_hit(hit(SourceId::Lrclib, "empty", "Anti-Hero", "Taylor Swift", Some(200_500)));
        let svc = service(vec![Arc::new(source)]);
        let LookupOutcome::Found { document, .. } = svc.lookup(&request()).await else {
            panic!("instrumental lookup failed");
        };
        assert!(document.lines.is_empty());
    }

    #[tokio::test]
    async fn styled_results_are_not_shared() {
        let enricher = Arc::new(Tagging { calls: AtomicUsize::new(0), fail: false });
        let svc = service(vec![source(SourceId::Lrclib, 0, 500)]).with_enricher(enricher.clone(), Duration::from_secs(1));

        let mut styled = request();
        styled.style = Some("poetic".into());
        let LookupOutcome::Found { document, .. } = svc.lookup(&styled).await else {
            panic!("styled lookup failed");
        };
        assert_eq!(document.lines[0].translation.as_deref(), Some("poetic"));

        let LookupOutcome::Found { document, cache_hit } = svc.lookup(&request()).await else {
            panic!("standard lookup failed");
        };
        assert!(!cache_hit);
        assert_eq!(document.lines[0].translation.as_deref(), Some("standard"));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn enrichment_failure_returns_base_document() {
        let enricher = Arc::new(Tagging { calls: AtomicUsize::new(0), fail: true });
        let svc = service(vec![source(SourceId::Lrclib, 0, 500)]).with_enricher(enricher, Duration::from_secs(1));
        let LookupOutcome::Found { document, .. } = svc.lookup(&request()).await else {
            panic!("lookup failed");
        };
        assert!(document.lines.iter().all(|l| l.translation.is_none()));
    }
}
