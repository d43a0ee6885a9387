use clap::Parser;
use clap::builder::BoolishValueParser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use lyricsflow::config::{ConfigError, GatewayConfig};
use lyricsflow::lyrics::enrich::ClientConfig;
use lyricsflow::lyrics::{LookupOutcome, LyricsQuery, LyricsRequest, LyricsResponse, LyricsService, SourceId};

const EXIT_NOT_FOUND: u8 = 2;

/// Resolve synchronized lyrics for one track and print them as JSON.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Cli {
    #[arg(long)]
    title: String,
    #[arg(long)]
    artist: String,
    #[arg(long)]
    album: Option<String>,
    /// Track length in seconds.
    #[arg(long)]
    duration: Option<f64>,
    /// Translation style instruction; the result is not cached.
    #[arg(long)]
    style: Option<String>,

    /// Caller-owned enrichment key (BYOK); the result is not cached.
    #[arg(long)]
    client_key: Option<String>,
    #[arg(long, requires = "client_key")]
    client_url: Option<String>,
    #[arg(long, requires = "client_key")]
    client_model: Option<String>,

    /// Comma-separated sources in preferred order (e.g. "qq,lrclib").
    #[arg(long, value_delimiter = ',', env = "LYRIC_SOURCES")]
    sources: Vec<String>,

    #[arg(long, env = "ENABLE_QQ", value_parser = BoolishValueParser::new())]
    enable_qq: Option<bool>,
    #[arg(long, env = "ENABLE_KUGOU", value_parser = BoolishValueParser::new())]
    enable_kugou: Option<bool>,
    #[arg(long, env = "ENABLE_NETEASE", value_parser = BoolishValueParser::new())]
    enable_netease: Option<bool>,
    #[arg(long, env = "ENABLE_MUSIXMATCH", value_parser = BoolishValueParser::new())]
    enable_musixmatch: Option<bool>,
    #[arg(long, env = "ENABLE_LRCLIB", value_parser = BoolishValueParser::new())]
    enable_lrclib: Option<bool>,

    #[arg(long, env = "QQ_PROXY")]
    qq_proxy: Option<String>,
    #[arg(long, env = "KUGOU_PROXY")]
    kugou_proxy: Option<String>,
    #[arg(long, env = "NETEASE_PROXY")]
    netease_proxy: Option<String>,
    #[arg(long, env = "MUSIXMATCH_PROXY")]
    musixmatch_proxy: Option<String>,
    #[arg(long, env = "LRCLIB_PROXY")]
    lrclib_proxy: Option<String>,

    #[arg(long, env = "QQ_TIMEOUT_SECS")]
    qq_timeout_secs: Option<u64>,
    #[arg(long, env = "KUGOU_TIMEOUT_SECS")]
    kugou_timeout_secs: Option<u64>,
    #[arg(long, env = "NETEASE_TIMEOUT_SECS")]
    netease_timeout_secs: Option<u64>,
    #[arg(long, env = "MUSIXMATCH_TIMEOUT_SECS")]
    musixmatch_timeout_secs: Option<u64>,
    #[arg(long, env = "LRCLIB_TIMEOUT_SECS")]
    lrclib_timeout_secs: Option<u64>,

    #[arg(long, env = "MUSIXMATCH_TOKEN", hide_env_values = true)]
    musixmatch_token: Option<String>,

    #[arg(long, env = "ENRICH_KEY", hide_env_values = true)]
    enrich_key: Option<String>,
    #[arg(long, env = "ENRICH_URL")]
    enrich_url: Option<String>,
    #[arg(long, env = "ENRICH_MODEL")]
    enrich_model: Option<String>,
    #[arg(long, env = "ENRICH_TIMEOUT_SECS")]
    enrich_timeout_secs: Option<u64>,

    /// JSON file used as the result cache (in-memory when unset).
    #[arg(long, env = "LYRICS_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    /// Minimum match score (0-100) a candidate needs to be selected.
    #[arg(long, env = "MIN_MATCH_SCORE")]
    min_score: Option<u8>,
    /// Skip title translation: the matcher's translated pass and the Japanese search variant.
    #[arg(long)]
    no_translate: bool,

    /// Enable debug logging to stderr
    #[arg(long)]
    debug_log: bool,
}

impl Cli {
    fn source_overrides(&self) -> [(SourceId, Option<bool>, Option<&String>, Option<u64>); 5] {
        [
            (SourceId::Qq, self.enable_qq, self.qq_proxy.as_ref(), self.qq_timeout_secs),
            (SourceId::Kugou, self.enable_kugou, self.kugou_proxy.as_ref(), self.kugou_timeout_secs),
            (SourceId::Netease, self.enable_netease, self.netease_proxy.as_ref(), self.netease_timeout_secs),
            (
                SourceId::Musixmatch,
                self.enable_musixmatch,
                self.musixmatch_proxy.as_ref(),
                self.musixmatch_timeout_secs,
            ),
            (SourceId::Lrclib, self.enable_lrclib, self.lrclib_proxy.as_ref(), self.lrclib_timeout_secs),
        ]
    }

    fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        let mut cfg = GatewayConfig::default();
        if !self.sources.is_empty() {
            let names: Vec<String> = self
                .sources
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            cfg.restrict_sources(&names)?;
        }
        for (id, enabled, proxy, timeout) in self.source_overrides() {
            let settings = cfg.source_mut(id);
            if let Some(enabled) = enabled {
                settings.enabled = enabled;
            }
            if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
                settings.proxy = Some(proxy.clone());
            }
            if let Some(secs) = timeout {
                settings.timeout = Some(Duration::from_secs(secs));
            }
        }
        cfg.musixmatch_token = self.musixmatch_token.clone().filter(|t| !t.is_empty());

        if let Some(key) = self.enrich_key.clone().filter(|k| !k.is_empty()) {
            cfg.enrich.api_key = Some(key);
        }
        if let Some(url) = &self.enrich_url {
            cfg.enrich.base_url = url.clone();
        }
        if let Some(model) = &self.enrich_model {
            cfg.enrich.model = model.clone();
        }
        if let Some(secs) = self.enrich_timeout_secs {
            cfg.enrich.timeout = Duration::from_secs(secs);
        }

        cfg.cache.path = self.cache_path.clone();
        if let Some(min) = self.min_score {
            cfg.matching.min_score = min;
        }
        cfg.translate.enabled = !self.no_translate;
        cfg.validate()?;
        Ok(cfg)
    }

    fn request(&self) -> LyricsRequest {
        let mut query = LyricsQuery::new(self.title.trim(), self.artist.trim());
        if let Some(album) = &self.album {
            query = query.with_album(album.trim());
        }
        if let Some(duration) = self.duration {
            query = query.with_duration(duration);
        }
        LyricsRequest {
            query,
            style: self.style.clone().filter(|s| !s.trim().is_empty()),
            client: self.client_key.clone().map(|api_key| ClientConfig {
                api_key,
                base_url: self.client_url.clone(),
                model: self.client_model.clone(),
            }),
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "lyricsflow=debug" } else { "lyricsflow=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug_log);

    let cfg = match cli.gateway_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let service = match LyricsService::from_config(&cfg).await {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start lyrics service");
            return ExitCode::FAILURE;
        }
    };

    let request = cli.request();
    match service.lookup(&request).await {
        LookupOutcome::Found { document, cache_hit } => {
            tracing::debug!(cache_hit, lines = document.lines.len(), "Lookup finished");
            match serde_json::to_string_pretty(&LyricsResponse::from(&document)) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                    ExitCode::FAILURE
                }
            }
        }
        LookupOutcome::NotFound(reason) => {
            tracing::warn!(title = %request.query.title, artist = %request.query.artist, %reason, "No lyrics found");
            ExitCode::from(EXIT_NOT_FOUND)
        }
    }
}
