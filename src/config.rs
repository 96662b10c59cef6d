use serde::Deserialize;
use std::time::Duration;

/// Pipeline configuration. Built once and passed explicitly to every
/// component constructor so tests can point each external surface at a fake.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Primary registry (OAuth2 client-credentials + listing + detail)
    pub registry_client_id: Option<String>,
    pub registry_client_secret: Option<String>,
    pub registry_auth_url: String,
    pub registry_base_url: String,

    // Secondary registry (listing + detail, commercial key)
    pub cnpj_ws_base_url: String,
    pub cnpj_ws_api_key: Option<String>,

    // Tertiary open registry (free, lower fidelity)
    pub open_registry_base_url: String,

    // Enrichment pass 1: place lookup
    pub enable_places: bool,
    pub places_api_key: Option<String>,
    pub places_base_url: String,

    // Enrichment pass 2: phone validation
    pub enable_phone_validation: bool,
    pub phone_validation_api_key: Option<String>,
    pub phone_validation_base_url: String,

    // Enrichment pass 3: email validation
    pub enable_email_validation: bool,
    pub email_validation_api_key: Option<String>,
    pub email_validation_base_url: String,
    pub email_cache_ttl: Duration,
    pub email_min_interval: Duration,
    pub email_max_retries: u32,

    // Enrichment pass 4: domain discovery
    pub enable_domain_discovery: bool,
    pub domain_search_api_key: Option<String>,
    pub domain_search_base_url: String,

    // Enrichment pass 5: company metadata
    pub enable_company_enrichment: bool,
    pub company_enrichment_api_key: Option<String>,
    pub company_enrichment_base_url: String,

    // Outbound throttling: at most `rate_limit_requests` calls to a single
    // provider per `rate_limit_period`
    pub rate_limit_requests: u32,
    pub rate_limit_period: Duration,

    pub cache_ttl: Duration,
    pub request_timeout: Duration,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_url(key: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(key).unwrap_or_else(|_| default.to_string());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", key);
    }
    Ok(url)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1")
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a positive integer", key)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            registry_client_id: env_opt("REGISTRY_CLIENT_ID"),
            registry_client_secret: env_opt("REGISTRY_CLIENT_SECRET"),
            registry_auth_url: env_url(
                "REGISTRY_AUTH_URL",
                "https://auth.nuvemfiscal.com.br/oauth/token",
            )?,
            registry_base_url: env_url("REGISTRY_BASE_URL", "https://api.nuvemfiscal.com.br")?,
            cnpj_ws_base_url: env_url("CNPJ_WS_BASE_URL", "https://comercial.cnpj.ws")?,
            cnpj_ws_api_key: env_opt("CNPJ_WS_API_KEY"),
            open_registry_base_url: env_url("OPEN_REGISTRY_BASE_URL", "https://brasilapi.com.br")?,
            enable_places: env_bool("ENABLE_PLACES", true),
            places_api_key: env_opt("PLACES_API_KEY"),
            places_base_url: env_url(
                "PLACES_BASE_URL",
                "https://maps.googleapis.com/maps/api/place",
            )?,
            enable_phone_validation: env_bool("ENABLE_PHONE_VALIDATION", true),
            phone_validation_api_key: env_opt("PHONE_VALIDATION_API_KEY"),
            phone_validation_base_url: env_url(
                "PHONE_VALIDATION_BASE_URL",
                "https://phonevalidation.abstractapi.com/v1",
            )?,
            enable_email_validation: env_bool("ENABLE_EMAIL_VALIDATION", true),
            email_validation_api_key: env_opt("EMAIL_VALIDATION_API_KEY"),
            email_validation_base_url: env_url(
                "EMAIL_VALIDATION_BASE_URL",
                "https://emailvalidation.abstractapi.com/v1",
            )?,
            email_cache_ttl: Duration::from_secs(env_u64("EMAIL_CACHE_TTL_SECS", 3600)?),
            email_min_interval: Duration::from_millis(env_u64(
                "EMAIL_MIN_INTERVAL_MS",
                1000,
            )?),
            email_max_retries: env_u64("EMAIL_MAX_RETRIES", 3)? as u32,
            enable_domain_discovery: env_bool("ENABLE_DOMAIN_DISCOVERY", true),
            domain_search_api_key: env_opt("DOMAIN_SEARCH_API_KEY"),
            domain_search_base_url: env_url("DOMAIN_SEARCH_BASE_URL", "https://serpapi.com")?,
            enable_company_enrichment: env_bool("ENABLE_COMPANY_ENRICHMENT", true),
            company_enrichment_api_key: env_opt("COMPANY_ENRICHMENT_API_KEY"),
            company_enrichment_base_url: env_url(
                "COMPANY_ENRICHMENT_BASE_URL",
                "https://companyenrichment.abstractapi.com/v2",
            )?,
            rate_limit_requests: env_u64("RATE_LIMIT_REQUESTS", 10)? as u32,
            rate_limit_period: Duration::from_secs(env_u64("RATE_LIMIT_PERIOD_SECS", 1)?),
            cache_ttl: Duration::from_secs(env_u64("CACHE_TTL_SECS", 3600)?),
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 30)?),
        };

        if config.registry_client_id.is_none() || config.registry_client_secret.is_none() {
            tracing::warn!(
                "Primary registry credentials not configured; authentication will fail \
                 and searches will come back empty"
            );
        }

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Registry base URL: {}", config.registry_base_url);
        tracing::debug!("Open registry base URL: {}", config.open_registry_base_url);

        Ok(config)
    }
}
