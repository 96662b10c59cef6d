use moka::future::Cache;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::errors::AppError;
use crate::rate_limiter::RateLimiter;

/// Domains that are never a company's own website: social networks,
/// aggregators, map links and government portals.
pub const DOMAIN_DENYLIST: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "x.com",
    "twitter.com",
    "youtube.com",
    "linkedin.com",
    "wikipedia.org",
    "maps.google",
    "g.page",
    "gov.br",
    "tripadvisor",
    "ifood",
    "google.com",
];

pub fn is_denylisted(domain_or_url: &str) -> bool {
    let lower = domain_or_url.to_lowercase();
    DOMAIN_DENYLIST.iter().any(|d| lower.contains(d))
}

/// Reduces a URL to its bare host: scheme, `www.` prefix, path and query all
/// stripped.
pub fn extract_domain(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host).to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

// ============ Pass 1: place lookup ============

#[derive(Debug, Clone, Default)]
pub struct PlaceContact {
    pub website: Option<String>,
    pub phone: Option<String>,
}

/// Looks a company up in a places directory by name and city, pulling its
/// website and listed phone from the place details.
pub struct PlacesService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    enabled: bool,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl PlacesService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.places_base_url.clone(),
            api_key: config.places_api_key.clone(),
            enabled: config.enable_places,
            timeout: config.request_timeout,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_period,
            )),
        }
    }

    /// Returns `None` when the pass is disabled, unconfigured, or the lookup
    /// fails for any reason. Failures are logged and never escalate.
    pub async fn find_contact(
        &self,
        name: &str,
        city: Option<&str>,
        state: Option<&str>,
    ) -> Option<PlaceContact> {
        if !self.enabled {
            return None;
        }
        let api_key = match self.api_key.as_deref() {
            Some(k) => k,
            None => {
                tracing::debug!("Places API key not configured, skipping place lookup");
                return None;
            }
        };

        match self.try_find_contact(api_key, name, city, state).await {
            Ok(contact) => contact,
            Err(e) => {
                tracing::warn!("Place lookup for '{}' failed: {}", name, e);
                None
            }
        }
    }

    async fn try_find_contact(
        &self,
        api_key: &str,
        name: &str,
        city: Option<&str>,
        state: Option<&str>,
    ) -> Result<Option<PlaceContact>, AppError> {
        let mut query = name.to_string();
        if let Some(city) = city {
            query.push(' ');
            query.push_str(city);
        }
        if let Some(state) = state {
            query.push(' ');
            query.push_str(state);
        }

        let search_url = reqwest::Url::parse_with_params(
            &format!("{}/textsearch/json", self.base_url),
            &[("query", query.as_str()), ("key", api_key)],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        self.limiter.acquire().await;
        let response = self
            .client
            .get(search_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Place search failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Place search returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Bad place search body: {}", e)))?;

        let place_id = match body
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
            .and_then(|p| p.get("place_id"))
            .and_then(|v| v.as_str())
        {
            Some(id) => id.to_string(),
            None => return Ok(None),
        };

        let details_url = reqwest::Url::parse_with_params(
            &format!("{}/details/json", self.base_url),
            &[
                ("place_id", place_id.as_str()),
                (
                    "fields",
                    "website,international_phone_number,formatted_phone_number",
                ),
                ("key", api_key),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        self.limiter.acquire().await;
        let response = self
            .client
            .get(details_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Place details failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Place details returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Bad place details body: {}", e)))?;

        let result = match body.get("result") {
            Some(r) => r,
            None => return Ok(None),
        };

        let website = result
            .get("website")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|w| !w.is_empty() && !is_denylisted(w))
            .map(String::from);
        let phone = result
            .get("international_phone_number")
            .or_else(|| result.get("formatted_phone_number"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from);

        if website.is_none() && phone.is_none() {
            return Ok(None);
        }
        Ok(Some(PlaceContact { website, phone }))
    }
}

// ============ Pass 2: phone validation ============

#[derive(Debug, Clone)]
pub struct PhoneValidation {
    pub validated_phone: String,
    pub verdict: String,
    pub line_type: Option<String>,
}

/// Normalizes Brazilian phone numbers. Always produces an offline result;
/// upgrades it with provider data when a key is configured and the call
/// succeeds.
pub struct PhoneValidationService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    enabled: bool,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

/// Offline E.164 normalization for Brazilian numbers: keep the digits, drop a
/// leading country code, keep the trailing 11 digits (area code plus local
/// number) and prefix `+55`.
pub fn normalize_br_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let digits = digits.strip_prefix("55").unwrap_or(&digits);
    let tail: String = if digits.len() > 11 {
        digits.chars().skip(digits.len() - 11).collect()
    } else {
        digits.to_string()
    };
    if tail.is_empty() {
        return None;
    }
    Some(format!("+55{}", tail))
}

impl PhoneValidationService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.phone_validation_base_url.clone(),
            api_key: config.phone_validation_api_key.clone(),
            enabled: config.enable_phone_validation,
            timeout: config.request_timeout,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_period,
            )),
        }
    }

    /// Never returns `None` for a phone that has at least one digit: the
    /// offline normalization is the floor, the provider only improves on it.
    pub async fn validate(&self, raw_phone: &str) -> Option<PhoneValidation> {
        let offline = PhoneValidation {
            validated_phone: normalize_br_phone(raw_phone)?,
            verdict: "offline".to_string(),
            line_type: None,
        };

        if !self.enabled {
            return Some(offline);
        }
        let api_key = match self.api_key.as_deref() {
            Some(k) => k,
            None => return Some(offline),
        };

        match self.try_validate(api_key, &offline.validated_phone).await {
            Ok(Some(validated)) => Some(validated),
            Ok(None) => Some(offline),
            Err(e) => {
                tracing::warn!("Phone validation failed, keeping offline result: {}", e);
                Some(offline)
            }
        }
    }

    async fn try_validate(
        &self,
        api_key: &str,
        phone: &str,
    ) -> Result<Option<PhoneValidation>, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/", self.base_url),
            &[("api_key", api_key), ("phone", phone)],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        self.limiter.acquire().await;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Phone validation failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Phone validation returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Bad validation body: {}", e)))?;

        let valid = match body.get("valid").and_then(|v| v.as_bool()) {
            Some(v) => v,
            None => return Ok(None),
        };

        let international = body
            .get("format")
            .and_then(|f| f.get("international"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Some(PhoneValidation {
            validated_phone: international.unwrap_or_else(|| phone.to_string()),
            verdict: if valid { "valid" } else { "invalid" }.to_string(),
            line_type: body
                .get("type")
                .and_then(|v| v.as_str())
                .map(String::from),
        }))
    }
}

// ============ Pass 3: email validation ============

#[derive(Debug, Clone)]
pub struct EmailValidation {
    pub verdict: String,
    pub suggestion: Option<String>,
}

/// Validates deliverability of an email address. Provider calls are cached
/// per address, spaced by a minimum interval, and retried with exponential
/// backoff on throttling or server errors only.
pub struct EmailValidationService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    enabled: bool,
    timeout: Duration,
    min_interval: Duration,
    max_retries: u32,
    cache: Cache<String, EmailValidation>,
    last_call: Mutex<Option<Instant>>,
}

/// Exponential backoff for retryable provider responses. The exponent is
/// capped so oversized retry configurations cannot overflow the shift.
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(6))
}

impl EmailValidationService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.email_validation_base_url.clone(),
            api_key: config.email_validation_api_key.clone(),
            enabled: config.enable_email_validation,
            timeout: config.request_timeout,
            min_interval: config.email_min_interval,
            max_retries: config.email_max_retries.max(1),
            cache: Cache::builder().time_to_live(config.email_cache_ttl).build(),
            last_call: Mutex::new(None),
        }
    }

    /// Syntactically broken addresses are settled offline without spending a
    /// provider call; so is everything when no key is configured. A provider
    /// call that fails after all retries yields `None` and the record keeps
    /// its raw email untouched.
    pub async fn validate(&self, email: &str) -> Option<EmailValidation> {
        if !self.enabled {
            return None;
        }

        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return None;
        }
        if !email.contains('@') {
            return Some(EmailValidation {
                verdict: "invalid".to_string(),
                suggestion: None,
            });
        }

        let api_key = match self.api_key.as_deref() {
            Some(k) => k.to_string(),
            None => {
                return Some(EmailValidation {
                    verdict: "offline".to_string(),
                    suggestion: None,
                })
            }
        };

        if let Some(cached) = self.cache.get(&email).await {
            tracing::debug!("Email validation cache hit for {}", email);
            return Some(cached);
        }

        match self.try_validate(&api_key, &email).await {
            Ok(validation) => {
                self.cache.insert(email, validation.clone()).await;
                Some(validation)
            }
            Err(e) => {
                tracing::warn!("Email validation for {} failed: {}", email, e);
                None
            }
        }
    }

    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn try_validate(&self, api_key: &str, email: &str) -> Result<EmailValidation, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/", self.base_url),
            &[("api_key", api_key), ("email", email)],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        for attempt in 0..self.max_retries {
            self.pace().await;

            let response = self
                .client
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await;

            let retryable = match &response {
                Ok(r) => {
                    let status = r.status();
                    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
                }
                // Transport failures are not retried
                Err(_) => false,
            };

            match response {
                Ok(r) if r.status().is_success() => {
                    let body: Value = r.json().await.map_err(|e| {
                        AppError::ExternalApiError(format!("Bad validation body: {}", e))
                    })?;
                    return Ok(Self::parse_verdict(&body));
                }
                Ok(r) if retryable && attempt + 1 < self.max_retries => {
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(
                        "Email validation returned status {}, retrying in {:?}",
                        r.status(),
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Ok(r) => {
                    return Err(AppError::ExternalApiError(format!(
                        "Email validation returned status {}",
                        r.status()
                    )));
                }
                Err(e) => {
                    return Err(AppError::ExternalApiError(format!(
                        "Email validation request failed: {}",
                        e
                    )));
                }
            }
        }

        Err(AppError::ExternalApiError(
            "Email validation retries exhausted".to_string(),
        ))
    }

    fn parse_verdict(body: &Value) -> EmailValidation {
        let verdict = body
            .get("deliverability")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_lowercase();
        let suggestion = body
            .get("autocorrect")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        EmailValidation {
            verdict,
            suggestion,
        }
    }
}

// ============ Pass 4: domain discovery ============

/// A discovered domain only counts when its evidence score reaches this
/// threshold.
pub const MIN_DOMAIN_SCORE: f64 = 0.6;

const LEGAL_SUFFIXES: &[&str] = &["ltda", "eireli", "epp", "mei", "sa"];
const STOP_WORDS: &[&str] = &["de", "da", "do", "das", "dos", "e", "em", "com", "para"];

#[derive(Debug, Clone)]
pub struct DomainCandidate {
    pub domain: String,
    pub confidence: f64,
}

/// Finds a company's web domain through a search engine, scoring each result
/// by how strongly it matches the company name and location.
pub struct DomainDiscoveryService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    enabled: bool,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
    token_re: Regex,
}

/// Significant tokens of a company name: lowercased alphanumeric runs with
/// legal suffixes, connective words and anything shorter than three
/// characters dropped.
pub fn tokenize_company_name(name: &str, token_re: &Regex) -> Vec<String> {
    token_re
        .find_iter(&name.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|t| {
            t.len() >= 3 && !LEGAL_SUFFIXES.contains(&t.as_str()) && !STOP_WORDS.contains(&t.as_str())
        })
        .collect()
}

/// Evidence score for a search result. Name tokens appearing in the domain
/// weigh most; title matches and a Brazilian commercial TLD add smaller
/// amounts; denylisted domains take a heavy penalty. Clamped to [0, 1].
pub fn score_candidate(
    domain: &str,
    title: &str,
    name_tokens: &[String],
    city: Option<&str>,
    state: Option<&str>,
) -> f64 {
    let domain_lower = domain.to_lowercase();
    let title_lower = title.to_lowercase();
    let mut score: f64 = 0.0;

    if name_tokens.iter().any(|t| domain_lower.contains(t.as_str())) {
        score += 0.4;
    }
    if name_tokens.iter().any(|t| title_lower.contains(t.as_str())) {
        score += 0.2;
    }
    if let Some(city) = city {
        if !city.is_empty() && title_lower.contains(&city.to_lowercase()) {
            score += 0.1;
        }
    }
    if let Some(state) = state {
        if !state.is_empty() && title_lower.contains(&state.to_lowercase()) {
            score += 0.05;
        }
    }
    if domain_lower.ends_with(".com.br") {
        score += 0.1;
    }
    if is_denylisted(&domain_lower) {
        score -= 0.7;
    }

    score.clamp(0.0, 1.0)
}

pub fn meets_threshold(score: f64) -> bool {
    score >= MIN_DOMAIN_SCORE
}

impl DomainDiscoveryService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.domain_search_base_url.clone(),
            api_key: config.domain_search_api_key.clone(),
            enabled: config.enable_domain_discovery,
            timeout: config.request_timeout,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_period,
            )),
            // Alphanumeric runs only; accents are treated as separators
            token_re: Regex::new("[a-z0-9]+").expect("static pattern is valid"),
        }
    }

    pub async fn discover(
        &self,
        name: &str,
        city: Option<&str>,
        state: Option<&str>,
    ) -> Option<DomainCandidate> {
        if !self.enabled {
            return None;
        }
        let api_key = match self.api_key.as_deref() {
            Some(k) => k,
            None => {
                tracing::debug!("Domain search API key not configured, skipping discovery");
                return None;
            }
        };

        match self.try_discover(api_key, name, city, state).await {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!("Domain discovery for '{}' failed: {}", name, e);
                None
            }
        }
    }

    async fn try_discover(
        &self,
        api_key: &str,
        name: &str,
        city: Option<&str>,
        state: Option<&str>,
    ) -> Result<Option<DomainCandidate>, AppError> {
        let name_tokens = tokenize_company_name(name, &self.token_re);
        if name_tokens.is_empty() {
            return Ok(None);
        }

        let mut query = name.to_string();
        if let Some(city) = city {
            query.push(' ');
            query.push_str(city);
        }

        let url = reqwest::Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[
                ("engine", "google"),
                ("q", query.as_str()),
                ("api_key", api_key),
                ("num", "5"),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        self.limiter.acquire().await;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Domain search failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Domain search returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Bad search body: {}", e)))?;

        let mut best: Option<DomainCandidate> = None;
        if let Some(results) = body.get("organic_results").and_then(|r| r.as_array()) {
            // At most five candidates are scored even if the provider
            // ignores the requested page size
            for result in results.iter().take(5) {
                let link = result.get("link").and_then(|v| v.as_str()).unwrap_or("");
                let title = result.get("title").and_then(|v| v.as_str()).unwrap_or("");
                let domain = match extract_domain(link) {
                    Some(d) => d,
                    None => continue,
                };
                // Denylisted hosts are excluded outright, on top of the
                // scoring penalty
                if is_denylisted(&domain) {
                    continue;
                }

                let score = score_candidate(&domain, title, &name_tokens, city, state);
                tracing::debug!("Domain candidate {} scored {:.2}", domain, score);
                if best.as_ref().map_or(true, |b| score > b.confidence) {
                    best = Some(DomainCandidate {
                        domain,
                        confidence: score,
                    });
                }
            }
        }

        Ok(best.filter(|c| meets_threshold(c.confidence)))
    }
}

// ============ Pass 5: company metadata ============

#[derive(Debug, Clone, Default)]
pub struct CompanyProfile {
    pub employee_range: Option<String>,
    pub industry: Option<String>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
    pub facebook_url: Option<String>,
    pub instagram_url: Option<String>,
    pub logo_url: Option<String>,
}

impl CompanyProfile {
    pub fn is_empty(&self) -> bool {
        self.employee_range.is_none()
            && self.industry.is_none()
            && self.linkedin_url.is_none()
            && self.twitter_url.is_none()
            && self.facebook_url.is_none()
            && self.instagram_url.is_none()
            && self.logo_url.is_none()
    }
}

/// Fetches firmographic metadata (headcount range, industry, social profiles)
/// for a company domain.
pub struct CompanyEnrichmentService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    enabled: bool,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl CompanyEnrichmentService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.company_enrichment_base_url.clone(),
            api_key: config.company_enrichment_api_key.clone(),
            enabled: config.enable_company_enrichment,
            timeout: config.request_timeout,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_period,
            )),
        }
    }

    pub async fn fetch(&self, domain: &str) -> Option<CompanyProfile> {
        if !self.enabled || domain.trim().is_empty() {
            return None;
        }
        let api_key = match self.api_key.as_deref() {
            Some(k) => k,
            None => {
                tracing::debug!("Company enrichment API key not configured, skipping");
                return None;
            }
        };

        match self.try_fetch(api_key, domain).await {
            Ok(profile) => profile.filter(|p| !p.is_empty()),
            Err(e) => {
                tracing::warn!("Company enrichment for {} failed: {}", domain, e);
                None
            }
        }
    }

    async fn try_fetch(
        &self,
        api_key: &str,
        domain: &str,
    ) -> Result<Option<CompanyProfile>, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/", self.base_url),
            &[("api_key", api_key), ("domain", domain)],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        self.limiter.acquire().await;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Company enrichment failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Company enrichment returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Bad enrichment body: {}", e)))?;

        let opt = |v: Option<&Value>| -> Option<String> {
            v.and_then(|x| x.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let social = body.get("social_media");

        Ok(Some(CompanyProfile {
            employee_range: opt(body.get("employees_range")),
            industry: opt(body.get("industry")),
            linkedin_url: opt(social.and_then(|s| s.get("linkedin_url"))),
            twitter_url: opt(social.and_then(|s| s.get("twitter_url"))),
            facebook_url: opt(social.and_then(|s| s.get("facebook_url"))),
            instagram_url: opt(social.and_then(|s| s.get("instagram_url"))),
            logo_url: opt(body.get("logo")),
        }))
    }
}
