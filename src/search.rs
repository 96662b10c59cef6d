use std::sync::Arc;

use crate::auth::TokenAuthenticator;
use crate::cache::{SearchCache, SearchKey};
use crate::config::Config;
use crate::enrichment::{
    extract_domain, CompanyEnrichmentService, DomainDiscoveryService, EmailValidationService,
    PhoneValidationService, PlacesService,
};
use crate::errors::AppError;
use crate::merge::FieldMerger;
use crate::models::{normalize_cnae, normalize_cnpj, CompanyRecord, RecordSet};
use crate::rate_limiter::RateLimiter;
use crate::services::{CnpjWsService, FiscalRegistryService, OpenCnpjService};

/// Top-level lookup pipeline: cached, rate-limited search across the registry
/// fallback chain, followed by per-record completion and the enrichment
/// passes.
///
/// Everything runs sequentially on the caller's task; there is no internal
/// concurrency, so provider budgets are respected deterministically.
pub struct SearchService {
    cache: SearchCache,
    authenticator: TokenAuthenticator,
    primary: FiscalRegistryService,
    secondary: CnpjWsService,
    open: OpenCnpjService,
    places: PlacesService,
    phone_validation: PhoneValidationService,
    email_validation: EmailValidationService,
    domain_discovery: DomainDiscoveryService,
    company_enrichment: CompanyEnrichmentService,
}

impl SearchService {
    pub fn new(config: &Config) -> Self {
        // The auth endpoint and the primary registry share one budget
        let primary_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_period,
        ));

        Self {
            cache: SearchCache::new(config.cache_ttl),
            authenticator: TokenAuthenticator::new(config, Arc::clone(&primary_limiter)),
            primary: FiscalRegistryService::new(config, primary_limiter),
            secondary: CnpjWsService::new(config),
            open: OpenCnpjService::new(config),
            places: PlacesService::new(config),
            phone_validation: PhoneValidationService::new(config),
            email_validation: EmailValidationService::new(config),
            domain_discovery: DomainDiscoveryService::new(config),
            company_enrichment: CompanyEnrichmentService::new(config),
        }
    }

    /// Searches companies by CNAE subclass, optionally narrowed to a state
    /// and city, returning at most `limit` records.
    ///
    /// Identical parameter sets within the cache TTL are answered from
    /// memory without any provider traffic. An authentication failure ends
    /// the whole search empty; no provider is consulted with a missing
    /// token. Provider failures fall through the chain, and the first
    /// provider that yields a non-empty listing supplies the entire result.
    pub async fn search_by_cnae(
        &self,
        cnae: &str,
        uf: Option<&str>,
        cidade: Option<&str>,
        limit: usize,
    ) -> Result<RecordSet, AppError> {
        let cnae = normalize_cnae(cnae)?;
        let key = SearchKey {
            cnae: cnae.clone(),
            uf: uf.map(String::from),
            cidade: cidade.map(String::from),
            limit,
        };

        if let Some(hit) = self.cache.get(&key).await {
            tracing::info!("Returning cached results for CNAE {}", cnae);
            return Ok(hit);
        }

        let token = match self.authenticator.get_token().await {
            Some(t) => t,
            None => {
                tracing::warn!("Authentication failed; returning empty result set");
                return Ok(RecordSet::new());
            }
        };

        let mut records = self
            .fetch_listing(&token, &cnae, uf, cidade, limit)
            .await;
        records.truncate(limit);

        let merger = FieldMerger::new(&self.primary, &self.open, &self.secondary);
        for record in &mut records {
            merger.complete(record, Some(&token)).await;
            self.enrich(record).await;
        }

        let results = RecordSet::from(records);
        // Empty outcomes are never memoized: a provider hiccup must not
        // shadow real data for a whole TTL
        if !results.is_empty() {
            self.cache.put(&key, results.clone()).await;
        }

        tracing::info!(
            "Search for CNAE {} finished with {} records",
            cnae,
            results.len()
        );
        Ok(results)
    }

    /// Direct lookup of a single company, completed and enriched the same
    /// way as search results.
    pub async fn fetch_by_cnpj(&self, cnpj: &str) -> Result<Option<CompanyRecord>, AppError> {
        let cnpj = normalize_cnpj(cnpj)?;

        let token = match self.authenticator.get_token().await {
            Some(t) => t,
            None => {
                tracing::warn!("Authentication failed; skipping lookup for {}", cnpj);
                return Ok(None);
            }
        };

        let primary_hit = match self.primary.fetch_by_cnpj(&token, &cnpj).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Primary lookup for {} failed: {}", cnpj, e);
                None
            }
        };
        // Transport failures degrade to an empty answer; provider errors
        // never escape the pipeline
        let mut record = match primary_hit {
            Some(record) => record,
            None => match self.open.fetch_by_cnpj(&cnpj).await {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(None),
                Err(e) => {
                    tracing::warn!("Open lookup for {} failed: {}", cnpj, e);
                    return Ok(None);
                }
            },
        };

        let merger = FieldMerger::new(&self.primary, &self.open, &self.secondary);
        merger.complete(&mut record, Some(&token)).await;
        self.enrich(&mut record).await;

        Ok(Some(record))
    }

    /// Runs the registry fallback chain for a listing. Each provider is
    /// tried in accuracy order; an error or an empty listing moves on to the
    /// next, and lists from different providers are never mixed.
    async fn fetch_listing(
        &self,
        token: &str,
        cnae: &str,
        uf: Option<&str>,
        cidade: Option<&str>,
        limit: usize,
    ) -> Vec<CompanyRecord> {
        // The primary registry filters by IBGE municipality code, not name
        let municipality_code = match (cidade, uf) {
            (Some(cidade), Some(uf)) => self.open.municipality_code(cidade, uf).await,
            _ => None,
        };

        match self
            .primary
            .fetch_by_cnae(token, cnae, uf, municipality_code.as_deref(), limit)
            .await
        {
            Ok(records) if !records.is_empty() => return records,
            Ok(_) => tracing::info!("Primary registry returned no companies, trying fallback"),
            Err(e) => tracing::warn!("Primary registry listing failed: {}", e),
        }

        if self.secondary.configured() {
            match self.secondary.fetch_by_cnae(cnae, uf, cidade, limit).await {
                Ok(records) if !records.is_empty() => return records,
                Ok(_) => {
                    tracing::info!("Secondary registry returned no companies, trying fallback")
                }
                Err(e) => tracing::warn!("Secondary registry listing failed: {}", e),
            }
        }

        match self.open.fetch_by_cnae(cnae, uf, cidade, limit).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Open registry listing failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Applies the enrichment passes in their fixed order. Every pass is
    /// failure-isolated: it either contributes fields or leaves the record
    /// exactly as it was.
    async fn enrich(&self, record: &mut CompanyRecord) {
        self.apply_places(record).await;
        self.apply_phone_validation(record).await;
        self.apply_email_validation(record).await;
        self.apply_domain_discovery(record).await;
        self.apply_company_metadata(record).await;
    }

    async fn apply_places(&self, record: &mut CompanyRecord) {
        let name = record
            .trade_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&record.legal_name)
            .to_string();
        let (city, state) = match &record.address {
            Some(a) => (Some(a.city.clone()), Some(a.state.clone())),
            None => (None, None),
        };

        if let Some(contact) = self
            .places
            .find_contact(&name, city.as_deref(), state.as_deref())
            .await
        {
            let mut contributed = false;
            if record.enrichment.website.is_none() {
                if let Some(website) = contact.website {
                    record.enrichment.website = Some(website);
                    contributed = true;
                }
            }
            if !record.has_phone() {
                if let Some(phone) = contact.phone {
                    record.phone = Some(phone);
                    contributed = true;
                }
            }
            if contributed {
                record.add_source("Places");
            }
        }
    }

    async fn apply_phone_validation(&self, record: &mut CompanyRecord) {
        let phone = match record.phone.as_deref() {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => return,
        };
        if let Some(validation) = self.phone_validation.validate(&phone).await {
            record.enrichment.validated_phone = Some(validation.validated_phone);
            record.enrichment.phone_verdict = Some(validation.verdict);
            record.enrichment.line_type = validation.line_type;
        }
    }

    async fn apply_email_validation(&self, record: &mut CompanyRecord) {
        let email = match record.email.as_deref() {
            Some(e) if !e.trim().is_empty() => e.to_string(),
            _ => return,
        };
        if let Some(validation) = self.email_validation.validate(&email).await {
            record.enrichment.email_verdict = Some(validation.verdict);
            record.enrichment.email_suggestion = validation.suggestion;
        }
    }

    async fn apply_domain_discovery(&self, record: &mut CompanyRecord) {
        if record.enrichment.domain.is_some() {
            return;
        }

        // A website from the place lookup settles the domain without a
        // search-engine call
        if let Some(website) = record.enrichment.website.as_deref() {
            if let Some(domain) = extract_domain(website) {
                record.enrichment.domain = Some(domain);
                record.enrichment.domain_source = Some("website".to_string());
                return;
            }
        }

        let name = record
            .trade_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&record.legal_name)
            .to_string();
        let (city, state) = match &record.address {
            Some(a) => (Some(a.city.clone()), Some(a.state.clone())),
            None => (None, None),
        };

        if let Some(candidate) = self
            .domain_discovery
            .discover(&name, city.as_deref(), state.as_deref())
            .await
        {
            record.enrichment.domain = Some(candidate.domain);
            record.enrichment.domain_confidence = Some(candidate.confidence);
            record.enrichment.domain_source = Some("search".to_string());
        }
    }

    async fn apply_company_metadata(&self, record: &mut CompanyRecord) {
        let domain = match record.enrichment.domain.as_deref() {
            Some(d) => d.to_string(),
            None => return,
        };

        if let Some(profile) = self.company_enrichment.fetch(&domain).await {
            let e = &mut record.enrichment;
            if e.employee_range.is_none() {
                e.employee_range = profile.employee_range;
            }
            if e.industry.is_none() {
                e.industry = profile.industry;
            }
            if e.linkedin_url.is_none() {
                e.linkedin_url = profile.linkedin_url;
            }
            if e.twitter_url.is_none() {
                e.twitter_url = profile.twitter_url;
            }
            if e.facebook_url.is_none() {
                e.facebook_url = profile.facebook_url;
            }
            if e.instagram_url.is_none() {
                e.instagram_url = profile.instagram_url;
            }
            if e.logo_url.is_none() {
                e.logo_url = profile.logo_url;
            }
        }
    }
}
