use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{
    Activity, Address, CompanyRecord, Partner, RegistrationStatus, MAX_PARTNERS,
};
use crate::rate_limiter::RateLimiter;

/// Provenance tags, in provider-accuracy order.
pub const PRIMARY_SOURCE: &str = "Nuvem Fiscal";
pub const SECONDARY_SOURCE: &str = "CNPJ.ws";
pub const OPEN_SOURCE: &str = "BrasilAPI";

fn get_str(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

fn get_opt_str(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Some registries send enum-ish fields either as a plain string or as an
/// object with `descricao`/`codigo`.
fn str_or_descricao(v: &Value, key: &str) -> Option<String> {
    match v.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(obj @ Value::Object(_)) => {
            get_opt_str(obj, "descricao").or_else(|| get_opt_str(obj, "codigo"))
        }
        _ => None,
    }
}

fn parse_date_ymd(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

fn parse_opening_date(v: &Value) -> Option<NaiveDate> {
    for key in ["data_abertura", "data_inicio_atividade"] {
        if let Some(raw) = v.get(key).and_then(|x| x.as_str()) {
            if let Some(date) = parse_date_ymd(raw) {
                return Some(date);
            }
        }
    }
    None
}

// ============ Primary registry (OAuth2, listing + detail) ============

/// Client for the primary tax-registry provider. Listing is by CNAE subclass
/// plus optional IBGE municipality code; detail is per CNPJ. Every request
/// carries the bearer token obtained by `TokenAuthenticator` for the current
/// search.
pub struct FiscalRegistryService {
    client: Client,
    base_url: String,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl FiscalRegistryService {
    pub fn new(config: &Config, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: Client::new(),
            base_url: config.registry_base_url.clone(),
            timeout: config.request_timeout,
            limiter,
        }
    }

    /// Fetches the company listing for a CNAE subclass. An empty `data`
    /// array is a legitimate "no records" answer, distinct from the error
    /// path.
    pub async fn fetch_by_cnae(
        &self,
        token: &str,
        cnae: &str,
        uf: Option<&str>,
        municipality_code: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CompanyRecord>, AppError> {
        let mut params: Vec<(&str, String)> = vec![
            ("cnae_principal", cnae.to_string()),
            ("$top", limit.to_string()),
        ];
        if let Some(code) = municipality_code {
            params.push(("municipio", code.to_string()));
        } else if let Some(uf) = uf {
            params.push(("uf", uf.to_string()));
        }

        let url = reqwest::Url::parse_with_params(&format!("{}/cnpj", self.base_url), &params)
            .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::info!("Fetching primary registry listing for CNAE {}", cnae);

        self.limiter.acquire().await;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Primary registry request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Primary registry returned status {}: {}",
                status, error_text
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse listing response: {}", e))
        })?;

        let mut records = Vec::new();
        if let Some(items) = body.get("data").and_then(|d| d.as_array()) {
            for item in items {
                if let Some(record) = Self::parse_company(item) {
                    records.push(record);
                }
            }
        }

        tracing::info!("Primary registry returned {} companies", records.len());
        Ok(records)
    }

    /// Per-identifier detail lookup. Non-success responses degrade to `None`
    /// so the merge step can move on to the next source.
    pub async fn fetch_by_cnpj(
        &self,
        token: &str,
        cnpj: &str,
    ) -> Result<Option<CompanyRecord>, AppError> {
        let url = format!("{}/cnpj/{}", self.base_url, cnpj);

        self.limiter.acquire().await;
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Primary registry request failed: {}", e))
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                "Primary registry detail for {} returned status {}",
                cnpj,
                response.status()
            );
            return Ok(None);
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse detail response: {}", e))
        })?;

        Ok(Self::parse_company(&body))
    }

    fn parse_company(item: &Value) -> Option<CompanyRecord> {
        let cnpj = crate::models::normalize_cnpj(&get_str(item, "cnpj")).ok()?;

        let mut record =
            CompanyRecord::new(cnpj, get_str(item, "razao_social"), PRIMARY_SOURCE);
        record.trade_name = get_opt_str(item, "nome_fantasia");
        record.registration_status = str_or_descricao(item, "situacao_cadastral")
            .as_deref()
            .and_then(RegistrationStatus::from_provider);
        record.company_size = str_or_descricao(item, "porte");
        record.legal_nature = str_or_descricao(item, "natureza_juridica");
        record.opening_date = parse_opening_date(item);
        record.share_capital = item.get("capital_social").and_then(|v| v.as_f64());
        record.phone = get_opt_str(item, "telefone");
        record.email = get_opt_str(item, "email");

        let address = Address {
            street: get_str(item, "logradouro"),
            number: get_str(item, "numero"),
            complement: get_str(item, "complemento"),
            district: get_str(item, "bairro"),
            city: get_str(item, "municipio"),
            state: get_str(item, "uf"),
            postal_code: get_str(item, "cep"),
        };
        if !address.is_empty() {
            record.address = Some(address);
        }

        if let Some(code) = get_opt_str(item, "cnae_principal") {
            record.primary_activity = Some(Activity {
                code,
                description: get_str(item, "cnae_principal_descricao"),
                principal: true,
            });
        }

        Some(record)
    }
}

// ============ Secondary registry (commercial, key-gated) ============

/// Client for the secondary commercial registry. Only consulted when an API
/// key is configured.
pub struct CnpjWsService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl CnpjWsService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.cnpj_ws_base_url.clone(),
            api_key: config.cnpj_ws_api_key.clone(),
            timeout: config.request_timeout,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_period,
            )),
        }
    }

    pub fn configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn fetch_by_cnae(
        &self,
        cnae: &str,
        uf: Option<&str>,
        cidade: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CompanyRecord>, AppError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::ExternalApiError("Secondary registry API key not configured".to_string())
        })?;

        let mut params: Vec<(&str, String)> = vec![
            ("cnae_principal", cnae.to_string()),
            ("limite", limit.to_string()),
        ];
        if let Some(uf) = uf {
            params.push(("uf", uf.to_string()));
        }
        if let Some(cidade) = cidade {
            params.push(("municipio", cidade.to_string()));
        }

        let url =
            reqwest::Url::parse_with_params(&format!("{}/pesquisa", self.base_url), &params)
                .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::info!("Fetching secondary registry listing for CNAE {}", cnae);

        self.limiter.acquire().await;
        let response = self
            .client
            .get(url)
            .header("x_api_token", api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Secondary registry request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Secondary registry returned status {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse listing response: {}", e))
        })?;

        let mut records = Vec::new();
        if let Some(items) = body.get("data").and_then(|d| d.as_array()) {
            for item in items {
                if let Some(record) = Self::parse_company(item) {
                    records.push(record);
                }
            }
        }

        tracing::info!("Secondary registry returned {} companies", records.len());
        Ok(records)
    }

    pub async fn fetch_by_cnpj(&self, cnpj: &str) -> Result<Option<CompanyRecord>, AppError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::ExternalApiError("Secondary registry API key not configured".to_string())
        })?;

        let url = format!("{}/cnpj/{}", self.base_url, cnpj);

        self.limiter.acquire().await;
        let response = self
            .client
            .get(&url)
            .header("x_api_token", api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Secondary registry request failed: {}", e))
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                "Secondary registry detail for {} returned status {}",
                cnpj,
                response.status()
            );
            return Ok(None);
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse detail response: {}", e))
        })?;

        Ok(Self::parse_company(&body))
    }

    /// The secondary registry nests location and contact data under an
    /// `estabelecimento` object; corporate data sits at the top level.
    fn parse_company(item: &Value) -> Option<CompanyRecord> {
        let est = item.get("estabelecimento").unwrap_or(item);
        let raw_cnpj = get_opt_str(est, "cnpj").or_else(|| get_opt_str(item, "cnpj"))?;
        let cnpj = crate::models::normalize_cnpj(&raw_cnpj).ok()?;

        let mut record =
            CompanyRecord::new(cnpj, get_str(item, "razao_social"), SECONDARY_SOURCE);
        record.trade_name = get_opt_str(est, "nome_fantasia");
        record.registration_status = get_opt_str(est, "situacao_cadastral")
            .as_deref()
            .and_then(RegistrationStatus::from_provider);
        record.company_size = str_or_descricao(item, "porte");
        record.legal_nature = str_or_descricao(item, "natureza_juridica");
        record.opening_date = parse_opening_date(est);
        record.share_capital = item
            .get("capital_social")
            .and_then(|v| v.as_f64().or_else(|| v.as_str()?.parse().ok()));

        let phone = match (get_opt_str(est, "ddd1"), get_opt_str(est, "telefone1")) {
            (Some(ddd), Some(number)) => Some(format!("{}{}", ddd, number)),
            (None, Some(number)) => Some(number),
            _ => None,
        };
        record.phone = phone;
        record.email = get_opt_str(est, "email");

        let street = match (get_opt_str(est, "tipo_logradouro"), get_opt_str(est, "logradouro")) {
            (Some(kind), Some(name)) => format!("{} {}", kind, name),
            (None, Some(name)) => name,
            _ => String::new(),
        };
        let address = Address {
            street,
            number: get_str(est, "numero"),
            complement: get_str(est, "complemento"),
            district: get_str(est, "bairro"),
            city: est
                .get("cidade")
                .map(|c| get_str(c, "nome"))
                .unwrap_or_default(),
            state: est
                .get("estado")
                .map(|e| get_str(e, "sigla"))
                .unwrap_or_default(),
            postal_code: get_str(est, "cep"),
        };
        if !address.is_empty() {
            record.address = Some(address);
        }

        if let Some(activity) = est.get("atividade_principal") {
            let code = get_opt_str(activity, "subclasse").or_else(|| get_opt_str(activity, "id"));
            if let Some(code) = code {
                record.primary_activity = Some(Activity {
                    code,
                    description: get_str(activity, "descricao"),
                    principal: true,
                });
            }
        }
        if let Some(list) = est.get("atividades_secundarias").and_then(|v| v.as_array()) {
            for activity in list {
                let code =
                    get_opt_str(activity, "subclasse").or_else(|| get_opt_str(activity, "id"));
                if let Some(code) = code {
                    record.secondary_activities.push(Activity {
                        code,
                        description: get_str(activity, "descricao"),
                        principal: false,
                    });
                }
            }
        }

        Some(record)
    }
}

// ============ Tertiary open registry (free, lower fidelity) ============

/// Client for the free open registry. No credentials; used both as the last
/// listing fallback and as a per-record completion source.
pub struct OpenCnpjService {
    client: Client,
    base_url: String,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

/// IBGE codes for the municipalities most frequently queried; anything else
/// is resolved online.
const IBGE_MUNICIPALITIES: &[(&str, &str, &str)] = &[
    ("Uberlândia", "MG", "3170107"),
    ("São Paulo", "SP", "3550308"),
    ("Rio de Janeiro", "RJ", "3304557"),
    ("Belo Horizonte", "MG", "3106200"),
    ("Brasília", "DF", "5300108"),
    ("Curitiba", "PR", "4106902"),
    ("Porto Alegre", "RS", "4314902"),
    ("Salvador", "BA", "2927408"),
    ("Fortaleza", "CE", "2304400"),
    ("Recife", "PE", "2611606"),
];

impl OpenCnpjService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.open_registry_base_url.clone(),
            timeout: config.request_timeout,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_period,
            )),
        }
    }

    pub async fn fetch_by_cnae(
        &self,
        cnae: &str,
        uf: Option<&str>,
        cidade: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CompanyRecord>, AppError> {
        let mut params: Vec<(&str, String)> = vec![
            ("cnae", cnae.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(uf) = uf {
            params.push(("uf", uf.to_string()));
        }
        if let Some(cidade) = cidade {
            params.push(("municipio", cidade.to_string()));
        }

        let url = reqwest::Url::parse_with_params(
            &format!("{}/api/cnpj/v1", self.base_url),
            &params,
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::info!("Fetching open registry listing for CNAE {}", cnae);

        self.limiter.acquire().await;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Open registry request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Open registry returned status {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse listing response: {}", e))
        })?;

        let mut records = Vec::new();
        if let Some(items) = body.as_array() {
            for item in items {
                if let Some(record) = Self::parse_company(item) {
                    records.push(record);
                }
            }
        }

        tracing::info!("Open registry returned {} companies", records.len());
        Ok(records)
    }

    pub async fn fetch_by_cnpj(&self, cnpj: &str) -> Result<Option<CompanyRecord>, AppError> {
        let url = format!("{}/api/cnpj/v1/{}", self.base_url, cnpj);

        self.limiter.acquire().await;
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Open registry request failed: {}", e))
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                "Open registry detail for {} returned status {}",
                cnpj,
                response.status()
            );
            return Ok(None);
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse detail response: {}", e))
        })?;

        Ok(Self::parse_company(&body))
    }

    /// Resolves the IBGE code for a municipality, first from the static
    /// table, then from the open registry's municipality listing.
    pub async fn municipality_code(&self, cidade: &str, uf: &str) -> Option<String> {
        for (city, state, code) in IBGE_MUNICIPALITIES {
            if city.eq_ignore_ascii_case(cidade) && state.eq_ignore_ascii_case(uf) {
                return Some((*code).to_string());
            }
        }

        let url = format!("{}/api/ibge/municipios/v1/{}", self.base_url, uf);
        self.limiter.acquire().await;
        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!("Municipality lookup returned status {}", r.status());
                return None;
            }
            Err(e) => {
                tracing::warn!("Municipality lookup failed: {}", e);
                return None;
            }
        };

        let body: Value = response.json().await.ok()?;
        let wanted = cidade.trim().to_lowercase();
        body.as_array()?.iter().find_map(|m| {
            let name = get_str(m, "nome").trim().to_lowercase();
            if name == wanted {
                get_opt_str(m, "codigo_ibge").or_else(|| get_opt_str(m, "codigo"))
            } else {
                None
            }
        })
    }

    fn parse_company(item: &Value) -> Option<CompanyRecord> {
        let cnpj = crate::models::normalize_cnpj(&get_str(item, "cnpj")).ok()?;

        let mut record = CompanyRecord::new(cnpj, get_str(item, "razao_social"), OPEN_SOURCE);
        record.trade_name = get_opt_str(item, "nome_fantasia");
        record.registration_status = get_opt_str(item, "descricao_situacao_cadastral")
            .or_else(|| get_opt_str(item, "situacao_cadastral"))
            .as_deref()
            .and_then(RegistrationStatus::from_provider);
        record.company_size = get_opt_str(item, "porte");
        record.legal_nature = str_or_descricao(item, "natureza_juridica");
        record.opening_date = parse_opening_date(item);
        record.share_capital = item.get("capital_social").and_then(|v| v.as_f64());
        record.phone = get_opt_str(item, "ddd_telefone_1")
            .or_else(|| get_opt_str(item, "ddd_telefone_2"));
        record.email = get_opt_str(item, "email");

        let address = Address {
            street: get_opt_str(item, "logradouro")
                .or_else(|| get_opt_str(item, "descricao_tipo_de_logradouro"))
                .unwrap_or_default(),
            number: get_str(item, "numero"),
            complement: get_str(item, "complemento"),
            district: get_str(item, "bairro"),
            city: get_opt_str(item, "municipio")
                .or_else(|| get_opt_str(item, "cidade"))
                .unwrap_or_default(),
            state: get_str(item, "uf"),
            postal_code: get_str(item, "cep").replace('-', ""),
        };
        if !address.is_empty() {
            record.address = Some(address);
        }

        // cnae_fiscal arrives as a bare number
        if let Some(code) = item.get("cnae_fiscal").and_then(|v| {
            v.as_u64()
                .map(|n| n.to_string())
                .or_else(|| v.as_str().map(String::from))
        }) {
            record.primary_activity = Some(Activity {
                code,
                description: get_str(item, "cnae_fiscal_descricao"),
                principal: true,
            });
        }
        if let Some(list) = item.get("cnaes_secundarios").and_then(|v| v.as_array()) {
            for activity in list {
                let code = activity.get("codigo").and_then(|v| {
                    v.as_u64()
                        .map(|n| n.to_string())
                        .or_else(|| v.as_str().map(String::from))
                });
                if let Some(code) = code {
                    record.secondary_activities.push(Activity {
                        code,
                        description: get_str(activity, "descricao"),
                        principal: false,
                    });
                }
            }
        }

        // Ownership roster, capped defensively
        if let Some(qsa) = item.get("qsa").and_then(|v| v.as_array()) {
            for member in qsa.iter().take(MAX_PARTNERS) {
                let name = get_str(member, "nome_socio");
                if name.is_empty() {
                    continue;
                }
                record.partners.push(Partner {
                    name,
                    role: get_str(member, "qualificacao_socio"),
                    nationality: get_str(member, "pais"),
                });
            }
        }

        Some(record)
    }
}
