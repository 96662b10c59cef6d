use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Partners parsed from registry filings are capped defensively; some open
/// registries return the full historical roster.
pub const MAX_PARTNERS: usize = 10;

/// Strips punctuation from a CNPJ and enforces the 14-digit invariant.
///
/// Records whose identifier fails this check are rejected at the boundary
/// and never stored.
pub fn normalize_cnpj(raw: &str) -> Result<String, AppError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 14 {
        return Err(AppError::InvalidInput(format!(
            "CNPJ must have exactly 14 digits, got '{}'",
            raw
        )));
    }
    Ok(digits)
}

/// Strips separators from a CNAE code ("5611-2/01" -> "5611201") and
/// enforces the 7-digit subclass format used as the search key.
pub fn normalize_cnae(raw: &str) -> Result<String, AppError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 7 {
        return Err(AppError::InvalidInput(format!(
            "CNAE code must have 7 digits, got '{}'",
            raw
        )));
    }
    Ok(digits)
}

/// Full CNPJ check-digit validation (mod-11 over the first 12 and 13 digits).
/// Lookup only requires the 14-digit shape; this is available to callers that
/// want to filter out typo identifiers before spending a provider call.
pub fn is_valid_cnpj(raw: &str) -> bool {
    let cnpj: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if cnpj.len() != 14 {
        return false;
    }
    let digits: Vec<u32> = cnpj.chars().filter_map(|c| c.to_digit(10)).collect();
    // All-equal digits pass the checksum but are not real registrations
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    let check = |weights: &[u32], len: usize| -> u32 {
        let sum: u32 = (0..len).map(|i| digits[i] * weights[i]).sum();
        if sum % 11 < 2 {
            0
        } else {
            11 - (sum % 11)
        }
    };

    let w1 = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    if digits[12] != check(&w1, 12) {
        return false;
    }
    let w2 = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    digits[13] == check(&w2, 13)
}

/// Registration status as reported by the federal registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Active,
    Suspended,
    Cancelled,
    Unfit,
}

impl RegistrationStatus {
    /// Maps the registry's status strings ("ATIVA", "SUSPENSA", "BAIXADA",
    /// "INAPTA") to the canonical enum. Unknown strings map to `None` rather
    /// than guessing.
    pub fn from_provider(raw: &str) -> Option<Self> {
        let s = raw.trim().to_uppercase();
        if s.contains("ATIVA") && !s.contains("INATIVA") {
            Some(RegistrationStatus::Active)
        } else if s.contains("SUSPENSA") {
            Some(RegistrationStatus::Suspended)
        } else if s.contains("BAIXADA") {
            Some(RegistrationStatus::Cancelled)
        } else if s.contains("INAPTA") {
            Some(RegistrationStatus::Unfit)
        } else {
            None
        }
    }
}

/// Company address. Partial addresses are legal; an address with every field
/// empty is equivalent to no address at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    pub complement: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.street.is_empty()
            && self.number.is_empty()
            && self.complement.is_empty()
            && self.district.is_empty()
            && self.city.is_empty()
            && self.state.is_empty()
            && self.postal_code.is_empty()
    }
}

/// Economic-activity classification (CNAE) entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub code: String,
    pub description: String,
    pub principal: bool,
}

/// Ownership roster entry from registry filings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub name: String,
    pub role: String,
    pub nationality: String,
}

/// Fields attached by the optional enrichment passes. Every field starts
/// empty and is only set when the corresponding pass succeeds; passes never
/// remove or blank previously-populated data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrichment {
    pub website: Option<String>,
    pub validated_phone: Option<String>,
    pub phone_verdict: Option<String>,
    pub line_type: Option<String>,
    pub email_verdict: Option<String>,
    pub email_suggestion: Option<String>,
    pub domain: Option<String>,
    pub domain_confidence: Option<f64>,
    pub domain_source: Option<String>,
    pub employee_range: Option<String>,
    pub industry: Option<String>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
    pub facebook_url: Option<String>,
    pub instagram_url: Option<String>,
    pub logo_url: Option<String>,
}

/// Canonical company record assembled from provider payloads.
///
/// Created by exactly one provider adapter per top-level fetch; gaps are
/// filled in place by the merge step and the enrichment passes (additive
/// only). Staleness is governed by cache eviction, never by mutating a
/// stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    /// Normalized 14-digit registry identifier.
    pub cnpj: String,
    pub legal_name: String,
    pub trade_name: Option<String>,
    pub registration_status: Option<RegistrationStatus>,
    pub company_size: Option<String>,
    pub legal_nature: Option<String>,
    pub opening_date: Option<NaiveDate>,
    pub share_capital: Option<f64>,
    pub address: Option<Address>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub primary_activity: Option<Activity>,
    pub secondary_activities: Vec<Activity>,
    pub partners: Vec<Partner>,
    /// Audit tag recording which provider(s) contributed data. Always set.
    pub source: String,
    pub retrieved_at: DateTime<Utc>,
    pub enrichment: Enrichment,
}

impl CompanyRecord {
    /// A fresh record carrying only identity and provenance; adapters fill
    /// the rest from the raw payload.
    pub fn new(cnpj: String, legal_name: String, source: &str) -> Self {
        Self {
            cnpj,
            legal_name,
            trade_name: None,
            registration_status: None,
            company_size: None,
            legal_nature: None,
            opening_date: None,
            share_capital: None,
            address: None,
            phone: None,
            email: None,
            primary_activity: None,
            secondary_activities: Vec::new(),
            partners: Vec::new(),
            source: source.to_string(),
            retrieved_at: Utc::now(),
            enrichment: Enrichment::default(),
        }
    }

    pub fn has_address(&self) -> bool {
        self.address.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn has_phone(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    pub fn has_primary_activity(&self) -> bool {
        self.primary_activity.is_some()
    }

    /// Appends a contributing source to the provenance tag.
    pub fn add_source(&mut self, source: &str) {
        if !self.source.split("; ").any(|s| s == source) {
            self.source.push_str("; ");
            self.source.push_str(source);
        }
    }
}

/// Ordered, in-memory record collection handed to export collaborators.
/// Records stay in provider-response order; reordering is the export layer's
/// concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSet {
    records: Vec<CompanyRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: CompanyRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompanyRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[CompanyRecord] {
        &self.records
    }

    pub fn into_vec(self) -> Vec<CompanyRecord> {
        self.records
    }
}

impl From<Vec<CompanyRecord>> for RecordSet {
    fn from(records: Vec<CompanyRecord>) -> Self {
        Self { records }
    }
}
