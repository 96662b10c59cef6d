use crate::models::CompanyRecord;
use crate::services::{CnpjWsService, FiscalRegistryService, OpenCnpjService};

/// Completes individual records by direct per-identifier lookups against the
/// other registries.
///
/// Consultation order is fixed by provider accuracy: primary detail, then the
/// open registry, then the commercial secondary when configured. Existing
/// values always win; a candidate only contributes where the record is empty.
pub struct FieldMerger<'a> {
    primary: &'a FiscalRegistryService,
    open: &'a OpenCnpjService,
    secondary: &'a CnpjWsService,
}

/// Copies candidate values into the record's empty slots. Returns whether
/// anything was filled, so the caller can update provenance.
pub fn apply_missing(record: &mut CompanyRecord, candidate: &CompanyRecord) -> bool {
    let mut contributed = false;

    if !record.has_address() && candidate.has_address() {
        record.address = candidate.address.clone();
        contributed = true;
    }
    if !record.has_phone() && candidate.has_phone() {
        record.phone = candidate.phone.clone();
        contributed = true;
    }
    if !record.has_email() && candidate.has_email() {
        record.email = candidate.email.clone();
        contributed = true;
    }
    if !record.has_primary_activity() && candidate.has_primary_activity() {
        record.primary_activity = candidate.primary_activity.clone();
        contributed = true;
    }

    // Corporate attributes ride along under the same fill-only-empty rule
    if record.trade_name.is_none() && candidate.trade_name.is_some() {
        record.trade_name = candidate.trade_name.clone();
        contributed = true;
    }
    if record.registration_status.is_none() && candidate.registration_status.is_some() {
        record.registration_status = candidate.registration_status;
        contributed = true;
    }
    if record.company_size.is_none() && candidate.company_size.is_some() {
        record.company_size = candidate.company_size.clone();
        contributed = true;
    }
    if record.legal_nature.is_none() && candidate.legal_nature.is_some() {
        record.legal_nature = candidate.legal_nature.clone();
        contributed = true;
    }
    if record.opening_date.is_none() && candidate.opening_date.is_some() {
        record.opening_date = candidate.opening_date;
        contributed = true;
    }
    if record.share_capital.is_none() && candidate.share_capital.is_some() {
        record.share_capital = candidate.share_capital;
        contributed = true;
    }
    if record.secondary_activities.is_empty() && !candidate.secondary_activities.is_empty() {
        record.secondary_activities = candidate.secondary_activities.clone();
        contributed = true;
    }
    if record.partners.is_empty() && !candidate.partners.is_empty() {
        record.partners = candidate.partners.clone();
        contributed = true;
    }

    contributed
}

fn has_gaps(record: &CompanyRecord) -> bool {
    !record.has_address()
        || !record.has_phone()
        || !record.has_email()
        || !record.has_primary_activity()
}

impl<'a> FieldMerger<'a> {
    pub fn new(
        primary: &'a FiscalRegistryService,
        open: &'a OpenCnpjService,
        secondary: &'a CnpjWsService,
    ) -> Self {
        Self {
            primary,
            open,
            secondary,
        }
    }

    /// Fills the record's gaps from the other registries, stopping as soon as
    /// nothing is missing. Lookup failures are logged and skipped; completion
    /// never fails a search.
    pub async fn complete(&self, record: &mut CompanyRecord, token: Option<&str>) {
        if !has_gaps(record) {
            return;
        }
        tracing::debug!("Completing record {} from fallback registries", record.cnpj);

        if let Some(token) = token {
            match self.primary.fetch_by_cnpj(token, &record.cnpj).await {
                Ok(Some(candidate)) => {
                    if apply_missing(record, &candidate) {
                        record.add_source(&candidate.source);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Primary completion for {} failed: {}", record.cnpj, e),
            }
            if !has_gaps(record) {
                return;
            }
        }

        match self.open.fetch_by_cnpj(&record.cnpj).await {
            Ok(Some(candidate)) => {
                if apply_missing(record, &candidate) {
                    record.add_source(&candidate.source);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Open completion for {} failed: {}", record.cnpj, e),
        }
        if !has_gaps(record) {
            return;
        }

        if self.secondary.configured() {
            match self.secondary.fetch_by_cnpj(&record.cnpj).await {
                Ok(Some(candidate)) => {
                    if apply_missing(record, &candidate) {
                        record.add_source(&candidate.source);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Secondary completion for {} failed: {}", record.cnpj, e)
                }
            }
        }
    }
}
