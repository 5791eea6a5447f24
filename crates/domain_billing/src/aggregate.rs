//! Bill aggregate
//!
//! [`BillAggregate`] creates and edits a bill together with its line items
//! as one consistent unit. Every command is validated before a unit of work
//! is opened; catalog lookups also happen up front so the bill row is held
//! only for the read-compute-write sequence itself.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use core_kernel::{BillId, BilledServiceId, DocumentId, Money, Rate, ServiceId};

use crate::audit::{AuditAction, AuditRecord, AuditSubject, AuditTrailRecorder, FieldChanges};
use crate::bill::{Bill, BillWithServices, BilledService, DiscountKind, PaymentHistory, SeniorPwdDiscount};
use crate::error::BillingError;
use crate::pagination::{CursorPaginator, KeysetSource, Page, PageRequest, Seek};
use crate::ports::{BillFilter, CatalogService, LedgerStore, LedgerTx, MasterDataPort};
use crate::principal::Principal;

/// A catalog service to bill
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LineItemRequest {
    pub service_id: ServiceId,
    pub quantity: i32,
}

/// A requested senior citizen / PWD discount
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscountRequest {
    pub kind: DiscountKind,
    /// Percentage, e.g. 20 for 20%
    pub rate: Decimal,
    pub id_number: Option<String>,
}

impl DiscountRequest {
    /// Checks the identifying data and rate
    pub fn validate(&self) -> Result<SeniorPwdDiscount, BillingError> {
        let id_number = self
            .id_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                BillingError::validation(format!(
                    "a {} discount requires an identification number",
                    self.kind.as_str()
                ))
            })?;

        let rate = Rate::from_percentage(self.rate);
        if !rate.is_valid_discount() {
            return Err(BillingError::validation(format!(
                "discount rate must be greater than 0 and at most 100, got {}",
                self.rate
            )));
        }

        Ok(SeniorPwdDiscount {
            kind: self.kind,
            rate,
            id_number: id_number.to_string(),
        })
    }
}

/// Creates a bill for one medical documentation record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateBillCommand {
    pub medical_documentation_id: DocumentId,
    #[serde(default)]
    pub services: Vec<LineItemRequest>,
    pub discount: Option<DiscountRequest>,
    pub consultation_fee: Money,
    pub notes: Option<String>,
}

/// New quantity for an existing line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LineItemQuantityChange {
    pub billed_service_id: BilledServiceId,
    pub quantity: i32,
}

/// Change to the bill's discount
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DiscountChange {
    Apply(DiscountRequest),
    Remove,
}

/// Edits a bill
///
/// Absent fields (`None`, empty lists) leave the bill alone. A present value
/// equal to the current one is not a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdateBillCommand {
    pub services_to_add: Vec<LineItemRequest>,
    pub services_to_remove: Vec<BilledServiceId>,
    pub services_to_update: Vec<LineItemQuantityChange>,
    pub discount: Option<DiscountChange>,
    pub consultation_fee: Option<Money>,
    /// An empty string clears the notes
    pub notes: Option<String>,
}

impl UpdateBillCommand {
    /// Checks everything that does not need stored state
    pub fn validate(&self) -> Result<(), BillingError> {
        for line in &self.services_to_add {
            validate_quantity(line.quantity)?;
        }
        for change in &self.services_to_update {
            validate_quantity(change.quantity)?;
        }
        if let Some(fee) = self.consultation_fee {
            validate_fee(fee)?;
        }
        if let Some(DiscountChange::Apply(request)) = &self.discount {
            request.validate()?;
        }

        let removed: HashSet<_> = self.services_to_remove.iter().collect();
        if let Some(change) = self
            .services_to_update
            .iter()
            .find(|c| removed.contains(&c.billed_service_id))
        {
            return Err(BillingError::validation(format!(
                "billed service {} cannot be both updated and removed",
                change.billed_service_id
            )));
        }
        Ok(())
    }
}

fn validate_quantity(quantity: i32) -> Result<(), BillingError> {
    if quantity <= 0 {
        return Err(BillingError::validation(format!(
            "quantity must be a positive number, got {}",
            quantity
        )));
    }
    Ok(())
}

fn validate_fee(fee: Money) -> Result<(), BillingError> {
    if fee.is_negative() {
        return Err(BillingError::validation("consultation fee cannot be negative"));
    }
    Ok(())
}

fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// Bills matching a filter, as a keyset source
pub struct BillListing<'a> {
    store: &'a dyn LedgerStore,
    filter: &'a BillFilter,
}

#[async_trait::async_trait]
impl KeysetSource for BillListing<'_> {
    type Item = Bill;

    async fn fetch(&self, seek: &Seek) -> Result<Vec<Bill>, BillingError> {
        Ok(self.store.seek_bills(self.filter, seek).await?)
    }
}

/// Creates, edits, reads and archives bills
#[derive(Clone)]
pub struct BillAggregate {
    store: Arc<dyn LedgerStore>,
    master_data: Arc<dyn MasterDataPort>,
    audit: AuditTrailRecorder,
    paginator: CursorPaginator,
}

impl BillAggregate {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        master_data: Arc<dyn MasterDataPort>,
        paginator: CursorPaginator,
    ) -> Self {
        Self {
            audit: AuditTrailRecorder::new(store.clone()),
            store,
            master_data,
            paginator,
        }
    }

    /// Looks up a catalog service and checks it can be billed
    async fn billable_service(&self, id: ServiceId) -> Result<CatalogService, BillingError> {
        let service = self
            .master_data
            .find_service(id)
            .await?
            .ok_or(BillingError::ServiceNotFound(id))?;

        if !service.is_active {
            return Err(BillingError::ServiceDeactivated { id, name: service.name });
        }
        if !service.is_available {
            return Err(BillingError::ServiceUnavailable { id, name: service.name });
        }
        Ok(service)
    }

    async fn billable_services(
        &self,
        requests: &[LineItemRequest],
    ) -> Result<Vec<(CatalogService, i32)>, BillingError> {
        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            resolved.push((self.billable_service(request.service_id).await?, request.quantity));
        }
        Ok(resolved)
    }

    /// Creates a bill with its line items
    #[instrument(skip(self, command, principal), fields(document_id = %command.medical_documentation_id))]
    pub async fn create(
        &self,
        command: CreateBillCommand,
        principal: &Principal,
    ) -> Result<BillWithServices, BillingError> {
        validate_fee(command.consultation_fee)?;
        for line in &command.services {
            validate_quantity(line.quantity)?;
        }
        let discount = command.discount.as_ref().map(DiscountRequest::validate).transpose()?;

        let document_id = command.medical_documentation_id;
        self.master_data
            .find_document(document_id)
            .await?
            .ok_or(BillingError::DocumentNotFound(document_id))?;
        let catalog = self.billable_services(&command.services).await?;

        let mut tx = self.store.begin().await?;
        if tx.bill_for_document(document_id).await?.is_some() {
            return Err(BillingError::DuplicateBill(document_id));
        }

        let mut bill = Bill::new(
            document_id,
            command.consultation_fee,
            discount,
            normalize_notes(command.notes),
            principal,
        );
        let services: Vec<BilledService> = catalog
            .into_iter()
            .map(|(service, quantity)| {
                BilledService::new(bill.id, service.id, service.name, service.category, service.price, quantity)
            })
            .collect();
        bill.recompute(&services);

        tx.insert_bill(&bill).await?;
        self.audit
            .record(tx.as_mut(), AuditRecord::created(AuditSubject::Bill, bill.id, bill.audit_snapshot()), principal)
            .await?;

        for line in &services {
            tx.insert_billed_service(line).await?;
            self.audit
                .record(
                    tx.as_mut(),
                    AuditRecord::created(AuditSubject::BilledService, line.id, line.audit_snapshot()),
                    principal,
                )
                .await?;
        }

        tx.commit().await?;
        info!(
            bill_id = %bill.id,
            total_amount = %bill.total_amount(),
            lines = services.len(),
            "Bill created"
        );

        Ok(BillWithServices { bill, services })
    }

    /// Applies an update command
    #[instrument(skip(self, command, principal), fields(bill_id = %bill_id))]
    pub async fn update(
        &self,
        bill_id: BillId,
        command: UpdateBillCommand,
        principal: &Principal,
    ) -> Result<BillWithServices, BillingError> {
        command.validate()?;
        let additions = self.billable_services(&command.services_to_add).await?;

        let mut tx = self.store.begin().await?;
        let mut bill = tx
            .lock_bill(bill_id)
            .await?
            .ok_or(BillingError::BillNotFound(bill_id))?;
        if bill.is_archived {
            return Err(BillingError::Archived(bill_id));
        }

        for id in command
            .services_to_remove
            .iter()
            .chain(command.services_to_update.iter().map(|c| &c.billed_service_id))
        {
            owned_line(tx.as_mut(), bill_id, *id).await?;
        }

        let now = Utc::now();
        let mut lines_changed = false;
        let mut services = tx.billed_services(bill_id).await?;

        for id in &command.services_to_remove {
            let Some(position) = services.iter().position(|l| l.id == *id) else {
                continue;
            };
            let line = services.remove(position);
            tx.delete_billed_service(line.id).await?;
            self.audit
                .record(
                    tx.as_mut(),
                    AuditRecord::deleted(AuditSubject::BilledService, line.id, line.audit_snapshot()),
                    principal,
                )
                .await?;
            lines_changed = true;
        }

        for change in &command.services_to_update {
            let Some(line) = services.iter_mut().find(|l| l.id == change.billed_service_id) else {
                continue;
            };
            if line.quantity == change.quantity {
                continue;
            }

            let before = line.clone();
            line.set_quantity(change.quantity, now);
            let mut diff = FieldChanges::new();
            diff.track("quantity", &before.quantity, &line.quantity);
            diff.track("subtotal", &before.subtotal, &line.subtotal);

            tx.update_billed_service(line).await?;
            self.audit
                .record(
                    tx.as_mut(),
                    AuditRecord::changed(AuditSubject::BilledService, line.id, AuditAction::Updated, diff),
                    principal,
                )
                .await?;
            lines_changed = true;
        }

        for (service, quantity) in additions {
            let line = BilledService::new(bill_id, service.id, service.name, service.category, service.price, quantity);
            tx.insert_billed_service(&line).await?;
            self.audit
                .record(
                    tx.as_mut(),
                    AuditRecord::created(AuditSubject::BilledService, line.id, line.audit_snapshot()),
                    principal,
                )
                .await?;
            services.push(line);
            lines_changed = true;
        }

        let before = bill.clone();
        if let Some(change) = command.discount {
            bill.discount = match change {
                DiscountChange::Apply(request) => Some(request.validate()?),
                DiscountChange::Remove => None,
            };
        }
        if let Some(fee) = command.consultation_fee {
            bill.consultation_fee = fee;
        }
        if let Some(notes) = command.notes {
            bill.notes = normalize_notes(Some(notes));
        }
        bill.recompute(&services);

        let diff = bill_changes(&before, &bill);
        if diff.is_empty() && !lines_changed {
            debug!("Update changed nothing");
            return Ok(BillWithServices { bill: before, services });
        }

        bill.touch(principal, now);
        tx.update_bill(&bill).await?;
        if !diff.is_empty() {
            self.audit
                .record(
                    tx.as_mut(),
                    AuditRecord::changed(AuditSubject::Bill, bill_id, AuditAction::Updated, diff),
                    principal,
                )
                .await?;
        }

        tx.commit().await?;
        info!(
            total_amount = %bill.total_amount(),
            payment_status = %bill.payment_status(),
            lines = services.len(),
            "Bill updated"
        );

        Ok(BillWithServices { bill, services })
    }

    /// A bill with its line items
    pub async fn get(&self, bill_id: BillId) -> Result<BillWithServices, BillingError> {
        let bill = self
            .store
            .find_bill(bill_id)
            .await?
            .ok_or(BillingError::BillNotFound(bill_id))?;
        let services = self.store.billed_services(bill_id).await?;
        Ok(BillWithServices { bill, services })
    }

    /// A bill's payments, oldest first
    pub async fn payments(&self, bill_id: BillId) -> Result<Vec<PaymentHistory>, BillingError> {
        if self.store.find_bill(bill_id).await?.is_none() {
            return Err(BillingError::BillNotFound(bill_id));
        }
        Ok(self.store.payment_history(bill_id).await?)
    }

    /// One page of bills, newest first
    pub async fn list(&self, filter: &BillFilter, request: &PageRequest) -> Result<Page<Bill>, BillingError> {
        let source = BillListing {
            store: self.store.as_ref(),
            filter,
        };
        self.paginator.page(&source, request).await
    }

    /// Archives a bill; archiving an archived bill changes nothing
    #[instrument(skip(self, principal), fields(bill_id = %bill_id))]
    pub async fn archive(&self, bill_id: BillId, principal: &Principal) -> Result<Bill, BillingError> {
        let mut tx = self.store.begin().await?;
        let mut bill = tx
            .lock_bill(bill_id)
            .await?
            .ok_or(BillingError::BillNotFound(bill_id))?;
        if bill.is_archived {
            debug!("Bill already archived");
            return Ok(bill);
        }

        let now = Utc::now();
        let mut diff = FieldChanges::new();
        diff.track("isArchived", &false, &true);
        diff.track("archivedAt", &None, &Some(now));

        bill.is_archived = true;
        bill.archived_at = Some(now);
        bill.touch(principal, now);

        tx.update_bill(&bill).await?;
        self.audit
            .record(
                tx.as_mut(),
                AuditRecord::changed(AuditSubject::Bill, bill_id, AuditAction::Archived, diff),
                principal,
            )
            .await?;
        tx.commit().await?;

        info!("Bill archived");
        Ok(bill)
    }
}

/// Loads a line and checks it belongs to `bill_id`
async fn owned_line(
    tx: &mut dyn LedgerTx,
    bill_id: BillId,
    id: BilledServiceId,
) -> Result<BilledService, BillingError> {
    let line = tx
        .find_billed_service(id)
        .await?
        .ok_or(BillingError::BilledServiceNotFound(id))?;
    if line.bill_id != bill_id {
        return Err(BillingError::ForeignBilledService {
            billed_service_id: id,
            bill_id,
        });
    }
    Ok(line)
}

/// Tracked bill fields that differ between two versions
fn bill_changes(before: &Bill, after: &Bill) -> FieldChanges {
    let mut diff = FieldChanges::new();
    diff.track("consultationFee", &before.consultation_fee, &after.consultation_fee);
    diff.track(
        "isSeniorPwdDiscountApplied",
        &before.is_senior_pwd_discount_applied(),
        &after.is_senior_pwd_discount_applied(),
    );
    diff.track(
        "discountKind",
        &before.discount.as_ref().map(|d| d.kind),
        &after.discount.as_ref().map(|d| d.kind),
    );
    diff.track("discountRate", &before.discount_rate(), &after.discount_rate());
    diff.track(
        "discountIdNumber",
        &before.discount.as_ref().map(|d| d.id_number.as_str()),
        &after.discount.as_ref().map(|d| d.id_number.as_str()),
    );
    diff.track("notes", &before.notes, &after.notes);
    diff.track("totalAmount", &before.total_amount(), &after.total_amount());
    diff.track("balance", &before.balance(), &after.balance());
    diff.track("paymentStatus", &before.payment_status(), &after.payment_status());
    diff
}
