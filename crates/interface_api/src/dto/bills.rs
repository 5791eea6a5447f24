//! Bill DTOs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use core_kernel::{BilledServiceId, DocumentId, Money, ServiceId};
use domain_billing::{
    BillFilter, CreateBillCommand, DiscountChange, DiscountKind, DiscountRequest, Direction,
    LineItemQuantityChange, LineItemRequest, PageRequest, PaymentStatus, SettlePaymentCommand,
    UpdateBillCommand,
};

#[derive(Debug, Deserialize, Validate)]
pub struct LineItemDto {
    pub service_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

impl From<LineItemDto> for LineItemRequest {
    fn from(dto: LineItemDto) -> Self {
        LineItemRequest {
            service_id: ServiceId::from(dto.service_id),
            quantity: dto.quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscountDto {
    pub kind: DiscountKind,
    /// Percentage, e.g. 20
    pub rate: Decimal,
    pub id_number: Option<String>,
}

impl From<DiscountDto> for DiscountRequest {
    fn from(dto: DiscountDto) -> Self {
        DiscountRequest {
            kind: dto.kind,
            rate: dto.rate,
            id_number: dto.id_number,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBillRequest {
    pub medical_documentation_id: Uuid,
    #[serde(default)]
    #[validate(nested)]
    pub services: Vec<LineItemDto>,
    pub discount: Option<DiscountDto>,
    pub consultation_fee: Decimal,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl From<CreateBillRequest> for CreateBillCommand {
    fn from(request: CreateBillRequest) -> Self {
        CreateBillCommand {
            medical_documentation_id: DocumentId::from(request.medical_documentation_id),
            services: request.services.into_iter().map(LineItemRequest::from).collect(),
            discount: request.discount.map(DiscountRequest::from),
            consultation_fee: Money::new(request.consultation_fee),
            notes: request.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct QuantityChangeDto {
    pub billed_service_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

/// `{"action": "apply", "kind": "senior", "rate": 20, "id_number": "..."}`
/// or `{"action": "remove"}`
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DiscountChangeDto {
    Apply(DiscountDto),
    Remove,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct UpdateBillRequest {
    #[validate(nested)]
    pub services_to_add: Vec<LineItemDto>,
    pub services_to_remove: Vec<Uuid>,
    #[validate(nested)]
    pub services_to_update: Vec<QuantityChangeDto>,
    pub discount: Option<DiscountChangeDto>,
    pub consultation_fee: Option<Decimal>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl From<UpdateBillRequest> for UpdateBillCommand {
    fn from(request: UpdateBillRequest) -> Self {
        UpdateBillCommand {
            services_to_add: request.services_to_add.into_iter().map(LineItemRequest::from).collect(),
            services_to_remove: request
                .services_to_remove
                .into_iter()
                .map(BilledServiceId::from)
                .collect(),
            services_to_update: request
                .services_to_update
                .into_iter()
                .map(|c| LineItemQuantityChange {
                    billed_service_id: BilledServiceId::from(c.billed_service_id),
                    quantity: c.quantity,
                })
                .collect(),
            discount: request.discount.map(|d| match d {
                DiscountChangeDto::Apply(discount) => DiscountChange::Apply(discount.into()),
                DiscountChangeDto::Remove => DiscountChange::Remove,
            }),
            consultation_fee: request.consultation_fee.map(Money::new),
            notes: request.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SettlePaymentRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 50, message = "payment method is required"))]
    pub payment_method: String,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl From<SettlePaymentRequest> for SettlePaymentCommand {
    fn from(request: SettlePaymentRequest) -> Self {
        SettlePaymentCommand {
            amount: Money::new(request.amount),
            payment_method: request.payment_method,
            notes: request.notes,
        }
    }
}

/// Query string of `GET /bills`
#[derive(Debug, Default, Deserialize)]
pub struct ListBillsQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub direction: Option<Direction>,
    pub status: Option<PaymentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub include_archived: Option<bool>,
}

impl ListBillsQuery {
    pub fn filter(&self) -> BillFilter {
        BillFilter {
            payment_status: self.status,
            created_from: self.from,
            created_to: self.to,
            include_archived: self.include_archived.unwrap_or(false),
        }
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest {
            limit: self.limit,
            cursor: self.cursor.clone(),
            direction: self.direction.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub id: Uuid,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
}
