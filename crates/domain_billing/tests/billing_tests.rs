//! Bill aggregate, settlement and audit trail tests against the in-memory store

mod common;

use rust_decimal_macros::dec;

use core_kernel::{AuditLogId, BilledServiceId, BillId, Money};
use domain_billing::{
    AuditAction, AuditRecord, AuditSubject, BillingError, DiscountChange, DiscountKind,
    DiscountRequest, ErrorKind, LineItemQuantityChange, LineItemRequest, PaymentStatus,
    SettlePaymentCommand, UpdateBillCommand,
};

use common::{admin, assert_totals_consistent, encoder, money, Harness};

fn pay(amount: rust_decimal::Decimal) -> SettlePaymentCommand {
    SettlePaymentCommand::new(money(amount), "cash")
}

// ============================================================================
// Settlement
// ============================================================================

mod settlement_tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_then_full_then_rejected() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;

        // Scenario A
        let outcome = h.billing.settle_payment(bill.id, pay(dec!(400)), &encoder()).await.unwrap();
        assert_eq!(outcome.bill.amount_paid().amount(), dec!(400));
        assert_eq!(outcome.bill.balance().amount(), dec!(600));
        assert_eq!(outcome.bill.payment_status(), PaymentStatus::PartiallyPaid);
        assert_eq!(outcome.payment.amount_paid.amount(), dec!(400));

        // Scenario B
        let outcome = h.billing.settle_payment(bill.id, pay(dec!(600)), &encoder()).await.unwrap();
        assert_eq!(outcome.bill.amount_paid().amount(), dec!(1000));
        assert_eq!(outcome.bill.balance(), Money::zero());
        assert_eq!(outcome.bill.payment_status(), PaymentStatus::Paid);

        // Scenario C
        let err = h.billing.settle_payment(bill.id, pay(dec!(1)), &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::AlreadyPaid(id) if id == bill.id));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let stored = h.billing.get_bill(bill.id).await.unwrap().bill;
        assert_eq!(stored.amount_paid().amount(), dec!(1000));
        assert_eq!(h.billing.bill_payments(bill.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_residue_within_tolerance_is_paid() {
        // Scenario D
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;

        let outcome = h.billing.settle_payment(bill.id, pay(dec!(999.995)), &encoder()).await.unwrap();
        assert_eq!(outcome.bill.balance().amount(), dec!(0.005));
        assert_eq!(outcome.bill.payment_status(), PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_amount_below_money_scale_is_rejected() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;

        let command: SettlePaymentCommand =
            serde_json::from_str(r#"{"amount": "0.00001", "payment_method": "cash"}"#).unwrap();
        assert!(command.amount.is_zero());

        let err = h.billing.settle_payment(bill.id, command, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(h.billing.bill_payments(bill.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overpayment_clamps_balance() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;

        let outcome = h.billing.settle_payment(bill.id, pay(dec!(1500)), &encoder()).await.unwrap();
        assert_eq!(outcome.bill.balance(), Money::zero());
        assert_eq!(outcome.bill.amount_paid().amount(), dec!(1500));
        assert_eq!(outcome.bill.payment_status(), PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_payments_sum_to_amount_paid() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;

        for amount in [dec!(100), dec!(250.50), dec!(49.50)] {
            h.billing.settle_payment(bill.id, pay(amount), &encoder()).await.unwrap();
        }

        let payments = h.billing.bill_payments(bill.id).await.unwrap();
        let total: Money = payments.iter().map(|p| p.amount_paid).sum();
        let stored = h.billing.get_bill(bill.id).await.unwrap().bill;
        assert_eq!(total, stored.amount_paid());
        assert!(payments.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_totals_consistent(&stored);
    }

    #[tokio::test]
    async fn test_validation_happens_before_lookup() {
        let h = Harness::new().await;

        let err = h.billing.settle_payment(BillId::new(), pay(dec!(0)), &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let blank_method = SettlePaymentCommand::new(money(dec!(10)), "  ");
        let err = h.billing.settle_payment(BillId::new(), blank_method, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = h.billing.settle_payment(BillId::new(), pay(dec!(10)), &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_settlement_audit_lists_changed_fields_only() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;
        h.billing.settle_payment(bill.id, pay(dec!(400)), &encoder()).await.unwrap();

        let history = h.billing.audit_history(AuditSubject::Bill, bill.id.into()).await.unwrap();
        let entry = history
            .iter()
            .find(|e| e.action == AuditAction::PaymentRecorded)
            .expect("payment audit entry");

        assert_eq!(entry.fields_changed, "amountPaid,balance,paymentStatus");
        let previous = entry.previous_data.as_ref().unwrap().as_object().unwrap();
        let new = entry.new_data.as_ref().unwrap().as_object().unwrap();
        assert_eq!(previous.len(), 3);
        assert_eq!(new.len(), 3);
        assert_eq!(new["paymentStatus"], "partially_paid");
        assert_eq!(entry.changed_by_name, "Maria Santos");
    }

    #[tokio::test]
    async fn test_second_partial_payment_keeps_status_out_of_diff() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;
        h.billing.settle_payment(bill.id, pay(dec!(100)), &encoder()).await.unwrap();
        h.billing.settle_payment(bill.id, pay(dec!(100)), &encoder()).await.unwrap();

        let history = h.billing.audit_history(AuditSubject::Bill, bill.id.into()).await.unwrap();
        let payments: Vec<_> = history.iter().filter(|e| e.action == AuditAction::PaymentRecorded).collect();
        assert_eq!(payments.len(), 2);
        assert!(payments.iter().any(|e| e.fields_changed == "amountPaid,balance"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settlements_serialize() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let billing = h.billing.clone();
            handles.push(tokio::spawn(async move {
                billing.settle_payment(bill.id, pay(dec!(100)), &encoder()).await
            }));
        }

        let mut settled = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => settled += 1,
                Err(BillingError::AlreadyPaid(_)) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(settled, 10);
        assert_eq!(rejected, 2);
        let stored = h.billing.get_bill(bill.id).await.unwrap().bill;
        assert_eq!(stored.amount_paid().amount(), dec!(1000));
        assert_eq!(stored.payment_status(), PaymentStatus::Paid);
        assert_eq!(h.billing.bill_payments(bill.id).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_analytics_failure_does_not_fail_payment() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;
        h.store.fail_rollups(true);

        let outcome = h.billing.settle_payment(bill.id, pay(dec!(250)), &encoder()).await.unwrap();
        assert!(outcome.analytics_warning.is_some());
        assert_eq!(outcome.bill.amount_paid().amount(), dec!(250));
        assert_eq!(h.billing.bill_payments(bill.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_archived_bill_rejects_payment() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;
        h.billing.archive_bill(bill.id, &admin()).await.unwrap();

        let err = h.billing.settle_payment(bill.id, pay(dec!(100)), &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::Archived(_)));
        assert!(h.billing.bill_payments(bill.id).await.unwrap().is_empty());
    }
}

// ============================================================================
// Bill creation
// ============================================================================

mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_prices_lines_and_audits() {
        let h = Harness::new().await;
        let command = h.create_command(dec!(300), &[(h.cbc, 2), (h.xray, 1)]).await;

        let created = h.billing.create_bill(command, &encoder()).await.unwrap();
        assert_eq!(created.services.len(), 2);
        assert_eq!(created.bill.total_amount().amount(), dec!(1300));
        assert_eq!(created.bill.payment_status(), PaymentStatus::Unpaid);
        assert_eq!(created.bill.last_updated_by_role.as_deref(), Some("encoder"));
        assert_totals_consistent(&created.bill);

        let cbc_line = created.services.iter().find(|l| l.service_id == Some(h.cbc)).unwrap();
        assert_eq!(cbc_line.service_price_at_time.amount(), dec!(250));
        assert_eq!(cbc_line.subtotal.amount(), dec!(500));

        let bill_history = h.billing.audit_history(AuditSubject::Bill, created.bill.id.into()).await.unwrap();
        assert_eq!(bill_history.len(), 1);
        assert_eq!(bill_history[0].action, AuditAction::Created);
        assert!(bill_history[0].previous_data.is_none());

        for line in &created.services {
            let line_history = h.billing.audit_history(AuditSubject::BilledService, line.id.into()).await.unwrap();
            assert_eq!(line_history.len(), 1);
            assert_eq!(line_history[0].action, AuditAction::Created);
        }
    }

    #[tokio::test]
    async fn test_discount_applies_to_services_only() {
        let h = Harness::new().await;
        let mut command = h.create_command(dec!(300), &[(h.cbc, 2)]).await;
        command.discount = Some(DiscountRequest {
            kind: DiscountKind::Senior,
            rate: dec!(20),
            id_number: Some("SC-2024-0001".to_string()),
        });

        let created = h.billing.create_bill(command, &encoder()).await.unwrap();
        assert_eq!(created.bill.total_amount().amount(), dec!(700));
        assert!(created.bill.is_senior_pwd_discount_applied());
        assert_eq!(created.bill.discount_rate(), dec!(20));
    }

    #[tokio::test]
    async fn test_discount_requires_identification() {
        let h = Harness::new().await;
        let mut command = h.create_command(dec!(300), &[(h.cbc, 1)]).await;
        command.discount = Some(DiscountRequest {
            kind: DiscountKind::Pwd,
            rate: dec!(20),
            id_number: Some("   ".to_string()),
        });
        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut command = h.create_command(dec!(300), &[(h.cbc, 1)]).await;
        command.discount = Some(DiscountRequest {
            kind: DiscountKind::Pwd,
            rate: dec!(0),
            id_number: Some("PWD-1".to_string()),
        });
        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_catalog_failures_are_distinct() {
        let h = Harness::new().await;

        let command = h.create_command(dec!(0), &[(h.ecg, 1)]).await;
        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::ServiceDeactivated { .. }));

        let command = h.create_command(dec!(0), &[(h.ultrasound, 1)]).await;
        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::ServiceUnavailable { .. }));

        let command = h.create_command(dec!(0), &[(core_kernel::ServiceId::new(), 1)]).await;
        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::ServiceNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_one_bill_per_document() {
        let h = Harness::new().await;
        let command = h.create_command(dec!(300), &[]).await;
        h.billing.create_bill(command.clone(), &encoder()).await.unwrap();

        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::DuplicateBill(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_unknown_document_and_bad_quantity() {
        let h = Harness::new().await;

        let mut command = h.create_command(dec!(300), &[]).await;
        command.medical_documentation_id = core_kernel::DocumentId::new();
        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::DocumentNotFound(_)));

        let command = h.create_command(dec!(300), &[(h.cbc, 0)]).await;
        let err = h.billing.create_bill(command, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

// ============================================================================
// Bill updates
// ============================================================================

mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_audits_exactly_what_changed() {
        let h = Harness::new().await;
        let command = h.create_command(dec!(300), &[(h.cbc, 1), (h.xray, 1)]).await;
        let created = h.billing.create_bill(command, &encoder()).await.unwrap();
        let cbc_line = created.services.iter().find(|l| l.service_id == Some(h.cbc)).unwrap().id;
        let xray_line = created.services.iter().find(|l| l.service_id == Some(h.xray)).unwrap().id;

        let update = UpdateBillCommand {
            services_to_update: vec![LineItemQuantityChange { billed_service_id: cbc_line, quantity: 2 }],
            services_to_remove: vec![xray_line],
            notes: Some("follow-up".to_string()),
            ..Default::default()
        };
        let updated = h.billing.update_bill(created.bill.id, update, &encoder()).await.unwrap();

        assert_eq!(updated.services.len(), 1);
        assert_eq!(updated.bill.total_amount().amount(), dec!(800));
        assert_totals_consistent(&updated.bill);

        let cbc_history = h.billing.audit_history(AuditSubject::BilledService, cbc_line.into()).await.unwrap();
        let cbc_update = cbc_history.iter().find(|e| e.action == AuditAction::Updated).unwrap();
        assert_eq!(cbc_update.fields_changed, "quantity,subtotal");

        let xray_history = h.billing.audit_history(AuditSubject::BilledService, xray_line.into()).await.unwrap();
        let xray_delete = xray_history.iter().find(|e| e.action == AuditAction::Deleted).unwrap();
        assert!(xray_delete.new_data.is_none());

        let bill_history = h.billing.audit_history(AuditSubject::Bill, created.bill.id.into()).await.unwrap();
        let bill_update = bill_history.iter().find(|e| e.action == AuditAction::Updated).unwrap();
        assert_eq!(bill_update.fields_changed, "notes,totalAmount,balance");
    }

    #[tokio::test]
    async fn test_unchanged_values_write_nothing() {
        let h = Harness::new().await;
        let mut command = h.create_command(dec!(300), &[(h.cbc, 2)]).await;
        command.notes = Some("initial".to_string());
        let created = h.billing.create_bill(command, &encoder()).await.unwrap();
        let line = created.services[0].id;

        let update = UpdateBillCommand {
            services_to_update: vec![LineItemQuantityChange { billed_service_id: line, quantity: 2 }],
            consultation_fee: Some(money(dec!(300))),
            notes: Some("initial".to_string()),
            discount: Some(DiscountChange::Remove),
            ..Default::default()
        };
        let updated = h.billing.update_bill(created.bill.id, update, &admin()).await.unwrap();

        assert_eq!(updated.bill.updated_at, created.bill.updated_at);
        assert_eq!(updated.bill.last_updated_by_name, created.bill.last_updated_by_name);
        let history = h.billing.audit_history(AuditSubject::Bill, created.bill.id.into()).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_discount_change_recomputes_total() {
        let h = Harness::new().await;
        let command = h.create_command(dec!(300), &[(h.xray, 2)]).await;
        let created = h.billing.create_bill(command, &encoder()).await.unwrap();
        h.billing.settle_payment(created.bill.id, pay(dec!(1300)), &encoder()).await.unwrap();

        let update = UpdateBillCommand {
            discount: Some(DiscountChange::Apply(DiscountRequest {
                kind: DiscountKind::Senior,
                rate: dec!(20),
                id_number: Some("SC-77".to_string()),
            })),
            ..Default::default()
        };
        let updated = h.billing.update_bill(created.bill.id, update, &encoder()).await.unwrap();

        assert_eq!(updated.bill.total_amount().amount(), dec!(1100));
        assert_eq!(updated.bill.balance(), Money::zero());
        assert_eq!(updated.bill.payment_status(), PaymentStatus::Paid);

        let history = h.billing.audit_history(AuditSubject::Bill, created.bill.id.into()).await.unwrap();
        let entry = history.iter().find(|e| e.action == AuditAction::Updated).unwrap();
        assert_eq!(
            entry.fields_changed,
            "isSeniorPwdDiscountApplied,discountKind,discountRate,discountIdNumber,totalAmount"
        );
    }

    #[tokio::test]
    async fn test_line_from_another_bill_is_rejected() {
        let h = Harness::new().await;
        let first = h
            .billing
            .create_bill(h.create_command(dec!(0), &[(h.cbc, 1)]).await, &encoder())
            .await
            .unwrap();
        let second = h
            .billing
            .create_bill(h.create_command(dec!(0), &[(h.xray, 1)]).await, &encoder())
            .await
            .unwrap();

        let update = UpdateBillCommand {
            services_to_remove: vec![second.services[0].id],
            ..Default::default()
        };
        let err = h.billing.update_bill(first.bill.id, update, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("does not belong to this bill"));

        let untouched = h.billing.get_bill(second.bill.id).await.unwrap();
        assert_eq!(untouched.services.len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_bad_input() {
        let h = Harness::new().await;
        let created = h
            .billing
            .create_bill(h.create_command(dec!(0), &[(h.cbc, 1)]).await, &encoder())
            .await
            .unwrap();
        let line = created.services[0].id;

        let zero = UpdateBillCommand {
            services_to_update: vec![LineItemQuantityChange { billed_service_id: line, quantity: 0 }],
            ..Default::default()
        };
        let err = h.billing.update_bill(created.bill.id, zero, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let missing = UpdateBillCommand {
            services_to_remove: vec![BilledServiceId::new()],
            ..Default::default()
        };
        let err = h.billing.update_bill(created.bill.id, missing, &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::BilledServiceNotFound(_)));

        let deactivated = UpdateBillCommand {
            services_to_add: vec![LineItemRequest { service_id: h.ecg, quantity: 1 }],
            ..Default::default()
        };
        let err = h.billing.update_bill(created.bill.id, deactivated, &encoder()).await.unwrap_err();
        assert!(matches!(err, BillingError::ServiceDeactivated { .. }));

        let err = h
            .billing
            .update_bill(BillId::new(), UpdateBillCommand::default(), &encoder())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::BillNotFound(_)));
    }

    #[tokio::test]
    async fn test_adding_lines_after_payment_reopens_balance() {
        let h = Harness::new().await;
        let created = h
            .billing
            .create_bill(h.create_command(dec!(500), &[]).await, &encoder())
            .await
            .unwrap();
        h.billing.settle_payment(created.bill.id, pay(dec!(500)), &encoder()).await.unwrap();

        let update = UpdateBillCommand {
            services_to_add: vec![LineItemRequest { service_id: h.cbc, quantity: 1 }],
            ..Default::default()
        };
        let updated = h.billing.update_bill(created.bill.id, update, &encoder()).await.unwrap();

        assert_eq!(updated.bill.balance().amount(), dec!(250));
        assert_eq!(updated.bill.payment_status(), PaymentStatus::PartiallyPaid);
        assert_totals_consistent(&updated.bill);
    }
}

// ============================================================================
// Archive
// ============================================================================

mod archive_tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_is_idempotent() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;

        let first = h.billing.archive_bill(bill.id, &admin()).await.unwrap();
        assert!(first.is_archived);
        let archived_at = first.archived_at;

        let second = h.billing.archive_bill(bill.id, &admin()).await.unwrap();
        assert_eq!(second.archived_at, archived_at);

        let history = h.billing.audit_history(AuditSubject::Bill, bill.id.into()).await.unwrap();
        assert_eq!(history.iter().filter(|e| e.action == AuditAction::Archived).count(), 1);
    }

    #[tokio::test]
    async fn test_archive_unknown_bill() {
        let h = Harness::new().await;
        let err = h.billing.archive_bill(BillId::new(), &admin()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_archived_bill_rejects_update() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;
        h.billing.archive_bill(bill.id, &admin()).await.unwrap();

        let update = UpdateBillCommand {
            notes: Some("late edit".to_string()),
            ..Default::default()
        };
        let err = h.billing.update_bill(bill.id, update, &encoder()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}

// ============================================================================
// Audit trail
// ============================================================================

mod audit_tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_delete_counts_per_table() {
        // Scenario F
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;
        let entry = h.billing.audit_history(AuditSubject::Bill, bill.id.into()).await.unwrap()[0].id;

        let summary = h.billing.delete_audit_logs(&[entry, AuditLogId::new()]).await.unwrap();
        assert_eq!(summary.deleted_count, 1);
        assert_eq!(summary.deletion_summary.bill_audit_logs, 1);
        assert_eq!(summary.deletion_summary.billed_service_audit_logs, 0);
        assert_eq!(summary.deletion_summary.document_audit_logs, 0);
        assert_eq!(summary.deletion_summary.patient_audit_logs, 0);
        assert!(summary.failures.is_empty());

        assert!(h.billing.audit_history(AuditSubject::Bill, bill.id.into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_matches_differs_from_bad_request() {
        let h = Harness::new().await;

        let summary = h.billing.delete_audit_logs(&[AuditLogId::new()]).await.unwrap();
        assert!(summary.matched_nothing());

        let err = h.billing.delete_audit_logs(&[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_one_failing_table_does_not_stop_the_others() {
        let h = Harness::new().await;
        let created = h
            .billing
            .create_bill(h.create_command(dec!(0), &[(h.cbc, 1)]).await, &encoder())
            .await
            .unwrap();
        let bill_entry = h.billing.audit_history(AuditSubject::Bill, created.bill.id.into()).await.unwrap()[0].id;
        let line_entry = h
            .billing
            .audit_history(AuditSubject::BilledService, created.services[0].id.into())
            .await
            .unwrap()[0]
            .id;

        h.store.fail_audit_deletes(AuditSubject::BilledService).await;
        let summary = h.billing.delete_audit_logs(&[bill_entry, line_entry]).await.unwrap();

        assert_eq!(summary.deleted_count, 1);
        assert_eq!(summary.deletion_summary.bill_audit_logs, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].table, "billed_service_audit_logs");
        assert!(!summary.matched_nothing());
    }

    #[tokio::test]
    async fn test_delete_one() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(1000)).await.bill;
        let entry = h.billing.audit_history(AuditSubject::Bill, bill.id.into()).await.unwrap()[0].id;

        h.billing.delete_audit_log(AuditSubject::Bill, entry).await.unwrap();
        let err = h.billing.delete_audit_log(AuditSubject::Bill, entry).await.unwrap_err();
        assert!(matches!(err, BillingError::AuditLogNotFound(_)));
    }

    #[tokio::test]
    async fn test_external_subjects_are_recorded() {
        let h = Harness::new().await;
        let patient = uuid::Uuid::new_v4();
        let record = AuditRecord::created(
            AuditSubject::Patient,
            patient,
            serde_json::json!({"firstName": "Ana", "lastName": "Cruz"}),
        );

        let entry = h.billing.record_audit(record, &admin()).await.unwrap();
        assert_eq!(entry.changed_by_role, "admin");

        let history = h.billing.audit_history(AuditSubject::Patient, patient).await.unwrap();
        assert_eq!(history, vec![entry]);
        assert_eq!(h.store.audit_entries(AuditSubject::Document).await.len(), 0);
    }
}
