//! Approval: materialize a reviewed extraction into durable fleet records.

use chrono::{NaiveDate, Utc};
use paddock_core::{
    CreatedItemsSummary, CreatedMaintenance, CreatedPart, ExtractedInvoiceData, ExtractedPart,
    Invoice, InvoiceStatus, ResolvedSupplier, Supplier, Vehicle,
};
use paddock_storage::DocumentStore;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PipelineError;

const INVOICE_COLUMNS: &str = "id, file_path, file_url, original_filename, status, number, date, \
     amount, tax_amount, extracted_data, error_message, vehicle_id, supplier_id, \
     created_at, updated_at";

/// Approves reviewed invoices and tears down approved ones.
///
/// Everything an approval creates lands in one transaction; a failure at any
/// step leaves no partial records behind.
#[derive(Clone)]
pub struct ApprovalEngine {
    pool: PgPool,
    store: Arc<dyn DocumentStore>,
}

impl ApprovalEngine {
    pub fn new(pool: PgPool, store: Arc<dyn DocumentStore>) -> Self {
        Self { pool, store }
    }

    /// Approve a reviewed invoice (REVIEW -> APPROVED).
    ///
    /// Resolves the supplier (creating it when unknown), links a vehicle when
    /// one can be identified, creates one Maintenance row per extracted
    /// service group with its parts, and standalone Part rows for bare
    /// purchases. Returns the approved invoice and everything that was
    /// created or resolved.
    ///
    /// The headline `date` and `tax_amount` are the values written when the
    /// extraction was stored, possibly corrected by a review edit since; they
    /// are deliberately not re-copied from the payload here, so operator
    /// corrections survive approval. Created Maintenance rows likewise prefer
    /// the invoice's date over the payload's.
    pub async fn approve(
        &self,
        id: Uuid,
    ) -> Result<(Invoice, CreatedItemsSummary), PipelineError> {
        let mut tx = self.pool.begin().await?;

        let invoice = fetch_invoice_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Invoice {}", id)))?;

        ensure_approvable(invoice.status)?;

        // Parse before any write so a corrupt payload aborts cleanly.
        let extracted = parse_payload(&invoice)?;

        let supplier = match non_empty(extracted.supplier_name.as_deref()) {
            Some(name) => Some(self.resolve_supplier(&mut tx, name, &extracted).await?),
            None => None,
        };
        let supplier_id = supplier.as_ref().map(|s| s.id);

        // Vehicles are resolved, never created: an operator-assigned vehicle
        // wins, then an exact plate match.
        let vehicle = self.resolve_vehicle(&mut tx, &invoice, &extracted).await?;
        let vehicle_id = vehicle.as_ref().map(|v| v.id);

        let plan = plan_records(
            &extracted,
            invoice.date,
            vehicle.as_ref().map(|v| v.kilometers),
            Utc::now().date_naive(),
        );

        let mut summary = CreatedItemsSummary {
            supplier: summarize_supplier(supplier.as_ref()),
            ..Default::default()
        };

        for maintenance in &plan.maintenances {
            let maintenance_id: Uuid = sqlx::query_scalar(
                "INSERT INTO maintenance (date, description, mileage, cost, vehicle_id, supplier_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .bind(plan.date)
            .bind(&maintenance.description)
            .bind(plan.mileage)
            .bind(maintenance.cost)
            .bind(vehicle_id)
            .bind(supplier_id)
            .fetch_one(&mut *tx)
            .await?;

            summary.maintenances.push(CreatedMaintenance {
                id: maintenance_id,
                description: maintenance.description.clone(),
            });

            for part in &maintenance.parts {
                insert_part(&mut tx, part, Some(maintenance_id), supplier_id, id).await?;
                summary.parts.push(CreatedPart {
                    name: part.name.clone(),
                    quantity: part.quantity,
                });
            }
        }

        for part in &plan.standalone_parts {
            insert_part(&mut tx, part, None, supplier_id, id).await?;
            summary.parts.push(CreatedPart {
                name: part.name.clone(),
                quantity: part.quantity,
            });
        }

        let query = format!(
            "UPDATE invoices SET status = 'approved', supplier_id = $2, vehicle_id = $3, \
             updated_at = NOW() WHERE id = $1 AND status = 'review' RETURNING {}",
            INVOICE_COLUMNS
        );
        let approved = sqlx::query_as::<Postgres, Invoice>(&query)
            .bind(id)
            .bind(supplier_id)
            .bind(vehicle_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(PipelineError::InvalidTransition {
                from: InvoiceStatus::Review,
                to: InvoiceStatus::Approved,
            })?;

        // Advance the linked vehicle's odometer when the invoice carried a
        // newer reading. Readings never move backwards.
        if let (Some(vehicle_id), Some(reading)) = (vehicle_id, extracted.mileage) {
            sqlx::query("UPDATE vehicles SET kilometers = $2 WHERE id = $1 AND kilometers < $2")
                .bind(vehicle_id)
                .bind(reading)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            invoice_id = %id,
            maintenances = summary.maintenances.len(),
            parts = summary.parts.len(),
            supplier_resolved = summary.supplier.is_some(),
            "Invoice approved"
        );

        Ok((approved, summary))
    }

    /// Delete an invoice, cascading over the records its approval created.
    ///
    /// Parts materialized from this invoice are removed; a Maintenance row
    /// is only removed once no other invoice's parts still reference it.
    /// The backing document is deleted best-effort after commit.
    pub async fn delete(&self, id: Uuid) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await?;

        let invoice = fetch_invoice_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Invoice {}", id)))?;

        if !invoice.status.deletable_without_cascade() {
            let maintenance_ids: Vec<Uuid> = sqlx::query_scalar(
                "SELECT DISTINCT maintenance_id FROM parts \
                 WHERE invoice_id = $1 AND maintenance_id IS NOT NULL",
            )
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM parts WHERE invoice_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            if !maintenance_ids.is_empty() {
                sqlx::query(
                    "DELETE FROM maintenance m WHERE m.id = ANY($1) \
                     AND NOT EXISTS (SELECT 1 FROM parts p WHERE p.maintenance_id = m.id)",
                )
                .bind(&maintenance_ids)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if let Err(e) = self.store.delete(&invoice.file_path).await {
            tracing::warn!(invoice_id = %id, key = %invoice.file_path, error = %e, "Failed to delete invoice document");
        }

        tracing::info!(invoice_id = %id, status = %invoice.status, "Invoice deleted");

        Ok(())
    }

    /// Look up the supplier by exact name, creating it when unknown.
    async fn resolve_supplier(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        extracted: &ExtractedInvoiceData,
    ) -> Result<Supplier, PipelineError> {
        let existing = sqlx::query_as::<Postgres, Supplier>(
            "SELECT id, name, email, phone, address, tax_id, created_at \
             FROM suppliers WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(supplier) = existing {
            return Ok(supplier);
        }

        let supplier = sqlx::query_as::<Postgres, Supplier>(
            "INSERT INTO suppliers (name, address, tax_id) VALUES ($1, $2, $3) \
             RETURNING id, name, email, phone, address, tax_id, created_at",
        )
        .bind(name)
        .bind(extracted.supplier_address.as_deref())
        .bind(extracted.supplier_tax_id.as_deref())
        .fetch_one(&mut **tx)
        .await?;

        Ok(supplier)
    }

    async fn resolve_vehicle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        invoice: &Invoice,
        extracted: &ExtractedInvoiceData,
    ) -> Result<Option<Vehicle>, PipelineError> {
        if let Some(vehicle_id) = invoice.vehicle_id {
            let vehicle = sqlx::query_as::<Postgres, Vehicle>(
                "SELECT id, brand, model, year, license_plate, kilometers, created_at \
                 FROM vehicles WHERE id = $1",
            )
            .bind(vehicle_id)
            .fetch_optional(&mut **tx)
            .await?;
            return Ok(vehicle);
        }

        if let Some(plate) = non_empty(extracted.vehicle_plate.as_deref()) {
            let vehicle = sqlx::query_as::<Postgres, Vehicle>(
                "SELECT id, brand, model, year, license_plate, kilometers, created_at \
                 FROM vehicles WHERE UPPER(license_plate) = UPPER($1)",
            )
            .bind(plate)
            .fetch_optional(&mut **tx)
            .await?;
            return Ok(vehicle);
        }

        Ok(None)
    }
}

async fn fetch_invoice_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Invoice>, sqlx::Error> {
    let query = format!(
        "SELECT {} FROM invoices WHERE id = $1 FOR UPDATE",
        INVOICE_COLUMNS
    );
    sqlx::query_as::<Postgres, Invoice>(&query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

async fn insert_part(
    tx: &mut Transaction<'_, Postgres>,
    part: &ExtractedPart,
    maintenance_id: Option<Uuid>,
    supplier_id: Option<Uuid>,
    invoice_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO parts (name, reference, price, quantity, maintenance_id, supplier_id, invoice_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&part.name)
    .bind(part.reference.as_deref())
    .bind(part.unit_price)
    .bind(part.quantity)
    .bind(maintenance_id)
    .bind(supplier_id)
    .bind(invoice_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Only REVIEW invoices may be approved; a second approval attempt fails
/// here because the first one left the invoice in APPROVED.
fn ensure_approvable(status: InvoiceStatus) -> Result<(), PipelineError> {
    if status.can_transition_to(InvoiceStatus::Approved) {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition {
            from: status,
            to: InvoiceStatus::Approved,
        })
    }
}

fn parse_payload(invoice: &Invoice) -> Result<ExtractedInvoiceData, PipelineError> {
    let payload = invoice.extracted_data.as_ref().ok_or_else(|| {
        PipelineError::InvalidPayload("Invoice has no extraction payload".to_string())
    })?;
    serde_json::from_value(payload.clone()).map_err(|e| PipelineError::InvalidPayload(e.to_string()))
}

/// What approval will insert, computed up front from the payload.
#[derive(Debug)]
struct ApprovalPlan {
    date: NaiveDate,
    mileage: i32,
    maintenances: Vec<MaintenancePlan>,
    standalone_parts: Vec<ExtractedPart>,
}

#[derive(Debug)]
struct MaintenancePlan {
    description: String,
    /// Labor (default 0) plus every part's total price.
    cost: f64,
    parts: Vec<ExtractedPart>,
}

fn plan_records(
    extracted: &ExtractedInvoiceData,
    invoice_date: Option<NaiveDate>,
    vehicle_odometer: Option<i32>,
    today: NaiveDate,
) -> ApprovalPlan {
    ApprovalPlan {
        date: resolve_maintenance_date(invoice_date, extracted.invoice_date, today),
        mileage: extracted.resolve_mileage(vehicle_odometer),
        maintenances: extracted
            .maintenances
            .iter()
            .map(|m| MaintenancePlan {
                description: m.description.clone(),
                cost: m.total_cost(),
                parts: m.parts.clone(),
            })
            .collect(),
        standalone_parts: extracted.parts_only.clone(),
    }
}

/// Summary entry for the supplier the invoice was linked to. Present for
/// looked-up and freshly created suppliers alike.
fn summarize_supplier(supplier: Option<&Supplier>) -> Option<ResolvedSupplier> {
    supplier.map(|s| ResolvedSupplier {
        id: s.id,
        name: s.name.clone(),
    })
}

/// Date recorded on created Maintenance rows: the invoice's (possibly
/// operator-corrected) date, else the extraction's, else today.
fn resolve_maintenance_date(
    invoice_date: Option<NaiveDate>,
    extracted_date: Option<NaiveDate>,
    today: NaiveDate,
) -> NaiveDate {
    invoice_date.or(extracted_date).unwrap_or(today)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
