use anyhow::Result;
use chrono::NaiveDate;
use paddock_core::{Invoice, InvoiceStatus, ReviewEdit};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "id, file_path, file_url, original_filename, status, number, date, \
     amount, tax_amount, extracted_data, error_message, vehicle_id, supplier_id, \
     created_at, updated_at";

/// Repository for invoice rows and their status transitions.
///
/// Every transition method returns the updated row, or `None` when the
/// guard did not match (row missing or not in the expected status). The
/// caller decides whether that is a not-found or an illegal transition.
#[derive(Clone)]
pub struct InvoiceRepository {
    pool: PgPool,
}

impl InvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a freshly uploaded invoice in PENDING.
    #[tracing::instrument(skip(self), fields(db.table = "invoices", db.operation = "insert"))]
    pub async fn create(
        &self,
        file_path: &str,
        file_url: &str,
        original_filename: &str,
    ) -> Result<Invoice> {
        let query = format!(
            "INSERT INTO invoices (file_path, file_url, original_filename, status) \
             VALUES ($1, $2, $3, 'pending') RETURNING {}",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<Postgres, Invoice>(&query)
            .bind(file_path)
            .bind(file_url)
            .bind(original_filename)
            .fetch_one(&self.pool)
            .await?;

        Ok(invoice)
    }

    #[tracing::instrument(skip(self), fields(db.table = "invoices", db.operation = "select", db.record_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<Option<Invoice>> {
        let query = format!("SELECT {} FROM invoices WHERE id = $1", INVOICE_COLUMNS);
        let invoice = sqlx::query_as::<Postgres, Invoice>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// List invoices, newest first, optionally filtered by status.
    #[tracing::instrument(skip(self), fields(db.table = "invoices", db.operation = "select"))]
    pub async fn list(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>> {
        let invoices = match status {
            Some(status) => {
                let query = format!(
                    "SELECT {} FROM invoices WHERE status = $1 ORDER BY created_at DESC",
                    INVOICE_COLUMNS
                );
                sqlx::query_as::<Postgres, Invoice>(&query)
                    .bind(status.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {} FROM invoices ORDER BY created_at DESC",
                    INVOICE_COLUMNS
                );
                sqlx::query_as::<Postgres, Invoice>(&query)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(invoices)
    }

    /// Claim a PENDING invoice for extraction (PENDING -> PROCESSING).
    ///
    /// Returns `None` when another worker already claimed it.
    #[tracing::instrument(skip(self), fields(db.table = "invoices", db.operation = "update", db.record_id = %id))]
    pub async fn claim_for_processing(&self, id: Uuid) -> Result<Option<Invoice>> {
        let query = format!(
            "UPDATE invoices SET status = 'processing', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<Postgres, Invoice>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Store a successful extraction (PROCESSING -> REVIEW).
    ///
    /// Writes the full payload plus the headline fields in one statement so
    /// an operator never observes a REVIEW invoice without its payload.
    #[tracing::instrument(skip(self, payload), fields(db.table = "invoices", db.operation = "update", db.record_id = %id))]
    pub async fn store_extraction(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
        number: Option<&str>,
        date: Option<NaiveDate>,
        amount: f64,
        tax_amount: Option<f64>,
    ) -> Result<Option<Invoice>> {
        let query = format!(
            "UPDATE invoices SET status = 'review', extracted_data = $2, number = $3, \
             date = $4, amount = $5, tax_amount = $6, error_message = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' RETURNING {}",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<Postgres, Invoice>(&query)
            .bind(id)
            .bind(payload)
            .bind(number)
            .bind(date)
            .bind(amount)
            .bind(tax_amount)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Record an extraction failure (PROCESSING -> FAILED).
    #[tracing::instrument(skip(self, error_message), fields(db.table = "invoices", db.operation = "update", db.record_id = %id))]
    pub async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Invoice>> {
        let query = format!(
            "UPDATE invoices SET status = 'failed', error_message = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' RETURNING {}",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<Postgres, Invoice>(&query)
            .bind(id)
            .bind(error_message)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Put an invoice back in the queue (REVIEW or FAILED -> PENDING).
    ///
    /// Clears any stored error; the previous extraction payload is kept so
    /// the document history survives the loop.
    #[tracing::instrument(skip(self), fields(db.table = "invoices", db.operation = "update", db.record_id = %id))]
    pub async fn requeue(&self, id: Uuid, from: InvoiceStatus) -> Result<Option<Invoice>> {
        let query = format!(
            "UPDATE invoices SET status = 'pending', error_message = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = $2 RETURNING {}",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<Postgres, Invoice>(&query)
            .bind(id)
            .bind(from.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Apply an operator edit to a REVIEW invoice's headline fields.
    #[tracing::instrument(skip(self, edit), fields(db.table = "invoices", db.operation = "update", db.record_id = %id))]
    pub async fn update_review_fields(
        &self,
        id: Uuid,
        edit: &ReviewEdit,
    ) -> Result<Option<Invoice>> {
        if edit.is_empty() {
            return self.get(id).await;
        }

        let query = build_review_update_sql(edit);

        let mut query_builder = sqlx::query_as::<Postgres, Invoice>(&query);
        if let Some(ref number) = edit.number {
            query_builder = query_builder.bind(number);
        }
        if let Some(date) = edit.date {
            query_builder = query_builder.bind(date);
        }
        if let Some(amount) = edit.amount {
            query_builder = query_builder.bind(amount);
        }
        if let Some(tax_amount) = edit.tax_amount {
            query_builder = query_builder.bind(tax_amount);
        }
        if let Some(vehicle_id) = edit.vehicle_id {
            query_builder = query_builder.bind(vehicle_id);
        }
        query_builder = query_builder.bind(id);

        let invoice = query_builder.fetch_optional(&self.pool).await?;

        Ok(invoice)
    }

    /// Delete the invoice row alone. The approval cascade for APPROVED
    /// invoices runs in its own transaction before this is reachable.
    #[tracing::instrument(skip(self), fields(db.table = "invoices", db.operation = "delete", db.record_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected > 0)
    }
}

/// Build the dynamic UPDATE for an operator review edit.
///
/// Only fields present in the edit are written; the statement is guarded on
/// status = 'review' so stale edits cannot touch approved invoices.
fn build_review_update_sql(edit: &ReviewEdit) -> String {
    let mut query = String::from("UPDATE invoices SET updated_at = NOW()");
    let mut bind_index = 1;

    if edit.number.is_some() {
        query.push_str(&format!(", number = ${}", bind_index));
        bind_index += 1;
    }
    if edit.date.is_some() {
        query.push_str(&format!(", date = ${}", bind_index));
        bind_index += 1;
    }
    if edit.amount.is_some() {
        query.push_str(&format!(", amount = ${}", bind_index));
        bind_index += 1;
    }
    if edit.tax_amount.is_some() {
        query.push_str(&format!(", tax_amount = ${}", bind_index));
        bind_index += 1;
    }
    if edit.vehicle_id.is_some() {
        query.push_str(&format!(", vehicle_id = ${}", bind_index));
        bind_index += 1;
    }

    query.push_str(&format!(
        " WHERE id = ${} AND status = 'review' RETURNING {}",
        bind_index, INVOICE_COLUMNS
    ));

    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_update_sql_binds_in_field_order() {
        let edit = ReviewEdit {
            number: Some("F-2024-001".to_string()),
            amount: Some(99.5),
            ..Default::default()
        };
        let sql = build_review_update_sql(&edit);
        assert!(sql.contains("number = $1"));
        assert!(sql.contains("amount = $2"));
        assert!(sql.contains("WHERE id = $3 AND status = 'review'"));
        assert!(!sql.contains("tax_amount ="));
        assert!(!sql.contains("vehicle_id ="));
    }

    #[test]
    fn test_review_update_sql_full_edit() {
        let edit = ReviewEdit {
            number: Some("F-1".to_string()),
            date: Some(chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            amount: Some(1.0),
            tax_amount: Some(0.21),
            vehicle_id: Some(Uuid::new_v4()),
        };
        let sql = build_review_update_sql(&edit);
        assert!(sql.contains("vehicle_id = $5"));
        assert!(sql.contains("WHERE id = $6"));
        assert!(sql.contains("RETURNING"));
    }
}
