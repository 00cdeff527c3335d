use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Processing life cycle of an uploaded invoice document.
///
/// All legal transitions go through [`InvoiceStatus::can_transition_to`];
/// call sites must never compare raw status strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Processing,
    Review,
    Approved,
    Failed,
}

impl InvoiceStatus {
    /// Single source of truth for the state machine.
    ///
    /// `Review -> Pending` is the operator reject loop and `Failed -> Pending`
    /// the operator retry loop; everything else is one-directional.
    pub fn can_transition_to(self, to: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Review)
                | (Processing, Failed)
                | (Review, Approved)
                | (Review, Pending)
                | (Failed, Pending)
        )
    }

    /// Whether an invoice in this status may be deleted without a cascade.
    /// Approved invoices need the approval cleanup cascade first.
    pub fn deletable_without_cascade(self) -> bool {
        !matches!(self, InvoiceStatus::Approved)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InvoiceStatus::Approved)
    }
}

impl Display for InvoiceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            InvoiceStatus::Pending => write!(f, "pending"),
            InvoiceStatus::Processing => write!(f, "processing"),
            InvoiceStatus::Review => write!(f, "review"),
            InvoiceStatus::Approved => write!(f, "approved"),
            InvoiceStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "processing" => Ok(InvoiceStatus::Processing),
            "review" => Ok(InvoiceStatus::Review),
            "approved" => Ok(InvoiceStatus::Approved),
            "failed" => Ok(InvoiceStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid invoice status: {}", s)),
        }
    }
}

/// One uploaded document and its processing life cycle.
///
/// `extracted_data` holds the serialized `ExtractedInvoiceData` payload and
/// is only populated once an extraction has succeeded. `number`, `date` and
/// `amount` are authoritative only from REVIEW onwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// Storage key of the backing document.
    pub file_path: String,
    pub file_url: String,
    pub original_filename: String,
    pub status: InvoiceStatus,
    pub number: Option<String>,
    pub date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub extracted_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub vehicle_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Invoice {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Invoice {
            id: row.get("id"),
            file_path: row.get("file_path"),
            file_url: row.get("file_url"),
            original_filename: row.get("original_filename"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse invoice status: {}", e).into())
            })?,
            number: row.get("number"),
            date: row.get("date"),
            amount: row.get("amount"),
            tax_amount: row.get("tax_amount"),
            extracted_data: row.get("extracted_data"),
            error_message: row.get("error_message"),
            vehicle_id: row.get("vehicle_id"),
            supplier_id: row.get("supplier_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Operator edit of a reviewed invoice's headline fields.
///
/// Only fields that are `Some` are written; the payload itself and the status
/// are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewEdit {
    pub number: Option<String>,
    pub date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub vehicle_id: Option<Uuid>,
}

impl ReviewEdit {
    pub fn is_empty(&self) -> bool {
        self.number.is_none()
            && self.date.is_none()
            && self.amount.is_none()
            && self.tax_amount.is_none()
            && self.vehicle_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_round_trip() {
        for status in [
            InvoiceStatus::Pending,
            InvoiceStatus::Processing,
            InvoiceStatus::Review,
            InvoiceStatus::Approved,
            InvoiceStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<InvoiceStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn test_legal_transitions() {
        use InvoiceStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Review));
        assert!(Processing.can_transition_to(Failed));
        assert!(Review.can_transition_to(Approved));
        // Operator loops
        assert!(Review.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_illegal_transitions() {
        use InvoiceStatus::*;
        // Approved is terminal
        for to in [Pending, Processing, Review, Failed] {
            assert!(!Approved.can_transition_to(to));
        }
        // Approve only from review
        assert!(!Pending.can_transition_to(Approved));
        assert!(!Processing.can_transition_to(Approved));
        assert!(!Failed.can_transition_to(Approved));
        // Retry only from failed, reject only from review
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Pending));
        // No skipping the processing step
        assert!(!Pending.can_transition_to(Review));
        assert!(!Pending.can_transition_to(Failed));
    }

    #[test]
    fn test_deletable_without_cascade() {
        assert!(InvoiceStatus::Pending.deletable_without_cascade());
        assert!(InvoiceStatus::Failed.deletable_without_cascade());
        assert!(InvoiceStatus::Review.deletable_without_cascade());
        assert!(!InvoiceStatus::Approved.deletable_without_cascade());
    }

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&InvoiceStatus::Review).unwrap(),
            "\"review\""
        );
        let parsed: InvoiceStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, InvoiceStatus::Failed);
    }

    #[test]
    fn test_review_edit_is_empty() {
        assert!(ReviewEdit::default().is_empty());
        let edit = ReviewEdit {
            amount: Some(120.5),
            ..Default::default()
        };
        assert!(!edit.is_empty());
    }
}
