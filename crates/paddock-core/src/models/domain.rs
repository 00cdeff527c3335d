//! Durable domain entities the approval engine creates or resolves.
//!
//! Suppliers, vehicles, maintenance and part rows live outside this pipeline
//! once created; only their creation during approval (and deletion during the
//! invoice cascade) is this core's responsibility.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vehicle {
    pub id: Uuid,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub license_plate: String,
    /// Current odometer reading in kilometers.
    pub kilometers: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Maintenance {
    pub id: Uuid,
    pub date: NaiveDate,
    pub description: String,
    pub mileage: i32,
    /// Aggregated cost: labor plus the total price of every part used.
    pub cost: f64,
    pub vehicle_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Part {
    pub id: Uuid,
    pub name: String,
    pub reference: Option<String>,
    /// Unit price.
    pub price: f64,
    pub quantity: f64,
    /// Absent for standalone purchases with no associated service.
    pub maintenance_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    /// Set when the part was materialized from an approved invoice.
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Everything an approval run created or resolved, returned to the operator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreatedItemsSummary {
    pub maintenances: Vec<CreatedMaintenance>,
    pub parts: Vec<CreatedPart>,
    /// The supplier the invoice was linked to, whether looked up or freshly
    /// created. Null only when the extraction named no supplier.
    pub supplier: Option<ResolvedSupplier>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedMaintenance {
    pub id: Uuid,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPart {
    pub name: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSupplier {
    pub id: Uuid,
    pub name: String,
}
