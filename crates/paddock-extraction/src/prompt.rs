//! Extraction prompt builder.
//!
//! One prompt handles both classification (maintenance service vs parts-only
//! purchase) and field extraction. Detailed mode prepends an exhaustive
//! re-verification preamble and is used when an operator rejects a previous
//! extraction.

/// Build the extraction prompt.
///
/// `detailed_mode` selects the stricter self-verifying variant used for
/// reprocessing disputed extractions.
pub fn build_extraction_prompt(detailed_mode: bool) -> String {
    let mut prompt = String::from(
        "\
Analyze this invoice and extract ALL of its information as strict JSON.

**IMPORTANT**: Respond ONLY with valid JSON, no additional text.
",
    );

    if detailed_mode {
        prompt.push_str(
            "\
**DETAILED MODE**: This invoice was previously rejected because of extraction
errors. Perform an EXHAUSTIVE and CRITICAL analysis of every field.
- Double-check every number, date and total.
- Be careful to distinguish labor (maintenance work) from parts purchases.
- Look for subtle details that may have been missed the first time.
- When a field is ambiguous, prefer the most plausible reading for a vehicle
  repair shop invoice.
",
        );
    }

    prompt.push_str(
        r#"
**INVOICE CLASSIFICATION (VERY IMPORTANT):**

Decide whether this invoice is:

A) MAINTENANCE SERVICE (is_maintenance=true):
   The invoice includes work or services performed on a vehicle.
   Key indicators: labor charges; action words such as "replacement of",
   "repair of", "installation of", "inspection of"; services like oil change,
   wheel alignment, balancing, diagnostics; mechanical work such as brake
   repair or timing belt replacement. It may also list parts used during the
   service.
   Action: populate the "maintenances" array with description, labor_cost
   (when itemized separately) and the parts used during the service.

B) PARTS PURCHASE (is_parts_only=true):
   Only spare parts were bought, with no installation or associated labor.
   Key indicators: only products listed, no labor charges, wording like
   "sale", "purchase", "supply"; plain product descriptions such as
   "Oil filter" or "Tyre 205/55R16"; invoices from parts distributors.
   Action: populate the "parts_only" array with the purchased parts.

**DECISION RULE (apply in this order):**
1. Is there a labor/service charge? YES = is_maintenance=true
2. Are there action words (replacement, repair, installation, inspection)?
   YES = is_maintenance=true
3. Only products, no associated service? YES = is_parts_only=true
4. IMPORTANT: is_maintenance and is_parts_only are MUTUALLY EXCLUSIVE
   (only one may be true).

JSON structure:
{
    "invoice_number": "string or null",
    "invoice_date": "YYYY-MM-DD or null",
    "supplier_name": "string or null",
    "supplier_address": "string or null",
    "supplier_tax_id": "string or null",

    "is_maintenance": boolean,
    "is_parts_only": boolean,

    "vehicle_plate": "string or null (license plate if present)",
    "vehicle_vin": "string or null (VIN if present)",
    "mileage": number or null (odometer reading if present),

    "maintenances": [
        {
            "description": "string (work performed)",
            "labor_cost": number or null,
            "parts": [
                {
                    "name": "string",
                    "reference": "string or null",
                    "quantity": number,
                    "unit_price": number,
                    "total_price": number
                }
            ]
        }
    ],

    "parts_only": [
        {
            "name": "string",
            "reference": "string or null",
            "quantity": number,
            "unit_price": number,
            "total_price": number
        }
    ],

    "subtotal": number or null,
    "tax_amount": number or null,
    "total_amount": number,

    "confidence": number between 0 and 1
}

**Rules:**
- For maintenance work use "maintenances" with a description and its parts;
  for bare purchases use "parts_only".
- Extract EVERY line item, part and price you can see.
- Use null when a value is not present.
- Prices must be plain numbers (no currency symbols); dates in ISO format.
- IMPORTANT: if the invoice lists multiple services, consolidate them into a
  SINGLE object in "maintenances": one summarized description covering all
  work performed, all labor charges summed into a single "labor_cost", all
  parts grouped into one "parts" array. "maintenances" must contain AT MOST
  one element.
"#,
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_prompt_demands_strict_json() {
        let prompt = build_extraction_prompt(false);
        assert!(prompt.contains("ONLY with valid JSON"));
        assert!(prompt.contains("\"total_amount\": number"));
        assert!(prompt.contains("MUTUALLY EXCLUSIVE"));
        assert!(!prompt.contains("DETAILED MODE"));
    }

    #[test]
    fn test_detailed_mode_adds_verification_preamble() {
        let prompt = build_extraction_prompt(true);
        assert!(prompt.contains("DETAILED MODE"));
        assert!(prompt.contains("Double-check every number"));
        // The base content is still present
        assert!(prompt.contains("INVOICE CLASSIFICATION"));
    }

    #[test]
    fn test_prompt_requests_single_consolidated_maintenance() {
        let prompt = build_extraction_prompt(false);
        assert!(prompt.contains("AT MOST"));
    }
}
