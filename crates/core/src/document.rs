//! Printable view of a quote, shared by the PDF renderer and any other exporter.

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::client::Client;
use crate::domain::quote::{LineItem, Quote};
use crate::pricing::{format_money, TaxBreakdown};

pub const VALIDITY_DISCLAIMER: &str =
    "Ce devis est valable 30 jours à compter de sa date d'émission.";

pub const DOCUMENT_DATE_FORMAT: &str = "%d/%m/%Y";

pub fn format_document_date(date: NaiveDate) -> String {
    date.format(DOCUMENT_DATE_FORMAT).to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentLine {
    pub description: String,
    pub quantity: u32,
    pub unit_price: String,
    pub amount: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteDocument {
    pub company_name: String,
    pub number: String,
    pub status: String,
    pub client_name: String,
    pub client_address: Option<String>,
    pub created_on: String,
    pub valid_until: String,
    pub payment_terms: String,
    pub notes: Option<String>,
    pub lines: Vec<DocumentLine>,
    pub pre_tax_total: String,
    pub tax_rate: String,
    pub tax_amount: String,
    pub tax_inclusive_total: String,
    pub disclaimer: String,
}

impl QuoteDocument {
    pub fn build(
        company_name: &str,
        quote: &Quote,
        client: &Client,
        lines: &[LineItem],
    ) -> Self {
        let taxes = TaxBreakdown::from_pre_tax(quote.pre_tax_total);

        Self {
            company_name: company_name.to_owned(),
            number: quote.number.to_string(),
            status: quote.status.label().to_owned(),
            client_name: client.name.clone(),
            client_address: client.address.clone(),
            created_on: format_document_date(quote.created_at.date_naive()),
            valid_until: format_document_date(quote.valid_until),
            payment_terms: quote.payment_terms.clone(),
            notes: quote.notes.clone(),
            lines: lines
                .iter()
                .map(|line| DocumentLine {
                    description: line.description.clone(),
                    quantity: line.quantity,
                    unit_price: format_money(line.unit_price),
                    amount: format_money(line.amount),
                })
                .collect(),
            pre_tax_total: format_money(taxes.pre_tax_total),
            tax_rate: TaxBreakdown::rate_label(),
            tax_amount: format_money(taxes.tax_amount),
            tax_inclusive_total: format_money(taxes.tax_inclusive_total),
            disclaimer: VALIDITY_DISCLAIMER.to_owned(),
        }
    }

    /// Download name, e.g. `devis_DEV-202610-0001.pdf`.
    pub fn file_name(&self, extension: &str) -> String {
        format!("devis_{}.{extension}", self.number)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{QuoteDocument, VALIDITY_DISCLAIMER};
    use crate::domain::client::{Client, ClientId};
    use crate::domain::quote::{LineItem, LineItemId, Quote, QuoteId, QuoteStatus};
    use crate::numbering::QuoteNumber;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("valid decimal")
    }

    #[test]
    fn document_carries_formatted_dates_amounts_and_disclaimer() {
        let client = Client {
            id: ClientId(1),
            name: "Atelier Dubois".to_string(),
            email: "contact@dubois.fr".to_string(),
            phone: String::new(),
            address: Some("12 rue des Lilas, Lyon".to_string()),
            notes: None,
            created_at: Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).single().expect("instant"),
            created_by: None,
        };
        let quote = Quote {
            id: QuoteId(7),
            number: QuoteNumber::parse("DEV-202610-0003").expect("number"),
            client_id: client.id,
            created_at: Utc.with_ymd_and_hms(2026, 10, 5, 9, 30, 0).single().expect("instant"),
            valid_until: NaiveDate::from_ymd_opt(2026, 11, 4).expect("date"),
            pre_tax_total: dec("10.03"),
            payment_terms: "30 jours fin de mois".to_string(),
            notes: None,
            status: QuoteStatus::Sent,
            created_by: Some("marie".to_string()),
        };
        let lines = vec![LineItem {
            id: LineItemId(1),
            quote_id: quote.id,
            description: "Vis inox".to_string(),
            quantity: 17,
            unit_price: dec("0.59"),
            amount: dec("10.03"),
        }];

        let document = QuoteDocument::build("Devis SARL", &quote, &client, &lines);

        assert_eq!(document.number, "DEV-202610-0003");
        assert_eq!(document.status, "Envoyé");
        assert_eq!(document.created_on, "05/10/2026");
        assert_eq!(document.valid_until, "04/11/2026");
        assert_eq!(document.lines[0].unit_price, "0.59");
        assert_eq!(document.pre_tax_total, "10.03");
        assert_eq!(document.tax_rate, "20%");
        assert_eq!(document.tax_amount, "2.01");
        assert_eq!(document.tax_inclusive_total, "12.04");
        assert_eq!(document.disclaimer, VALIDITY_DISCLAIMER);
        assert_eq!(document.file_name("pdf"), "devis_DEV-202610-0003.pdf");
    }
}
