//! CSV exports of the quote list and the client list.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::document::format_document_date;
use crate::domain::client::Client;
use crate::domain::quote::Quote;
use crate::pricing::{format_money, TaxBreakdown};
use crate::stats::ClientQuoteStats;

pub const QUOTES_CSV_HEADER: [&str; 8] = [
    "Numéro",
    "Client",
    "Date création",
    "Date validité",
    "Montant HT",
    "TVA",
    "Montant TTC",
    "Statut",
];

pub const CLIENTS_CSV_HEADER: [&str; 7] = [
    "Nom",
    "Email",
    "Téléphone",
    "Adresse",
    "Nombre total de devis",
    "Devis acceptés",
    "Montant total des devis acceptés",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer could not be finalized: {0}")]
    Buffer(String),
    #[error("csv output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    Quotes,
    Clients,
}

impl ExportKind {
    fn stem(&self) -> &'static str {
        match self {
            Self::Quotes => "devis",
            Self::Clients => "clients",
        }
    }
}

/// `devis_YYYYMMDD.csv` or `clients_YYYYMMDD.csv`.
pub fn export_file_name(kind: ExportKind, now: DateTime<Utc>) -> String {
    format!("{}_{}.csv", kind.stem(), now.format("%Y%m%d"))
}

/// One row per quote, in the order given. `client_name` resolves the owning client.
pub fn quotes_csv<'a, I, F>(quotes: I, client_name: F) -> Result<String, ExportError>
where
    I: IntoIterator<Item = &'a Quote>,
    F: Fn(&Quote) -> Option<&'a str>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(QUOTES_CSV_HEADER)?;

    for quote in quotes {
        let taxes = TaxBreakdown::from_pre_tax(quote.pre_tax_total);
        writer.write_record([
            quote.number.to_string(),
            client_name(quote).unwrap_or_default().to_owned(),
            format_document_date(quote.created_at.date_naive()),
            format_document_date(quote.valid_until),
            format_money(taxes.pre_tax_total),
            format_money(taxes.tax_amount),
            format_money(taxes.tax_inclusive_total),
            quote.status.label().to_owned(),
        ])?;
    }

    finish(writer)
}

pub fn clients_csv<'a, I>(clients: I) -> Result<String, ExportError>
where
    I: IntoIterator<Item = (&'a Client, ClientQuoteStats)>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CLIENTS_CSV_HEADER)?;

    for (client, stats) in clients {
        writer.write_record([
            client.name.clone(),
            client.email.clone(),
            client.phone.clone(),
            client.address.clone().unwrap_or_default(),
            stats.total.to_string(),
            stats.accepted.to_string(),
            format_money(stats.accepted_total),
        ])?;
    }

    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer.into_inner().map_err(|err| ExportError::Buffer(err.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}
