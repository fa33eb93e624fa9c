use std::str::FromStr;

use rust_decimal::Decimal;

use devis_core::domain::client::{Client, ClientDraft};
use devis_core::domain::quote::{LineItemDraft, QuoteDraft, QuoteStatus};
use devis_core::pricing::pre_tax_total;

use crate::repositories::{ClientRepository, QuoteRepository, RepositoryError};

const SEED_CREATOR: &str = "demo";

const DEMO_CLIENTS: &[DemoClient] = &[
    DemoClient {
        name: "Atelier Roux",
        email: "contact@atelier-roux.fr",
        phone: "04 72 10 20 30",
        address: "8 quai Saint-Vincent, 69001 Lyon",
        quotes: &[
            DemoQuote {
                status: QuoteStatus::Accepted,
                payment_terms: "30 jours fin de mois",
                lines: &[
                    ("Rénovation façade atelier", 1, "1450.00"),
                    ("Peinture boiseries", 12, "35.50"),
                ],
            },
            DemoQuote {
                status: QuoteStatus::Sent,
                payment_terms: "à réception",
                lines: &[("Remplacement vitrage", 4, "189.90")],
            },
        ],
    },
    DemoClient {
        name: "Boulangerie Marchand",
        email: "marchand@boulangerie.fr",
        phone: "01 45 00 11 22",
        address: "14 rue des Martyrs, 75009 Paris",
        quotes: &[
            DemoQuote {
                status: QuoteStatus::Draft,
                payment_terms: "30 jours",
                lines: &[
                    ("Vitrine réfrigérée", 1, "2390.00"),
                    ("Installation et mise en service", 3, "65.00"),
                    ("Contrat entretien annuel", 1, "0.00"),
                ],
            },
            DemoQuote {
                status: QuoteStatus::Rejected,
                payment_terms: "45 jours",
                lines: &[("Four à sole", 1, "8900.00")],
            },
        ],
    },
    DemoClient {
        name: "Cabinet Lefèvre",
        email: "secretariat@cabinet-lefevre.fr",
        phone: "",
        address: "",
        quotes: &[],
    },
];

#[derive(Debug, Clone, Copy)]
struct DemoClient {
    name: &'static str,
    email: &'static str,
    phone: &'static str,
    address: &'static str,
    quotes: &'static [DemoQuote],
}

#[derive(Debug, Clone, Copy)]
struct DemoQuote {
    status: QuoteStatus,
    payment_terms: &'static str,
    lines: &'static [(&'static str, u32, &'static str)],
}

impl DemoClient {
    fn draft(&self) -> ClientDraft {
        ClientDraft {
            name: self.name.to_owned(),
            email: self.email.to_owned(),
            phone: self.phone.to_owned(),
            address: Some(self.address.to_owned()),
            notes: None,
            created_by: Some(SEED_CREATOR.to_owned()),
        }
    }
}

impl DemoQuote {
    fn draft(&self, client: &Client) -> Result<QuoteDraft, RepositoryError> {
        let lines = self
            .lines
            .iter()
            .map(|(description, quantity, unit_price)| {
                Ok(LineItemDraft {
                    description: (*description).to_owned(),
                    quantity: *quantity,
                    unit_price: Decimal::from_str(unit_price).map_err(|error| {
                        RepositoryError::Decode(format!("demo price `{unit_price}`: {error}"))
                    })?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(QuoteDraft {
            client_id: client.id,
            valid_until: None,
            payment_terms: self.payment_terms.to_owned(),
            notes: None,
            created_by: Some(SEED_CREATOR.to_owned()),
            lines,
        })
    }
}

/// Deterministic demo data for local runs: three clients, four quotes in
/// every status. Loaded through the repositories so quote numbers and totals
/// follow the normal rules.
pub struct DemoDataset;

impl DemoDataset {
    /// Loads the dataset unless the database already holds clients.
    pub async fn load(
        clients: &dyn ClientRepository,
        quotes: &dyn QuoteRepository,
    ) -> Result<SeedResult, RepositoryError> {
        if !clients.list().await?.is_empty() {
            return Ok(SeedResult { skipped: true, ..SeedResult::default() });
        }

        let mut result = SeedResult::default();
        for demo in DEMO_CLIENTS {
            let client = clients.create(demo.draft()).await?;
            result.clients_seeded += 1;

            for demo_quote in demo.quotes {
                let quote = quotes.create(demo_quote.draft(&client)?).await?;
                let quote = if demo_quote.status == QuoteStatus::Draft {
                    quote
                } else {
                    quotes.set_status(quote.id, demo_quote.status).await?
                };

                result.quotes_seeded.push(QuoteSeedInfo {
                    number: quote.number.to_string(),
                    client_name: demo.name,
                    status: quote.status,
                    pre_tax_total: quote.pre_tax_total,
                });
            }
        }

        Ok(result)
    }

    /// Checks that every demo client exists with its quotes, and that each
    /// stored total still matches the sum of its lines.
    pub async fn verify(
        clients: &dyn ClientRepository,
        quotes: &dyn QuoteRepository,
    ) -> Result<VerificationResult, RepositoryError> {
        let existing = clients.list().await?;
        let mut checks = Vec::new();

        for demo in DEMO_CLIENTS {
            let Some(client) = existing.iter().find(|client| client.name == demo.name) else {
                checks.push((format!("client:{}", demo.name), false));
                continue;
            };
            checks.push((format!("client:{}", demo.name), true));

            let client_quotes = quotes.list_for_client(client.id).await?;
            checks.push((
                format!("quote-count:{}", demo.name),
                client_quotes.len() == demo.quotes.len(),
            ));

            for demo_quote in demo.quotes {
                checks.push((
                    format!("status:{}:{}", demo.name, demo_quote.status),
                    client_quotes.iter().any(|quote| quote.status == demo_quote.status),
                ));
            }

            for quote in &client_quotes {
                let lines = quotes.lines(quote.id).await?;
                let expected = pre_tax_total(lines.iter().map(|line| line.amount))?;
                checks.push((format!("total:{}", quote.number), quote.pre_tax_total == expected));
            }
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub fn client_count() -> usize {
        DEMO_CLIENTS.len()
    }

    pub fn quote_count() -> usize {
        DEMO_CLIENTS.iter().map(|client| client.quotes.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub skipped: bool,
    pub clients_seeded: usize,
    pub quotes_seeded: Vec<QuoteSeedInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSeedInfo {
    pub number: String,
    pub client_name: &'static str,
    pub status: QuoteStatus,
    pub pre_tax_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
