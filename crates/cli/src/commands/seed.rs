use crate::commands::{open_pool, prepare, CommandResult, StepFailure, EXIT_MIGRATION};
use devis_db::fixtures::{QuoteSeedInfo, SeedResult};
use devis_db::repositories::{SqlClientRepository, SqlQuoteRepository};
use devis_db::{migrations, DemoDataset};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;

        let outcome = async {
            migrations::run_pending(&pool)
                .await
                .map_err(|error| StepFailure::new("migration", error.to_string(), EXIT_MIGRATION))?;

            let clients = SqlClientRepository::new(pool.clone());
            let quotes = SqlQuoteRepository::new(pool.clone());

            let seeded = DemoDataset::load(&clients, &quotes).await.map_err(|error| {
                StepFailure::new("seed_execution", error.to_string(), EXIT_MIGRATION)
            })?;

            if seeded.skipped {
                return Ok(seeded);
            }

            let verification = DemoDataset::verify(&clients, &quotes).await.map_err(|error| {
                StepFailure::new("seed_verification", error.to_string(), EXIT_MIGRATION)
            })?;
            if !verification.all_present {
                let failed: Vec<&str> = verification
                    .checks
                    .iter()
                    .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                    .collect();
                return Err(StepFailure::new(
                    "seed_verification",
                    verification_message(&failed),
                    EXIT_MIGRATION,
                ));
            }

            Ok(seeded)
        }
        .await;

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_message(&seeded)),
        Err(failure) => failure.into_result("seed"),
    }
}

fn seed_message(seeded: &SeedResult) -> String {
    if seeded.skipped {
        return "database already holds clients; demo dataset left untouched".to_string();
    }

    let quotes: Vec<String> = seeded.quotes_seeded.iter().map(describe_quote).collect();
    format!(
        "demo dataset loaded: {} clients, {} quotes\n{}",
        seeded.clients_seeded,
        seeded.quotes_seeded.len(),
        quotes.join("\n")
    )
}

fn describe_quote(quote: &QuoteSeedInfo) -> String {
    format!("  - {}: {} ({}, {} HT)", quote.number, quote.client_name, quote.status, quote.pre_tax_total)
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo records failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use devis_core::domain::quote::QuoteStatus;
    use devis_db::fixtures::{QuoteSeedInfo, SeedResult};
    use rust_decimal::Decimal;

    use super::{seed_message, verification_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["client:Atelier Roux", "total:DEV-202610-0002"]),
            "seed verification failed for checks: client:Atelier Roux, total:DEV-202610-0002"
        );
        assert_eq!(verification_message(&[]), "some demo records failed to load");
    }

    #[test]
    fn seed_message_lists_every_quote() {
        let seeded = SeedResult {
            skipped: false,
            clients_seeded: 1,
            quotes_seeded: vec![QuoteSeedInfo {
                number: "DEV-202610-0001".to_string(),
                client_name: "Atelier Roux",
                status: QuoteStatus::Accepted,
                pre_tax_total: Decimal::from_str("1876.00").expect("decimal"),
            }],
        };

        assert_eq!(
            seed_message(&seeded),
            "demo dataset loaded: 1 clients, 1 quotes\n  - DEV-202610-0001: Atelier Roux (accepted, 1876.00 HT)"
        );
        assert!(seed_message(&SeedResult { skipped: true, ..SeedResult::default() })
            .contains("left untouched"));
    }
}
