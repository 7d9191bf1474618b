use negotiator_core::config::LoadOptions;
use negotiator_db::{DealSeedDataset, SeedResult, VerificationResult};

use crate::commands::{block_on, load_config, open_database, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("seed", async {
        let pool = open_database(&config).await?;

        let seeded = DealSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DealSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;
        Ok((seeded, verification))
    });

    match result {
        Ok((seeded, verification)) if verification.all_present => {
            CommandResult::success("seed", seed_message(&seeded))
        }
        Ok((_, verification)) => {
            CommandResult::failure("seed", "seed_verification", verification_message(&verification), 6)
        }
        Err(failure) => failure,
    }
}

fn seed_message(result: &SeedResult) -> String {
    if result.inserted == 0 {
        format!("deal table already holds {} deals; nothing inserted", result.existing)
    } else {
        format!("seeded {} historical deals", result.inserted)
    }
}

fn verification_message(verification: &VerificationResult) -> String {
    let missing = verification.missing();
    if missing.is_empty() {
        "some seed deals failed to load".to_string()
    } else {
        format!("seed verification failed for deals: {}", missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use negotiator_db::{SeedResult, VerificationResult};

    use super::{seed_message, verification_message};

    #[test]
    fn seed_message_reports_skipped_runs() {
        assert_eq!(seed_message(&SeedResult { inserted: 20, existing: 0 }), "seeded 20 historical deals");
        assert_eq!(
            seed_message(&SeedResult { inserted: 0, existing: 20 }),
            "deal table already holds 20 deals; nothing inserted"
        );
    }

    #[test]
    fn verification_message_names_missing_deals() {
        let verification = VerificationResult {
            all_present: false,
            checks: vec![("Ana Fitness", true), ("Bruno Shape", false), ("Hugo Tech", false)],
        };
        assert_eq!(
            verification_message(&verification),
            "seed verification failed for deals: Bruno Shape, Hugo Tech"
        );
    }

    #[test]
    fn verification_message_falls_back_to_generic_when_no_names() {
        let verification = VerificationResult { all_present: false, checks: Vec::new() };
        assert_eq!(verification_message(&verification), "some seed deals failed to load");
    }
}
