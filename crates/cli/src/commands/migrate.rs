use negotiator_core::config::LoadOptions;
use negotiator_db::migrations;

use crate::commands::{block_on, load_config, open_database, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("migrate", async {
        let pool = open_database(&config).await?;
        let pending = migrations::pending_count(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok(pending)
    });

    match result {
        Ok(0) => CommandResult::success("migrate", "applied pending migrations"),
        Ok(pending) => CommandResult::failure(
            "migrate",
            "migration",
            format!("{pending} migrations still pending after run"),
            5,
        ),
        Err(failure) => failure,
    }
}
