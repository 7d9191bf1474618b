use negotiator_core::config::LoadOptions;
use negotiator_db::repositories::{ConversationSummary, SqlConversationRepository};

use crate::commands::{block_on, load_config, open_database, CommandResult};

pub const DEFAULT_LIMIT: u32 = 20;

pub fn run(options: LoadOptions, limit: u32) -> CommandResult {
    let config = match load_config("list-conversations", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("list-conversations", async {
        let pool = open_database(&config).await?;
        let conversations = SqlConversationRepository::new(pool.clone())
            .list(limit)
            .await
            .map_err(|error| ("persistence", error.to_string(), 4u8))?;
        pool.close().await;
        Ok(conversations)
    });

    match result {
        Ok(conversations) => CommandResult::success("list-conversations", render(&conversations)),
        Err(failure) => failure,
    }
}

fn render(conversations: &[ConversationSummary]) -> String {
    if conversations.is_empty() {
        return "no conversations yet".to_string();
    }

    conversations
        .iter()
        .map(|summary| {
            let record = &summary.record;
            format!(
                "{} agent={} influencer={} status={} owner={} messages={} updated={}",
                record.thread_id,
                record.agent_id,
                record.influencer_phone,
                record.status.as_str(),
                record.owner.as_str(),
                summary.message_count,
                record.updated_at.format("%Y-%m-%d %H:%M"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
