use negotiator_core::domain::conversation::{ChatMessage, ConversationStatus, Owner};
use negotiator_core::domain::offer::OfferRecord;
use negotiator_core::flows::Checkpoint;

use super::{checkpoint, conversation, influencer, message, offer};
use super::{InfluencerProfileUpdate, RepositoryError};
use crate::DbPool;

/// Everything a finished turn persists. Written all-or-nothing by [`commit_turn`].
#[derive(Clone, Debug, Default)]
pub struct TurnCommit {
    pub conversation_id: i64,
    pub influencer_id: i64,
    pub messages: Vec<ChatMessage>,
    pub owner: Option<Owner>,
    pub status: Option<ConversationStatus>,
    pub offer: Option<OfferRecord>,
    pub profile: Option<InfluencerProfileUpdate>,
    pub checkpoint: Option<Checkpoint>,
}

impl TurnCommit {
    pub fn new(conversation_id: i64, influencer_id: i64) -> Self {
        Self { conversation_id, influencer_id, ..Self::default() }
    }
}

pub async fn commit_turn(pool: &DbPool, commit: &TurnCommit) -> Result<(), RepositoryError> {
    let mut tx = pool.begin().await?;

    for chat_message in &commit.messages {
        message::append_with(&mut tx, commit.conversation_id, chat_message).await?;
    }
    if let Some(owner) = commit.owner {
        conversation::update_owner_with(&mut tx, commit.conversation_id, owner).await?;
    }
    if let Some(status) = commit.status {
        conversation::update_status_with(&mut tx, commit.conversation_id, status).await?;
    }
    if let Some(record) = &commit.offer {
        offer::insert_with(&mut tx, commit.conversation_id, record).await?;
    }
    if let Some(profile) = &commit.profile {
        influencer::update_profile_with(&mut tx, commit.influencer_id, profile).await?;
    }
    if let Some(saved) = &commit.checkpoint {
        checkpoint::save_with(&mut tx, saved).await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use negotiator_core::domain::agent::AgentProfile;
    use negotiator_core::domain::conversation::{
        ChatMessage, ConversationState, MessageRole, Owner, Platform,
    };
    use negotiator_core::domain::offer::OfferRecord;
    use negotiator_core::flows::{Checkpoint, CheckpointStatus, CheckpointStore, Stage};
    use negotiator_core::pricing::compute_range;

    use super::{commit_turn, TurnCommit};
    use crate::repositories::test_support::memory_pool;
    use crate::repositories::{
        ConversationRecord, InfluencerProfileUpdate, SqlAgentRepository, SqlCheckpointStore,
        SqlConversationRepository, SqlInfluencerRepository, SqlMessageRepository,
        SqlOfferRepository,
    };
    use crate::DbPool;

    async fn conversation() -> (DbPool, ConversationRecord) {
        let pool = memory_pool().await;
        SqlAgentRepository::new(pool.clone())
            .get_or_create(&AgentProfile::default_negotiator(Decimal::from(40)))
            .await
            .expect("agent");
        let influencer = SqlInfluencerRepository::new(pool.clone())
            .get_or_create("+5511944443333")
            .await
            .expect("influencer");
        let record = SqlConversationRepository::new(pool.clone())
            .create("negotiator", influencer.id)
            .await
            .expect("conversation");
        (pool, record)
    }

    #[tokio::test]
    async fn commit_writes_every_part_of_the_turn() {
        let (pool, record) = conversation().await;
        let range = compute_range(100_000, 1, Decimal::from(40), None);
        let mut state = ConversationState::new(
            record.thread_id.clone(),
            record.influencer_phone.clone(),
            "negotiator",
            Decimal::from(40),
        );
        state.price_range = Some(range.clone());

        let mut commit = TurnCommit::new(record.id, record.influencer_id);
        commit.messages = vec![
            ChatMessage::new(MessageRole::User, "Faço reels no instagram"),
            ChatMessage::new(MessageRole::Assistant, "Perfeito! Qual a média de views?"),
        ];
        commit.owner = Some(Owner::Human);
        commit.offer = Some(OfferRecord::from_range(&range, None));
        commit.profile = Some(InfluencerProfileUpdate {
            platform: Some(Platform::Instagram),
            ..InfluencerProfileUpdate::default()
        });
        commit.checkpoint = Some(Checkpoint {
            thread_id: record.thread_id.clone(),
            stage: Stage::Negotiate,
            status: CheckpointStatus::AwaitingMessage,
            state,
            pending_approval: None,
            saved_at: Utc::now(),
        });

        commit_turn(&pool, &commit).await.expect("commit");

        let messages =
            SqlMessageRepository::new(pool.clone()).recent(record.id, 10).await.expect("messages");
        assert_eq!(messages.len(), 2);
        let stored = SqlConversationRepository::new(pool.clone())
            .find_by_thread(&record.thread_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.owner, Owner::Human);
        let offers = SqlOfferRepository::new(pool.clone())
            .list_for_conversation(record.id)
            .await
            .expect("offers");
        assert_eq!(offers.len(), 1);
        let influencer = SqlInfluencerRepository::new(pool.clone())
            .find_by_id(record.influencer_id)
            .await
            .expect("influencer")
            .expect("exists");
        assert_eq!(influencer.platform, Some(Platform::Instagram));
        let checkpoint =
            SqlCheckpointStore::new(pool).load(&record.thread_id).await.expect("checkpoint");
        assert_eq!(checkpoint.map(|c| c.stage), Some(Stage::Negotiate));
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_behind() {
        let (pool, record) = conversation().await;

        let mut commit = TurnCommit::new(record.id, record.influencer_id + 100);
        commit.messages = vec![ChatMessage::new(MessageRole::User, "Oi")];
        commit.offer = Some(OfferRecord::from_range(
            &compute_range(100_000, 1, Decimal::from(40), None),
            None,
        ));
        // The profile write targets a missing influencer, after messages and offer succeeded.
        commit.profile = Some(InfluencerProfileUpdate {
            niche: Some("fitness".to_owned()),
            ..InfluencerProfileUpdate::default()
        });

        assert!(commit_turn(&pool, &commit).await.is_err());

        let messages =
            SqlMessageRepository::new(pool.clone()).recent(record.id, 10).await.expect("messages");
        assert!(messages.is_empty());
        let offers =
            SqlOfferRepository::new(pool).list_for_conversation(record.id).await.expect("offers");
        assert!(offers.is_empty());
    }
}
