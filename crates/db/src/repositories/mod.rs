use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use negotiator_core::errors::ApplicationError;

pub mod agent;
pub mod checkpoint;
pub mod conversation;
pub mod deal;
pub mod influencer;
pub mod message;
pub mod offer;
pub mod turn;

pub use agent::{AgentRecord, SqlAgentRepository};
pub use checkpoint::SqlCheckpointStore;
pub use conversation::{ConversationRecord, ConversationSummary, SqlConversationRepository};
pub use deal::{SqlBenchmarkSource, SqlDealRepository};
pub use influencer::{InfluencerProfileUpdate, InfluencerRecord, SqlInfluencerRepository};
pub use message::SqlMessageRepository;
pub use offer::{SqlOfferRepository, StoredOffer};
pub use turn::{commit_turn, TurnCommit};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// Fixed-width UTC timestamps so lexical order matches time order.
pub(crate) fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn money(value: Decimal) -> String {
    value.round_dp(2).to_string()
}

pub(crate) fn parse_money(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn parse_enum<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn to_unsigned<T: TryFrom<i64>>(column: &str, value: i64) -> Result<T, RepositoryError> {
    T::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: {value} is out of range")))
}

pub(crate) fn to_signed<T: TryInto<i64>>(column: &str, value: T) -> Result<i64, RepositoryError> {
    value
        .try_into()
        .map_err(|_| RepositoryError::Decode(format!("{column}: value does not fit in i64")))
}


#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{money, parse_money, parse_timestamp, timestamp, RepositoryError};
    use negotiator_core::errors::ApplicationError;

    #[test]
    fn timestamps_round_trip_at_fixed_width() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let text = timestamp(&at);

        assert_eq!(text, "2026-03-01T12:00:00.000000Z");
        assert_eq!(parse_timestamp("created_at", &text).expect("parse"), at);
    }

    #[test]
    fn money_is_stored_at_cent_precision() {
        assert_eq!(money(Decimal::new(4_000_005, 3)), "4000.00");
        assert_eq!(parse_money("price", "2800.50").expect("parse"), Decimal::new(280_050, 2));
        assert!(matches!(parse_money("price", "abc"), Err(RepositoryError::Decode(_))));
    }

    #[test]
    fn repository_errors_surface_as_persistence_failures() {
        let error: ApplicationError = RepositoryError::NotFound("thread t-1".to_owned()).into();
        assert!(matches!(error, ApplicationError::Persistence(ref msg) if msg.contains("t-1")));
    }
}
