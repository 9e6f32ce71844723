//! Prize catalog and exchanges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExchangeId, UserId};

/// Maximum length of a client-supplied redemption request id.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// A prize that can be bought with points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    /// Catalog id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Cost in points.
    pub points: i64,
    /// Short description.
    pub description: String,
    /// Bot link where the prize is delivered.
    pub bot_url: String,
}

/// The catalog shipped with the app.
#[must_use]
pub fn default_catalog() -> Vec<Prize> {
    vec![
        Prize {
            id: 1,
            name: "Найди свой путь: практикум по поиску призвания".into(),
            points: 600,
            description: "Пошаговая система для тех, кто хочет понять свои цели, найти дело по душе и перестать сомневаться в своём выборе.".into(),
            bot_url: "https://salebot.site/talentsy_ref1_1".into(),
        },
        Prize {
            id: 2,
            name: "Практикум «Путь к уверенности»".into(),
            points: 600,
            description: "Пошаговая система для тех, кто устал сомневаться в себе, хочет обрести уверенность и повысить самооценку.".into(),
            bot_url: "https://salebot.site/talensy_ref2_1".into(),
        },
    ]
}

/// A recorded redemption. Unique per `(user_id, request_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeExchange {
    /// Exchange id.
    pub exchange_id: ExchangeId,
    /// The redeeming user.
    pub user_id: UserId,
    /// Client idempotency key.
    pub request_id: String,
    /// Catalog id of the prize.
    pub prize_id: u32,
    /// Prize name at the time of redemption.
    pub prize_name: String,
    /// Points debited.
    pub points_spent: i64,
    /// When the exchange happened.
    pub created_at: DateTime<Utc>,
}

impl PrizeExchange {
    /// Build a new exchange for a prize.
    #[must_use]
    pub fn new(user_id: UserId, request_id: String, prize: &Prize) -> Self {
        Self {
            exchange_id: ExchangeId::generate(),
            user_id,
            request_id,
            prize_id: prize.id,
            prize_name: prize.name.clone(),
            points_spent: prize.points,
            created_at: Utc::now(),
        }
    }
}

/// Result of a redemption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// The exchange was recorded and the balance debited.
    Redeemed {
        /// The stored exchange.
        exchange: PrizeExchange,
        /// Balance after the debit.
        balance: i64,
    },
    /// The request id was already used; the original exchange is returned.
    Replayed {
        /// The exchange recorded by the first request.
        exchange: PrizeExchange,
        /// Current balance.
        balance: i64,
    },
}
