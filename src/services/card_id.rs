use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};

use crate::services::card_store::{CardStore, StoreError};

pub const CARD_ID_PREFIX: &str = "OMA";

/// Length of the random suffix of a card ID.
pub const CODE_LEN: usize = 4;

/// Attempts made by [`generate_unique`] before giving up.
pub const MAX_ATTEMPTS: usize = 5;

const CODE_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Largest multiple of the alphabet size that fits in a byte; draws at or
/// above it are discarded so every symbol is equally likely.
const REJECTION_BOUND: u8 = (256 / CODE_ALPHABET.len() * CODE_ALPHABET.len()) as u8;

#[derive(thiserror::Error, Debug)]
pub enum CardIdError {
    #[error("Random source unavailable")]
    RandomUnavailable,

    #[error("Could not generate an unused card ID after {0} attempts")]
    Exhausted(usize),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Supplies the random suffix of new card IDs.
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> Result<String, CardIdError>;
}

/// Draws codes from the operating system's CSPRNG
#[derive(Clone)]
pub struct CardIdGenerator {
    rng: SystemRandom,
}

impl CardIdGenerator {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for CardIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSource for CardIdGenerator {
    fn next_code(&self) -> Result<String, CardIdError> {
        let mut code = String::with_capacity(CODE_LEN);
        let mut buf = [0u8; 16];

        while code.len() < CODE_LEN {
            self.rng
                .fill(&mut buf)
                .map_err(|_| CardIdError::RandomUnavailable)?;

            for byte in buf.iter().copied().filter(|b| *b < REJECTION_BOUND) {
                if code.len() == CODE_LEN {
                    break;
                }
                code.push(CODE_ALPHABET[byte as usize % CODE_ALPHABET.len()] as char);
            }
        }

        Ok(code)
    }
}

/// Formats a card ID as `OMA-<YYYYMMDD>-<code>`, dated in UTC.
pub fn format_card_id(now: DateTime<Utc>, code: &str) -> String {
    format!("{}-{}-{}", CARD_ID_PREFIX, now.format("%Y%m%d"), code)
}

/// Generates a card ID that no stored card uses yet.
///
/// Fails closed with [`CardIdError::Exhausted`] rather than reuse a code.
/// The check is not a reservation: a concurrent issuance may still claim the
/// same code before insert, which the store reports as
/// [`StoreError::CardIdTaken`].
#[tracing::instrument(skip(store, codes))]
pub async fn generate_unique<S, C>(
    store: &S,
    codes: &C,
    now: DateTime<Utc>,
) -> Result<String, CardIdError>
where
    S: CardStore,
    C: CodeSource,
{
    for attempt in 1..=MAX_ATTEMPTS {
        let card_id = format_card_id(now, &codes.next_code()?);

        if !store.card_id_exists(&card_id).await? {
            return Ok(card_id);
        }

        tracing::warn!(card_id = %card_id, attempt, "Card ID collision, regenerating");
    }

    Err(CardIdError::Exhausted(MAX_ATTEMPTS))
}
