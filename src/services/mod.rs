// Services module - Business logic

pub mod asset_store;
pub mod card_id;
pub mod card_lifecycle;
pub mod card_store;
pub mod card_verifier;
pub mod qr_generator;
