// Models module - Database entity representations

pub mod card;
pub mod member;

pub use card::{Card, CardPatch, CardStatus, CardView, NewCard};
pub use member::MemberSummary;
