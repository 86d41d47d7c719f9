// API module - HTTP endpoints

pub mod cards;
pub mod health;
pub mod middleware;
pub mod verification;
