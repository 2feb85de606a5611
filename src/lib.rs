//! Seller Onboard — KYC document onboarding core for marketplace sellers.

pub mod blob;
pub mod config;
pub mod error;
pub mod identity;
pub mod onboarding;
pub mod store;
