//! Compliance Service - fiscal invoice classification, signing identity and
//! tax authority registration.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;
