//! Scenario tests: whole targets against the in-memory container engine

#[path = "../helpers/mod.rs"]
mod helpers;

mod cancellation;
mod credentials;
mod failure_handling;
mod notification;
mod promotion;
mod self_tests;
mod tier_gating;
