//! # mqttrules-domain
//!
//! Pure domain model for the mqttrules rule engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Rules** (trigger or schedule → conditions → actions)
//! - Define **Actions** (outbound MQTT publishes) and their payload templates
//! - Define **Intervals** (`@every 10s`) driving schedule rules
//! - Define **Topic matching** (exact and MQTT wildcard filters)
//! - Define **Parameters** (named values usable in conditions and templates)
//! - Define **Events** (match, fire and engine observability records)
//! - Define the immutable, validated **`RuleSet`** snapshot
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod event;
pub mod interval;
pub mod parameter;
pub mod rule;
pub mod rule_set;
pub mod template;
pub mod topic;
