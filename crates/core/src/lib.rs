//! `agentform-core`: domain building blocks for the form pipeline.
//!
//! This crate contains **pure domain** types (no infrastructure concerns).

pub mod agent_form;
pub mod email;
pub mod error;
pub mod id;

pub use agent_form::{AgentForm, NewAgentForm, ProcessingStage, MAX_FIELD_LEN};
pub use email::Email;
pub use error::{DomainError, DomainResult, ValidationErrors};
pub use id::FormId;
