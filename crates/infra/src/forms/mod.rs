//! Form pipeline: storage, the simulated workload, the application service
//! and the two job handlers.
//!
//! ```text
//! submit -> [verification] VerifyEmail -> [email] SendWelcomeEmail
//! ```

pub mod handlers;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod workload;

pub use handlers::{SendWelcomeEmailHandler, VerifyEmailHandler, register_form_handlers};
pub use postgres::PostgresFormRepository;
pub use repository::{
    FormActivity, FormCounts, FormRepository, FormStoreError, InMemoryFormRepository,
    ProcessingTimes,
};
pub use service::{AgentFormService, FormStatistics, ServiceError};
pub use workload::{SimulatedWorkload, Workload, WorkloadError};
