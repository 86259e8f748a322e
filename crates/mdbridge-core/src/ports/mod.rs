//! Port traits (hexagonal boundaries)
//!
//! These traits describe the collaborators the runner depends on. Adapters
//! implement them outside this crate: `mdbridge-store` provides the
//! [`IStateRepository`] implementation; the HTTP clients and credential
//! provider live in the application shell. All ports use `async-trait` and
//! `anyhow::Result` because errors at the boundary are adapter-specific.

pub mod credentials;
pub mod doc_client;
pub mod drive_client;
pub mod job_client;
pub mod state_repository;
pub mod transfer_client;

pub use credentials::ICredentialProvider;
pub use doc_client::{BlockPayload, IDocClient, RawBlock};
pub use drive_client::{DeleteOutcome, IDriveClient, RemoteObject, RemoteObjectKind};
pub use job_client::{ExportFormat, IJobClient, JobStatus, JobTicket};
pub use state_repository::IStateRepository;
pub use transfer_client::ITransferClient;
