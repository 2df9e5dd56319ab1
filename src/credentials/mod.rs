//! Credential Store (C4): OAuth/API-key lifecycle for all six vendor
//! families, generalized from the teacher's per-vendor `providers/*/manager`
//! + `providers/*/workers` split into one reusable actor type.

pub mod callback_server;
pub mod credential;
pub mod oauth_flow;
pub mod refresher;
pub mod scheduler;
pub mod store;

pub use callback_server::CallbackResult;
pub use credential::{Credential, CredentialError};
pub use oauth_flow::AuthUrlStyle;
pub use scheduler::{CredentialId, Lease};
pub use store::{CredentialStoreHandle, CredentialStoreMessage};
