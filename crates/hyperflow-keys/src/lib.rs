//! Provider credential management.
//!
//! Secrets are sealed by a [`CredentialVault`] before they reach storage, kept
//! in a [`KeyStore`](hyperflow_core::traits::KeyStore) (SQLite by default), and
//! handed out by the [`ProviderKeyRotator`], which spreads load across keys and
//! fails over when one stops working.

pub mod rotator;
pub mod store;
pub mod vault;

pub use rotator::{ProviderKeyRotator, FAILURE_THRESHOLD};
pub use store::SqliteKeyStore;
pub use vault::CredentialVault;
