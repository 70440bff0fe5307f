//! Tenants: organizational accounts, their owner mailbox and mail credential.

pub mod model;

pub use model::{ConnectedTenant, Credential, CredentialUpdate, Tenant, TenantOwner};
