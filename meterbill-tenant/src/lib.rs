pub mod context;
pub mod credential;

pub use context::TenantContext;
pub use credential::{CredentialIssuer, ServiceClaims, ServiceCredential};
