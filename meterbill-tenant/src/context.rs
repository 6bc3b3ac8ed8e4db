use crate::credential::ServiceCredential;
use uuid::Uuid;

/// Per-operation tenant scope: an organization id plus the credential that
/// authorizes outbound calls made on its behalf.
///
/// This is passed as an explicit argument to every C2–C4/C9 call and every
/// C7 write, never carried as ambient (thread-local/task-local) state — see
/// the Design Note in `spec.md` §9. The pricing engine (`meterbill-pricing`)
/// never sees this type: it is purely data-dependent.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub organization_id: Uuid,
    pub credential: ServiceCredential,
}

impl TenantContext {
    pub fn new(organization_id: Uuid, credential: ServiceCredential) -> Self {
        Self {
            organization_id,
            credential,
        }
    }
}
