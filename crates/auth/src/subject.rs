use serde::{Deserialize, Serialize};

use storedesk_core::{StoreId, TenantId, UserId};

use crate::Role;

/// The actor whose policy layers are evaluated.
///
/// Created at login and replaced as a whole on tenant/store switch; it is
/// never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<StoreId>,
    pub role: Role,
}

impl Subject {
    pub fn new(user_id: UserId, tenant_id: TenantId, role: Role) -> Self {
        Self {
            user_id,
            tenant_id,
            store_id: None,
            role,
        }
    }

    pub fn with_store(mut self, store_id: StoreId) -> Self {
        self.store_id = Some(store_id);
        self
    }

    /// Tenant/store scope string used to partition client-side state
    /// (`"<tenant>/<store>"`, or `"<tenant>/-"` without a store).
    pub fn scope(&self) -> String {
        match self.store_id {
            Some(store) => format!("{}/{}", self.tenant_id, store),
            None => format!("{}/-", self.tenant_id),
        }
    }
}
