use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::entities::{Account, Instance, InstanceId};
use crate::error::Error;
use crate::ports::{AccountStore, InstanceCatalog};

/// An instance together with whether the given account may launch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAccess {
    pub instance: Instance,
    pub allowed: bool,
}

/// Enforces per-instance whitelists against the active account and keeps the
/// persisted instance selection consistent with it.
pub struct InstanceAccessGate<S, C>
where
    S: AccountStore,
    C: InstanceCatalog,
{
    store: Arc<S>,
    catalog: Arc<C>,
}

impl<S, C> InstanceAccessGate<S, C>
where
    S: AccountStore,
    C: InstanceCatalog,
{
    pub fn new(store: Arc<S>, catalog: Arc<C>) -> Self {
        Self { store, catalog }
    }

    pub fn is_allowed(account: &Account, instance: &Instance) -> bool {
        !instance.whitelist_enabled || instance.whitelisted_names.contains(&account.display_name)
    }

    /// Move the instance selection off an instance the account may not use.
    ///
    /// Prefers the first instance without a whitelist, then the first
    /// whitelist that names the account. When nothing is allowed the
    /// selection is kept and `authorize_launch` denies it.
    ///
    /// Returns the new selection when it changed.
    #[instrument(skip(self, account), fields(account = %account.display_name))]
    pub async fn reconcile(&self, account: &Account) -> Result<Option<InstanceId>, Error> {
        let config = self.store.client_config().await?;
        let Some(selected_id) = config.selected_instance_id else {
            debug!("no instance selected, nothing to reconcile");
            return Ok(None);
        };

        let instances = self.catalog.instances().await?;
        let Some(selected) = instances.iter().find(|i| i.id == selected_id) else {
            debug!(instance = %selected_id, "selected instance not in catalog");
            return Ok(None);
        };

        if Self::is_allowed(account, selected) {
            return Ok(None);
        }

        let replacement = instances
            .iter()
            .find(|i| !i.whitelist_enabled)
            .or_else(|| instances.iter().find(|i| Self::is_allowed(account, i)));

        match replacement {
            Some(instance) => {
                info!(
                    from = %selected_id,
                    to = %instance.id,
                    "selected instance excludes account, switching"
                );
                self.store.set_selected_instance(Some(&instance.id)).await?;
                Ok(Some(instance.id.clone()))
            }
            None => {
                warn!(instance = %selected_id, "no instance available to this account");
                Ok(None)
            }
        }
    }

    /// Persist an explicit instance choice made by the user
    #[instrument(skip(self))]
    pub async fn select_instance(&self, id: &InstanceId) -> Result<Instance, Error> {
        let instance = self
            .catalog
            .instances()
            .await?
            .into_iter()
            .find(|i| &i.id == id)
            .ok_or_else(|| Error::InstanceNotFound(id.clone()))?;

        self.store.set_selected_instance(Some(&instance.id)).await?;
        Ok(instance)
    }

    /// Check that `account` may launch the currently selected instance
    #[instrument(skip(self, account), fields(account = %account.display_name))]
    pub async fn authorize_launch(&self, account: &Account) -> Result<Instance, Error> {
        let selected_id = self
            .store
            .client_config()
            .await?
            .selected_instance_id
            .ok_or(Error::NoInstanceSelected)?;

        let instance = self
            .catalog
            .instances()
            .await?
            .into_iter()
            .find(|i| i.id == selected_id)
            .ok_or(Error::InstanceNotFound(selected_id))?;

        if !Self::is_allowed(account, &instance) {
            warn!(instance = %instance.id, "launch denied by whitelist");
            return Err(Error::AccessDenied {
                instance: instance.id,
                display_name: account.display_name.clone(),
            });
        }

        Ok(instance)
    }

    /// All instances in catalog order, flagged for `account`
    pub async fn instances_for(&self, account: &Account) -> Result<Vec<InstanceAccess>, Error> {
        Ok(self
            .catalog
            .instances()
            .await?
            .into_iter()
            .map(|instance| InstanceAccess {
                allowed: Self::is_allowed(account, &instance),
                instance,
            })
            .collect())
    }
}
