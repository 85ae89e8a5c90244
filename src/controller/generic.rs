//! Generic get-or-create-or-update reconciliation
//!
//! `reconcile_resource` drives one resource toward an expected state:
//! it fetches the live object, creates it when absent, and otherwise
//! updates it only when the caller's divergence predicate fires. Every call
//! re-derives truth from the API server, so the function is safe to run again
//! after a crash or a failed write.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use tracing::{debug, error, info};

use super::client::{ManagedResource, PlatformClient};
use crate::error::{Error, Result};

/// Side-effect hook run at a fixed point of the reconciliation
pub type Hook<'a> = Box<dyn FnMut() -> Result<()> + Send + 'a>;
/// Returns true when the live object diverges from the expected one
pub type NeedsUpdateFn<'a, K> = Box<dyn Fn(&K, &K) -> bool + Send + Sync + 'a>;
/// Applies the expected state onto the live object in place
pub type UpdateReconciledFn<'a, K> = Box<dyn FnMut(&K, &mut K) + Send + 'a>;

/// What a reconciliation call did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Controlling owner of a reconciled resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    pub api_version: String,
    pub kind: String,
    pub name: Option<String>,
    pub uid: Option<String>,
}

impl Owner {
    pub fn of<O: Resource<DynamicType = ()>>(owner: &O) -> Self {
        Self {
            api_version: O::api_version(&()).to_string(),
            kind: O::kind(&()).to_string(),
            name: owner.meta().name.clone(),
            uid: owner.meta().uid.clone(),
        }
    }

    fn controller_reference(&self) -> std::result::Result<OwnerReference, String> {
        if self.kind.is_empty() || self.api_version.is_empty() {
            return Err("owner kind cannot be resolved".to_string());
        }
        let name = self
            .name
            .clone()
            .ok_or_else(|| format!("{} owner has no name", self.kind))?;
        let uid = self
            .uid
            .clone()
            .ok_or_else(|| format!("{} {} has no uid", self.kind, name))?;

        Ok(OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name,
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}

/// Stamp `owner` as the controller of `meta`.
///
/// A reference to the same owner is replaced; a controller reference to any
/// other owner is an error, an object has at most one controller.
pub fn set_controller_reference(
    owner: &Owner,
    meta: &mut ObjectMeta,
) -> std::result::Result<(), String> {
    let reference = owner.controller_reference()?;
    let refs = meta.owner_references.get_or_insert_with(Vec::new);

    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != reference.uid)
    {
        return Err(format!(
            "already controlled by {} {}",
            other.kind, other.name
        ));
    }

    match refs.iter_mut().find(|r| r.uid == reference.uid) {
        Some(existing) => *existing = reference,
        None => refs.push(reference),
    }
    Ok(())
}

/// Parameters of one `reconcile_resource` call
///
/// Required fields are optional here so that a missing one is reported as a
/// validation error before any API call is made.
pub struct ReconcileParams<'a, C, K> {
    pub client: &'a C,
    /// Set as the controller owner reference of the expected object
    pub owner: Option<Owner>,
    /// Expected state going into reconciliation
    pub expected: Option<&'a K>,
    /// Receives the live state, then the state written back
    pub reconciled: Option<&'a mut K>,
    pub needs_update: Option<NeedsUpdateFn<'a, K>>,
    pub update_reconciled: Option<UpdateReconciledFn<'a, K>>,
    /// Called just before the resource is created
    pub pre_create: Option<Hook<'a>>,
    /// Called just before the resource is updated
    pub pre_update: Option<Hook<'a>>,
    /// Called after the resource is successfully updated
    pub post_update: Option<Hook<'a>>,
}

impl<'a, C, K> ReconcileParams<'a, C, K> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            owner: None,
            expected: None,
            reconciled: None,
            needs_update: None,
            update_reconciled: None,
            pre_create: None,
            pre_update: None,
            post_update: None,
        }
    }

    pub fn owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn expected(mut self, expected: &'a K) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn reconciled(mut self, reconciled: &'a mut K) -> Self {
        self.reconciled = Some(reconciled);
        self
    }

    pub fn needs_update(mut self, f: impl Fn(&K, &K) -> bool + Send + Sync + 'a) -> Self {
        self.needs_update = Some(Box::new(f));
        self
    }

    pub fn update_reconciled(mut self, f: impl FnMut(&K, &mut K) + Send + 'a) -> Self {
        self.update_reconciled = Some(Box::new(f));
        self
    }

    pub fn pre_create(mut self, f: impl FnMut() -> Result<()> + Send + 'a) -> Self {
        self.pre_create = Some(Box::new(f));
        self
    }

    pub fn pre_update(mut self, f: impl FnMut() -> Result<()> + Send + 'a) -> Self {
        self.pre_update = Some(Box::new(f));
        self
    }

    pub fn post_update(mut self, f: impl FnMut() -> Result<()> + Send + 'a) -> Self {
        self.post_update = Some(Box::new(f));
        self
    }
}

fn missing(field: &str) -> Error {
    Error::ValidationError(format!("{field} must be set"))
}

fn run_hook(hook: &mut Option<Hook<'_>>) -> Result<()> {
    match hook {
        Some(f) => f(),
        None => Ok(()),
    }
}

/// Kind, namespace and name of the expected object
fn identity<K: ManagedResource>(expected: &K) -> Result<(String, String, String)> {
    let kind = K::kind(&()).to_string();
    if kind.is_empty() {
        return Err(Error::IdentityError(
            "resource kind cannot be resolved".to_string(),
        ));
    }

    let meta = expected.meta();
    let name = meta
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::IdentityError(format!("{kind} has no metadata.name")))?;
    let namespace = meta
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| Error::IdentityError(format!("{kind} {name} has no metadata.namespace")))?;

    Ok((kind, namespace, name))
}

/// Reconcile one resource toward its expected state
pub async fn reconcile_resource<C, K>(params: ReconcileParams<'_, C, K>) -> Result<ReconcileOutcome>
where
    C: PlatformClient,
    K: ManagedResource,
{
    let ReconcileParams {
        client,
        owner,
        expected,
        reconciled,
        needs_update,
        update_reconciled,
        mut pre_create,
        mut pre_update,
        mut post_update,
    } = params;

    // Fails on the first missing field, before any I/O
    let expected = expected.ok_or_else(|| missing("Expected"))?;
    let reconciled = reconciled.ok_or_else(|| missing("Reconciled"))?;
    let needs_update = needs_update.ok_or_else(|| missing("NeedsUpdate"))?;
    let mut update_reconciled = update_reconciled.ok_or_else(|| missing("UpdateReconciled"))?;

    let (kind, namespace, name) = identity(expected)?;

    let mut expected = expected.clone();
    if let Some(owner) = &owner {
        set_controller_reference(owner, expected.meta_mut()).map_err(|reason| {
            Error::OwnershipError {
                kind: kind.clone(),
                namespace: namespace.clone(),
                name: name.clone(),
                reason,
            }
        })?;
    }

    match client.get::<K>(&namespace, &name).await {
        Ok(Some(live)) => *reconciled = live,
        Ok(None) => {
            info!(%kind, %namespace, %name, "Creating resource");
            run_hook(&mut pre_create)?;
            *reconciled = expected.clone();
            *reconciled = client.create(&*reconciled).await?;
            return Ok(ReconcileOutcome::Created);
        }
        Err(e) => {
            error!(%kind, %namespace, %name, error = %e, "Generic GET failed");
            return Err(Error::IoError {
                operation: "get",
                kind,
                namespace,
                name,
                source: e,
            });
        }
    }

    if !needs_update(&expected, &*reconciled) {
        debug!(%kind, %namespace, %name, "Resource up to date");
        return Ok(ReconcileOutcome::Unchanged);
    }

    info!(%kind, %namespace, %name, "Updating resource");
    run_hook(&mut pre_update)?;
    update_reconciled(&expected, &mut *reconciled);
    *reconciled = client.update(&*reconciled).await?;
    run_hook(&mut post_update)?;

    Ok(ReconcileOutcome::Updated)
}
