//! Controllers grouped by operator role
//!
//! `main` builds one registry, registers each controller under the role it
//! belongs to and starts the controllers of the roles selected on the
//! command line.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::info;

use super::reconciler::ControllerState;
use crate::error::{Error, Result};

/// Selects every registered role
pub const ROLE_ALL: &str = "all";
/// Controllers of namespaced cluster resources
pub const ROLE_NAMESPACE: &str = "namespace";

/// A running controller, resolved when it shuts down
pub type ControllerFuture = BoxFuture<'static, Result<()>>;
/// Prepares a controller for the given state
pub type AddFn<S> = fn(Arc<S>) -> Result<ControllerFuture>;

pub struct ControllerRegistry<S = ControllerState> {
    roles: BTreeMap<String, Vec<AddFn<S>>>,
}

impl<S> Default for ControllerRegistry<S> {
    fn default() -> Self {
        Self {
            roles: BTreeMap::new(),
        }
    }
}

impl<S> ControllerRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `add` to the controllers of `role`
    pub fn register(&mut self, role: &str, add: AddFn<S>) {
        self.roles.entry(role.to_string()).or_default().push(add);
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Controllers of every selected role, in registration order within a role.
    ///
    /// Fails on a role nothing was registered under, or when any add
    /// function fails.
    pub fn add_to_manager(
        &self,
        roles: &[String],
        state: Arc<S>,
    ) -> Result<Vec<ControllerFuture>> {
        if let Some(unknown) = roles
            .iter()
            .find(|r| r.as_str() != ROLE_ALL && !self.roles.contains_key(r.as_str()))
        {
            return Err(Error::ConfigError(format!(
                "unknown operator role: {unknown}"
            )));
        }

        let all = roles.iter().any(|r| r == ROLE_ALL);
        let mut controllers = Vec::new();
        for (role, adds) in &self.roles {
            if !all && !roles.iter().any(|r| r == role) {
                continue;
            }
            info!(%role, controllers = adds.len(), "Adding controllers");
            for add in adds {
                controllers.push(add(state.clone())?);
            }
        }
        Ok(controllers)
    }
}

/// Registry of every controller this operator runs
pub fn default_registry() -> ControllerRegistry<ControllerState> {
    let mut registry = ControllerRegistry::new();
    registry.register(ROLE_NAMESPACE, |state| {
        Ok(super::reconciler::run_controller(state).boxed())
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records which controllers were added
    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    fn add(state: &Recorder, name: &'static str) -> Result<ControllerFuture> {
        state.0.lock().unwrap().push(name);
        Ok(async { Ok::<(), Error>(()) }.boxed())
    }

    fn registry() -> ControllerRegistry<Recorder> {
        let mut registry = ControllerRegistry::new();
        registry.register(ROLE_NAMESPACE, |s| add(&s, "clusters"));
        registry.register(ROLE_NAMESPACE, |s| add(&s, "services"));
        registry.register("global", |s| add(&s, "webhook"));
        registry
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_selected_role_in_registration_order() {
        let state = Arc::new(Recorder::default());
        let controllers = registry()
            .add_to_manager(&roles(&[ROLE_NAMESPACE]), state.clone())
            .unwrap();

        assert_eq!(controllers.len(), 2);
        assert_eq!(*state.0.lock().unwrap(), vec!["clusters", "services"]);
    }

    #[test]
    fn test_all_selects_every_role() {
        let state = Arc::new(Recorder::default());
        let controllers = registry()
            .add_to_manager(&roles(&[ROLE_ALL]), state.clone())
            .unwrap();

        assert_eq!(controllers.len(), 3);
        assert_eq!(state.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let state = Arc::new(Recorder::default());
        let result = registry().add_to_manager(&roles(&["nope"]), state.clone());

        assert!(matches!(result, Err(Error::ConfigError(_))));
        assert!(state.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failing_add_aborts() {
        let mut registry = registry();
        registry.register("broken", |_| Err(Error::ConfigError("boom".to_string())));

        let result = registry.add_to_manager(&roles(&["broken"]), Arc::new(Recorder::default()));
        assert!(result.is_err());
    }

    #[test]
    fn test_default_registry_roles() {
        let registry = default_registry();
        assert_eq!(registry.roles().collect::<Vec<_>>(), vec![ROLE_NAMESPACE]);
    }

    #[tokio::test]
    async fn test_controller_futures_run() {
        let controllers = registry()
            .add_to_manager(&roles(&["global"]), Arc::new(Recorder::default()))
            .unwrap();
        for controller in controllers {
            controller.await.unwrap();
        }
    }
}
