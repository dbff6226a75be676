//! Action registry
//!
//! Holds the actions currently offered to Neuro together with the handlers
//! that execute them. Writers publish a fresh catalog snapshot, so readers
//! always see either the state before or after a whole register/unregister
//! call and never wait on a handler.

use crate::action::{Action, ActionResult, NeuroAction, check_action};
use crate::error::{NeuroError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

/// Tag shared by the actions of one temporary group
pub type GroupId = u64;

/// What a handler reports back for an action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    /// Short context for Neuro, or the error message on failure
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn success(message: Option<String>) -> Self {
        Self {
            success: true,
            message,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Executes one kind of action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action. An `Err` is reported to Neuro as a failed result.
    async fn handle(&self, action: &NeuroAction) -> Result<ActionOutcome>;
}

#[async_trait]
impl<F> ActionHandler for F
where
    F: Fn(&NeuroAction) -> Result<ActionOutcome> + Send + Sync,
{
    async fn handle(&self, action: &NeuroAction) -> Result<ActionOutcome> {
        self(action)
    }
}

/// An action paired with its handler and optional group tag
#[derive(Clone)]
pub struct ActionBinding {
    action: Action,
    handler: Option<Arc<dyn ActionHandler>>,
    group: Option<GroupId>,
}

impl ActionBinding {
    /// Binding without a handler; used where only the catalog matters
    pub fn new(action: Action) -> Self {
        Self {
            action,
            handler: None,
            group: None,
        }
    }

    pub fn with_handler(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Shorthand for a synchronous closure handler
    pub fn with_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&NeuroAction) -> Result<ActionOutcome> + Send + Sync + 'static,
    {
        self.with_handler(handler)
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }
}

impl From<Action> for ActionBinding {
    fn from(action: Action) -> Self {
        Self::new(action)
    }
}

impl fmt::Debug for ActionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBinding")
            .field("action", &self.action.name)
            .field("handler", &self.handler.is_some())
            .field("group", &self.group)
            .finish()
    }
}

/// Result of routing a [`NeuroAction`] through the registry
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub result: ActionResult,
    /// Names removed because a temporary group completed
    pub retired: Vec<String>,
}

#[derive(Default)]
struct Catalog {
    order: Vec<String>,
    bindings: HashMap<String, ActionBinding>,
}

impl Catalog {
    fn without(&self, remove: &HashSet<&str>) -> Catalog {
        let order: Vec<String> = self
            .order
            .iter()
            .filter(|name| !remove.contains(name.as_str()))
            .cloned()
            .collect();
        let bindings = order
            .iter()
            .filter_map(|name| self.bindings.get(name).map(|b| (name.clone(), b.clone())))
            .collect();
        Catalog { order, bindings }
    }
}

/// Catalog of registered actions
pub struct ActionRegistry {
    catalog: RwLock<Arc<Catalog>>,
    writer: Mutex<()>,
    next_group: AtomicU64,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Arc::new(Catalog::default())),
            writer: Mutex::new(()),
            next_group: AtomicU64::new(1),
        }
    }

    fn snapshot(&self) -> Arc<Catalog> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, catalog: Catalog) {
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
    }

    /// Register all bindings or none of them.
    ///
    /// Fails if any action is invalid or any name is already taken (either in
    /// the registry or twice within `bindings`). Returns the registered actions.
    pub fn register(&self, bindings: Vec<ActionBinding>) -> Result<Vec<Action>> {
        self.insert(bindings, None)
    }

    /// Register a mutually exclusive group.
    ///
    /// As soon as any member's handler reports success, every member of the
    /// group is unregistered.
    pub fn register_temporary_group(
        &self,
        bindings: Vec<ActionBinding>,
    ) -> Result<(GroupId, Vec<Action>)> {
        let group = self.next_group.fetch_add(1, Ordering::Relaxed);
        let actions = self.insert(bindings, Some(group))?;
        Ok((group, actions))
    }

    fn insert(&self, bindings: Vec<ActionBinding>, group: Option<GroupId>) -> Result<Vec<Action>> {
        for binding in &bindings {
            check_action(&binding.action)?;
        }

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        let mut seen = HashSet::new();
        for binding in &bindings {
            let name = binding.action.name.as_str();
            if current.bindings.contains_key(name) || !seen.insert(name) {
                return Err(NeuroError::DuplicateAction(name.to_string()));
            }
        }

        let mut order = current.order.clone();
        let mut map = current.bindings.clone();
        let mut actions = Vec::with_capacity(bindings.len());
        for mut binding in bindings {
            binding.group = group;
            actions.push(binding.action.clone());
            order.push(binding.action.name.clone());
            map.insert(binding.action.name.clone(), binding);
        }
        self.publish(Catalog {
            order,
            bindings: map,
        });

        debug!(count = actions.len(), ?group, "Registered actions");
        Ok(actions)
    }

    /// Remove the named actions. Unknown names are ignored.
    ///
    /// Returns the names that were actually removed.
    pub fn unregister(&self, names: &[String]) -> Vec<String> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        let remove: HashSet<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| current.bindings.contains_key(*name))
            .collect();
        if remove.is_empty() {
            return Vec::new();
        }

        let removed: Vec<String> = current
            .order
            .iter()
            .filter(|name| remove.contains(name.as_str()))
            .cloned()
            .collect();
        self.publish(current.without(&remove));

        debug!(?removed, "Unregistered actions");
        removed
    }

    /// Remove every member of a temporary group
    pub fn unregister_group(&self, group: GroupId) -> Vec<String> {
        let members: Vec<String> = {
            let current = self.snapshot();
            current
                .order
                .iter()
                .filter(|name| current.bindings[name.as_str()].group == Some(group))
                .cloned()
                .collect()
        };
        self.unregister(&members)
    }

    /// Remove everything. Returns the names that were registered.
    pub fn clear(&self) -> Vec<String> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.snapshot().order.clone();
        self.publish(Catalog::default());
        removed
    }

    /// Registered names in registration order
    pub fn get_registered(&self) -> Vec<String> {
        self.snapshot().order.clone()
    }

    /// Registered actions in registration order
    pub fn actions(&self) -> Vec<Action> {
        let current = self.snapshot();
        current
            .order
            .iter()
            .map(|name| current.bindings[name.as_str()].action.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Action> {
        self.snapshot().bindings.get(name).map(|b| b.action.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the handler bound to `action.name` and build its result.
    ///
    /// Always produces exactly one result for `action.id`. Handler errors and
    /// unknown names become failed results.
    pub async fn invoke(&self, action: &NeuroAction) -> Invocation {
        let binding = self.snapshot().bindings.get(&action.name).cloned();
        let Some(binding) = binding else {
            return Invocation {
                result: ActionResult::failure(
                    &action.id,
                    format!("Action '{}' is not registered", action.name),
                ),
                retired: Vec::new(),
            };
        };
        let Some(handler) = binding.handler.as_ref() else {
            return Invocation {
                result: ActionResult::failure(
                    &action.id,
                    format!("Action '{}' has no handler", action.name),
                ),
                retired: Vec::new(),
            };
        };

        match handler.handle(action).await {
            Ok(outcome) => {
                let retired = match (outcome.success, binding.group) {
                    (true, Some(group)) => self.unregister_group(group),
                    _ => Vec::new(),
                };
                Invocation {
                    result: ActionResult {
                        action_id: action.id.clone(),
                        success: outcome.success,
                        message: outcome.message,
                    },
                    retired,
                }
            }
            Err(err) => {
                warn!(action = %action.name, id = %action.id, "Action handler failed: {}", err);
                Invocation {
                    result: ActionResult::failure(&action.id, err.to_string()),
                    retired: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn binding(name: &str) -> ActionBinding {
        ActionBinding::new(Action::new(name, format!("Do {name}")))
    }

    fn request(id: &str, name: &str) -> NeuroAction {
        NeuroAction {
            id: id.into(),
            name: name.into(),
            data: None,
        }
    }

    #[test]
    fn test_register_then_unregister() {
        let registry = ActionRegistry::new();
        assert_ok!(registry.register(vec![ActionBinding::new(Action::new("jump", "Jump"))]));
        assert_eq!(registry.get_registered(), vec!["jump"]);

        registry.unregister(&["jump".to_string()]);
        assert!(registry.get_registered().is_empty());
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = ActionRegistry::new();
        registry.register(vec![binding("a"), binding("b")]).unwrap();

        let removed = registry.unregister(&["zzz".to_string()]);
        assert!(removed.is_empty());
        assert_eq!(registry.get_registered(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = ActionRegistry::new();
        registry
            .register(vec![ActionBinding::new(Action::new("jump", "First"))])
            .unwrap();

        let err = registry
            .register(vec![ActionBinding::new(Action::new("jump", "Second"))])
            .unwrap_err();
        assert!(matches!(err, NeuroError::DuplicateAction(name) if name == "jump"));
        assert_eq!(registry.get("jump").unwrap().description, "First");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_is_all_or_nothing() {
        let registry = ActionRegistry::new();
        registry.register(vec![binding("existing")]).unwrap();

        assert!(registry.register(vec![binding("new"), binding("existing")]).is_err());
        assert!(registry.register(vec![binding("x"), binding("x")]).is_err());
        assert!(registry.register(vec![binding("fine"), binding("Not Fine")]).is_err());

        let bad_schema = ActionBinding::new(
            Action::new("schema", "s").with_schema(json!({"type": "object", "$id": "x"})),
        );
        assert!(registry.register(vec![binding("ok"), bad_schema]).is_err());

        assert_eq!(registry.get_registered(), vec!["existing"]);
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = ActionRegistry::new();
        registry
            .register(vec![binding("c"), binding("a"), binding("b")])
            .unwrap();
        registry.unregister(&["a".to_string()]);
        registry.register(vec![binding("a")]).unwrap();
        assert_eq!(registry.get_registered(), vec!["c", "b", "a"]);
        let descriptions: Vec<String> = registry.actions().into_iter().map(|a| a.description).collect();
        assert_eq!(descriptions, vec!["Do c", "Do b", "Do a"]);
    }

    #[test]
    fn test_clear() {
        let registry = ActionRegistry::new();
        registry.register(vec![binding("a"), binding("b")]).unwrap();
        assert_eq!(registry.clear(), vec!["a", "b"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_runs_handler() {
        let registry = ActionRegistry::new();
        registry
            .register(vec![binding("jump").with_fn(|action| {
                Ok(ActionOutcome::success(Some(format!("jumped {}", action.id))))
            })])
            .unwrap();

        let invocation = registry.invoke(&request("7", "jump")).await;
        assert_eq!(
            invocation.result,
            ActionResult::success("7", Some("jumped 7".into()))
        );
        assert!(invocation.retired.is_empty());
        assert!(registry.contains("jump"));
    }

    #[tokio::test]
    async fn test_invoke_converts_handler_error() {
        let registry = ActionRegistry::new();
        registry
            .register(vec![binding("explode").with_fn(|_| {
                Err(NeuroError::Handler("boom".into()))
            })])
            .unwrap();

        let invocation = registry.invoke(&request("1", "explode")).await;
        assert!(!invocation.result.success);
        assert_eq!(invocation.result.action_id, "1");
        assert!(invocation.result.message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_and_unhandled() {
        let registry = ActionRegistry::new();
        registry.register(vec![binding("bare")]).unwrap();

        let unknown = registry.invoke(&request("1", "missing")).await;
        assert!(!unknown.result.success);
        let bare = registry.invoke(&request("2", "bare")).await;
        assert!(!bare.result.success);
        assert_eq!(bare.result.action_id, "2");
    }

    #[tokio::test]
    async fn test_temporary_group_retires_on_success() {
        let registry = ActionRegistry::new();
        registry.register(vec![binding("menu")]).unwrap();
        let (_, actions) = registry
            .register_temporary_group(vec![
                binding("yes").with_fn(|_| Ok(ActionOutcome::success(None))),
                binding("no").with_fn(|_| {
                    Ok(ActionOutcome::failure("not now"))
                }),
            ])
            .unwrap();
        assert_eq!(actions.len(), 2);

        // A failed choice keeps the group alive
        let invocation = registry.invoke(&request("1", "no")).await;
        assert!(invocation.retired.is_empty());
        assert_eq!(registry.get_registered(), vec!["menu", "yes", "no"]);

        let invocation = registry.invoke(&request("2", "yes")).await;
        assert!(invocation.result.success);
        assert_eq!(invocation.retired, vec!["yes", "no"]);
        assert_eq!(registry.get_registered(), vec!["menu"]);
    }

    #[test]
    fn test_groups_are_independent() {
        let registry = ActionRegistry::new();
        let (first, _) = registry.register_temporary_group(vec![binding("a")]).unwrap();
        let (second, _) = registry.register_temporary_group(vec![binding("b")]).unwrap();
        assert_ne!(first, second);

        assert_eq!(registry.unregister_group(first), vec!["a"]);
        assert_eq!(registry.get_registered(), vec!["b"]);
    }

    #[test]
    fn test_readers_never_see_partial_batches() {
        let registry = Arc::new(ActionRegistry::new());
        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for round in 0..200 {
                    let names: Vec<String> = (0..4).map(|i| format!("r{round}-{i}")).collect();
                    registry
                        .register(names.iter().map(|n| binding(n)).collect())
                        .unwrap();
                    registry.unregister(&names);
                }
            })
        };

        for _ in 0..2000 {
            let len = registry.get_registered().len();
            assert!(len == 0 || len == 4, "observed torn state: {len}");
        }
        writer.join().unwrap();
    }
}
