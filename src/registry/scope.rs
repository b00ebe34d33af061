use crate::registry::BoxedStep;
use crate::registry::Step;
use crate::{CrawlError, Result};
use serde::Deserialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// What [`Scope::bind`] does when the scope already holds a value of the
/// same type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindPolicy {
    /// Replace the existing value (last call wins)
    #[default]
    Overwrite,

    /// Keep the existing value and return [`CrawlError::DuplicateBinding`]
    Reject,
}

/// A type-erased value stored under its type identity
///
/// The payload is always an `Arc<T>` boxed as `Any`, which lets unsized
/// types such as `dyn Browser` be bound and resolved like any other.
pub(crate) struct Binding {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl Binding {
    pub(crate) fn of<T>(value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Box::new(value),
        }
    }

    fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.value.downcast_ref::<Arc<T>>().cloned()
    }
}

struct ScopeInner {
    bindings: RwLock<HashMap<TypeId, Binding>>,
    parent: Option<Scope>,
    policy: BindPolicy,
}

/// A node in the dependency-resolution tree
///
/// Cloning a `Scope` is cheap and yields another handle to the same node.
/// Lookups check this node's bindings first and then walk up through the
/// parents; the nearest binding wins. Binding never writes to a parent.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates a root scope with the default [`BindPolicy::Overwrite`] policy
    pub fn root() -> Self {
        Self::with_policy(BindPolicy::default())
    }

    /// Creates a root scope with the given duplicate-binding policy
    pub fn with_policy(policy: BindPolicy) -> Self {
        Self::new(None, policy)
    }

    fn new(parent: Option<Scope>, policy: BindPolicy) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                bindings: RwLock::new(HashMap::new()),
                parent,
                policy,
            }),
        }
    }

    /// Creates a child scope whose parent is `self`
    ///
    /// The child inherits the duplicate-binding policy. Nothing about `self`
    /// changes.
    pub fn child(&self) -> Self {
        Self::new(Some(self.clone()), self.inner.policy)
    }

    /// Returns the parent scope, if any
    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Returns the duplicate-binding policy of this scope
    pub fn policy(&self) -> BindPolicy {
        self.inner.policy
    }

    /// Binds `value` in this scope under its concrete type
    pub fn bind<T>(&self, value: T) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.bind_arc(Arc::new(value))
    }

    /// Binds an already shared value under the type `T`
    ///
    /// Use this to bind trait objects, e.g. `scope.bind_arc::<dyn Browser>(b)`.
    pub fn bind_arc<T>(&self, value: Arc<T>) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(Binding::of(value))
    }

    fn insert(&self, binding: Binding) -> Result<()> {
        let mut bindings = self
            .inner
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if self.inner.policy == BindPolicy::Reject && bindings.contains_key(&binding.type_id) {
            return Err(CrawlError::DuplicateBinding {
                type_name: binding.type_name,
            });
        }

        tracing::trace!("Binding {}", binding.type_name);
        bindings.insert(binding.type_id, binding);
        Ok(())
    }

    /// Stores a binding regardless of policy
    pub(crate) fn put(&self, binding: Binding) {
        self.inner
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(binding.type_id, binding);
    }

    /// Resolves the nearest binding for `T`, if one exists
    pub fn try_resolve<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();
        let mut scope = Some(self);

        while let Some(current) = scope {
            let found = current
                .inner
                .bindings
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .and_then(Binding::get::<T>);

            if found.is_some() {
                return found;
            }
            scope = current.parent();
        }

        None
    }

    /// Resolves the nearest binding for `T`
    ///
    /// # Errors
    ///
    /// [`CrawlError::UnresolvedDependency`] if no scope in the chain binds `T`.
    pub fn resolve<T>(&self) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.try_resolve::<T>()
            .ok_or(CrawlError::UnresolvedDependency {
                type_name: type_name::<T>(),
            })
    }

    /// Returns whether any scope in the chain binds `T`
    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.try_resolve::<T>().is_some()
    }

    /// Returns whether this scope itself (ignoring parents) binds `T`
    pub fn binds_locally<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    /// Invokes `step`, resolving its parameters from `extras` first and then
    /// from this scope chain
    ///
    /// Extra arguments are bound into a throwaway child scope, so they shadow
    /// but never replace bindings visible from `self`.
    ///
    /// # Errors
    ///
    /// * [`CrawlError::UnresolvedDependency`] - a parameter has no binding;
    ///   the step body does not run
    /// * [`CrawlError::DuplicateBinding`] - `extras` repeats a type under
    ///   [`BindPolicy::Reject`]
    /// * [`CrawlError::Invocation`] - the step itself reported failure
    pub async fn invoke<S, A>(&self, step: S, extras: Args) -> Result<()>
    where
        S: Step<A>,
    {
        self.invoke_boxed(&BoxedStep::new(step), extras).await
    }

    /// Same as [`Scope::invoke`] for an already boxed step
    pub async fn invoke_boxed(&self, step: &BoxedStep, extras: Args) -> Result<()> {
        if extras.is_empty() {
            return step.call(self).await;
        }

        let scope = self.child();
        extras.bind_into(&scope)?;
        step.call(&scope).await
    }

    fn bound_type_names(&self) -> Vec<&'static str> {
        self.inner
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|binding| binding.type_name)
            .collect()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("bindings", &self.bound_type_names())
            .field("policy", &self.inner.policy)
            .field("parent", &self.inner.parent)
            .finish()
    }
}

/// Extra per-call arguments, bound into a fresh scope in insertion order
#[derive(Default)]
pub struct Args {
    entries: Vec<Binding>,
}

impl Args {
    /// Creates an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, keyed by its concrete type
    pub fn with<T>(self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.with_arc(Arc::new(value))
    }

    /// Adds an already shared value, keyed by `T`
    pub fn with_arc<T>(mut self, value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries.push(Binding::of(value));
        self
    }

    /// Returns the number of arguments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no arguments were supplied
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binds every argument into `scope`, honoring its policy
    pub fn bind_into(self, scope: &Scope) -> Result<()> {
        for binding in self.entries {
            scope.insert(binding)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|binding| binding.type_name))
            .finish()
    }
}
