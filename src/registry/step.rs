use crate::registry::Scope;
use crate::{CrawlError, Result};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A step parameter that can be produced from a [`Scope`]
pub trait FromScope: Sized {
    fn from_scope(scope: &Scope) -> Result<Self>;
}

/// Required dependency: fails with [`CrawlError::UnresolvedDependency`] when
/// nothing in the chain binds `T`
impl<T> FromScope for Arc<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn from_scope(scope: &Scope) -> Result<Self> {
        scope.resolve::<T>()
    }
}

/// Optional dependency: `None` when nothing in the chain binds `T`
impl<T> FromScope for Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn from_scope(scope: &Scope) -> Result<Self> {
        Ok(scope.try_resolve::<T>())
    }
}

/// The scope the step is being invoked in
impl FromScope for Scope {
    fn from_scope(scope: &Scope) -> Result<Self> {
        Ok(scope.clone())
    }
}

/// Values a step body may return
pub trait StepOutput {
    fn into_step_result(self) -> anyhow::Result<()>;
}

impl StepOutput for () {
    fn into_step_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> StepOutput for std::result::Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_step_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

/// A function usable as a crawl step
///
/// Implemented for every `Fn(P1, .., Pn) -> impl Future` with up to eight
/// parameters, where each parameter implements [`FromScope`]. The `Args`
/// type parameter only exists to keep those implementations apart.
pub trait Step<Args>: Clone + Send + Sync + 'static {
    /// Resolves every parameter from `scope`, in declared order, and starts
    /// the step
    fn prepare(&self, scope: &Scope) -> Result<BoxFuture<'static, anyhow::Result<()>>>;
}

macro_rules! impl_step {
    ($($ty:ident),*) => {
        impl<F, Fut, $($ty,)*> Step<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: StepOutput,
            $($ty: FromScope,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn prepare(&self, scope: &Scope) -> Result<BoxFuture<'static, anyhow::Result<()>>> {
                $(let $ty = <$ty as FromScope>::from_scope(scope)?;)*
                let fut = (self)($($ty),*);
                Ok(Box::pin(async move { fut.await.into_step_result() }))
            }
        }
    };
}

impl_step!();
impl_step!(T1);
impl_step!(T1, T2);
impl_step!(T1, T2, T3);
impl_step!(T1, T2, T3, T4);
impl_step!(T1, T2, T3, T4, T5);
impl_step!(T1, T2, T3, T4, T5, T6);
impl_step!(T1, T2, T3, T4, T5, T6, T7);
impl_step!(T1, T2, T3, T4, T5, T6, T7, T8);

type Prepare = dyn Fn(&Scope) -> Result<BoxFuture<'static, anyhow::Result<()>>> + Send + Sync;

/// A type-erased, cheaply cloneable step with a label for logs and errors
#[derive(Clone)]
pub struct BoxedStep {
    label: Arc<str>,
    prepare: Arc<Prepare>,
}

impl BoxedStep {
    /// Boxes `step`, labelling it with its Rust type name
    pub fn new<S, A>(step: S) -> Self
    where
        S: Step<A>,
    {
        Self::named(std::any::type_name::<S>(), step)
    }

    /// Boxes `step` under an explicit label
    pub fn named<S, A>(label: impl Into<Arc<str>>, step: S) -> Self
    where
        S: Step<A>,
    {
        Self {
            label: label.into(),
            prepare: Arc::new(move |scope: &Scope| step.prepare(scope)),
        }
    }

    /// Returns the label used when reporting this step
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolves the step's parameters from `scope` and runs it to completion
    pub async fn call(&self, scope: &Scope) -> Result<()> {
        let fut = (self.prepare)(scope)?;
        fut.await.map_err(|source| CrawlError::Invocation {
            step: self.label.to_string(),
            source,
        })
    }
}

impl fmt::Debug for BoxedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedStep")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
