//! Step orchestration
//!
//! The [`Orchestrator`] ties together the step table, the rate-limit cursor,
//! the registry and the scheduler. Steps are plain async functions whose
//! parameters are resolved from the registry when they run.
//!
//! # Execution lock
//!
//! One async mutex serializes everything that touches shared crawl state:
//! only one step invocation, one root-binding mutation or one cursor update
//! may proceed at a time. The scheduler's timing machinery runs outside the
//! lock, so up to `workers` tasks can be waiting for their eligible time
//! while a single step body executes.

use crate::config::Config;
use crate::crawler::fetcher::HttpClient;
use crate::crawler::logger::{Logger, TracingLogger};
use crate::crawler::scheduler::Scheduler;
use crate::registry::{Args, Binding, BoxedStep, FromScope, Scope, Step};
use crate::{CrawlError, Result};
use reqwest::cookie::Jar;
use reqwest::{Method, RequestBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::Level;

/// A step to run: either a registered name or a step value
#[derive(Debug, Clone)]
pub enum StepRef {
    Named(String),
    Direct(BoxedStep),
}

impl From<&str> for StepRef {
    fn from(name: &str) -> Self {
        StepRef::Named(name.to_string())
    }
}

impl From<String> for StepRef {
    fn from(name: String) -> Self {
        StepRef::Named(name)
    }
}

impl From<BoxedStep> for StepRef {
    fn from(step: BoxedStep) -> Self {
        StepRef::Direct(step)
    }
}

/// Where the cursor lands when `previous + interval` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// The "next eligible time" cursor
///
/// Guarded by the execution lock.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    next_eligible: Option<Instant>,
    interval: Duration,
}

impl Cursor {
    /// Creates a cursor spacing submissions `interval` apart
    pub fn new(interval: Duration) -> Self {
        Self {
            next_eligible: None,
            interval,
        }
    }

    /// Assigns the eligible time for the next submission
    ///
    /// `next = max(previous + interval, now)`: successive submissions are at
    /// least `interval` apart, and an idle cursor never lags behind `now`.
    /// An interval too large to add saturates to roughly thirty years out.
    pub fn advance(&mut self, now: Instant) -> Instant {
        let eligible = match self.next_eligible {
            Some(previous) => previous
                .checked_add(self.interval)
                .or_else(|| previous.checked_add(FAR_FUTURE))
                .unwrap_or(previous)
                .max(now),
            None => now,
        };
        self.next_eligible = Some(eligible);
        eligible
    }

    /// Returns the minimum spacing between submissions
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Changes the spacing applied from the next submission on
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
}

struct Inner {
    steps: RwLock<HashMap<String, BoxedStep>>,
    root: Scope,
    scheduler: Scheduler,

    /// The execution lock
    cursor: tokio::sync::Mutex<Cursor>,
}

impl Inner {
    fn lookup(&self, step: StepRef) -> Result<BoxedStep> {
        match step {
            StepRef::Direct(step) => Ok(step),
            StepRef::Named(name) => self
                .steps
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&name)
                .cloned()
                .ok_or(CrawlError::UnknownStep { name }),
        }
    }

    /// Builds the per-invocation scope holding `args`
    fn derive(&self, args: Args) -> Result<Scope> {
        let scope = self.root.child();
        args.bind_into(&scope)?;
        Ok(scope)
    }

    /// Advances the cursor and submits `step`; the caller holds the lock
    fn schedule(self: &Arc<Self>, cursor: &mut Cursor, step: BoxedStep, scope: Scope) -> Instant {
        let now = Instant::now();
        let eligible = cursor.advance(now);

        tracing::debug!(
            "Scheduling step `{}` in {:?}",
            step.label(),
            eligible.saturating_duration_since(now)
        );

        let inner = Arc::downgrade(self);
        self.scheduler.submit(eligible, async move {
            if let Some(inner) = inner.upgrade() {
                inner.run(step, scope).await;
            }
        });

        eligible
    }

    /// Body of every scheduled unit of work
    async fn run(self: Arc<Self>, step: BoxedStep, scope: Scope) {
        let mut cursor = self.cursor.lock().await;

        let chain = Chain::new(Arc::downgrade(&self));
        scope.put(Binding::of(Arc::new(chain.clone())));

        match step.call(&scope).await {
            Ok(()) => report(
                &scope,
                Level::DEBUG,
                &format!("step `{}` completed", step.label()),
            ),
            Err(e) => report(&scope, Level::ERROR, &e.to_string()),
        }

        for (next, next_scope) in chain.close() {
            self.schedule(&mut cursor, next, next_scope);
        }
    }
}

/// Logs through the bound [`Logger`], falling back to `tracing`
fn report(scope: &Scope, level: Level, message: &str) {
    match scope.try_resolve::<dyn Logger>() {
        Some(logger) => logger.log(level, message),
        None => TracingLogger::default().log(level, message),
    }
}

/// Handle a running step uses to queue follow-up steps
///
/// Take a `Chain` parameter to get one. Name lookup and argument binding
/// happen immediately so mistakes surface inside the step; the follow-ups
/// are scheduled, in the order queued, once the step returns.
#[derive(Clone)]
pub struct Chain {
    inner: Weak<Inner>,
    queued: Arc<Mutex<Option<Vec<(BoxedStep, Scope)>>>>,
}

impl Chain {
    fn new(inner: Weak<Inner>) -> Self {
        Self {
            inner,
            queued: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    /// Queues `step` to run after the current step, with `args` bound
    ///
    /// # Errors
    ///
    /// * [`CrawlError::UnknownStep`] - no step is registered under the name
    /// * [`CrawlError::DuplicateBinding`] - `args` repeats a type under the
    ///   reject policy
    /// * [`CrawlError::ChainClosed`] - the owning invocation already finished
    pub fn next(&self, step: impl Into<StepRef>, args: Args) -> Result<()> {
        let inner = self.inner.upgrade().ok_or(CrawlError::ChainClosed)?;
        let step = inner.lookup(step.into())?;
        let scope = inner.derive(args)?;

        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .ok_or(CrawlError::ChainClosed)?
            .push((step, scope));
        Ok(())
    }

    /// Queues a step value rather than a registered name
    pub fn next_step<S, A>(&self, step: S, args: Args) -> Result<()>
    where
        S: Step<A>,
    {
        self.next(BoxedStep::new(step), args)
    }

    /// Returns the number of follow-ups queued so far
    pub fn len(&self) -> usize {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self) -> Vec<(BoxedStep, Scope)> {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default()
    }
}

impl FromScope for Chain {
    fn from_scope(scope: &Scope) -> Result<Self> {
        scope.resolve::<Chain>().map(|chain| (*chain).clone())
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("queued", &self.len()).finish()
    }
}

/// User-facing entry point: named steps, rate limiting and safe invocation
///
/// Cloning is cheap and yields another handle to the same orchestrator.
/// Separate orchestrators share nothing.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use stepcrawl::crawler::{HttpClient, Orchestrator};
/// use stepcrawl::{Args, Config};
///
/// # async fn run() -> stepcrawl::Result<()> {
/// let crawler = Orchestrator::from_config(&Config::default())?;
/// crawler.set_interval(Duration::from_millis(500)).await;
///
/// crawler.register_step("fetch", |client: Arc<HttpClient>, url: Arc<String>| async move {
///     let page = client.fetch(&url).await?;
///     println!("{} -> {}", url, page.status);
///     Ok::<(), stepcrawl::CrawlError>(())
/// });
///
/// crawler.next("fetch", Args::new().with("https://example.com/".to_string())).await?;
/// crawler.wait().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator with `workers` scheduler workers
    ///
    /// The root scope starts with a [`TracingLogger`] bound as
    /// `dyn Logger`. No HTTP client is bound; use
    /// [`Orchestrator::from_config`] or bind one yourself.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(workers: usize) -> Self {
        Self::with_root(workers, Scope::root(), Duration::ZERO)
    }

    /// Creates an orchestrator from configuration, with an [`HttpClient`]
    /// bound in the root scope
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = HttpClient::new(&config.http)?;
        let orchestrator = Self::with_root(
            config.scheduler.workers,
            Scope::with_policy(config.registry.duplicate_bindings),
            config.scheduler.interval(),
        );
        orchestrator.inner.root.put(Binding::of(Arc::new(http)));
        Ok(orchestrator)
    }

    fn with_root(workers: usize, root: Scope, interval: Duration) -> Self {
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger::default());
        root.put(Binding::of(logger));

        Self {
            inner: Arc::new(Inner {
                steps: RwLock::new(HashMap::new()),
                root,
                scheduler: Scheduler::new(workers),
                cursor: tokio::sync::Mutex::new(Cursor::new(interval)),
            }),
        }
    }

    /// Sets the minimum spacing between step executions
    pub async fn set_interval(&self, interval: Duration) {
        self.inner.cursor.lock().await.set_interval(interval);
    }

    /// Returns the minimum spacing between step executions
    pub async fn interval(&self) -> Duration {
        self.inner.cursor.lock().await.interval()
    }

    /// Binds `value` in the root scope, under the execution lock
    pub async fn bind<T>(&self, value: T) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.bind_arc(Arc::new(value)).await
    }

    /// Binds a shared value (possibly a trait object) in the root scope,
    /// under the execution lock
    pub async fn bind_arc<T>(&self, value: Arc<T>) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let _lock = self.inner.cursor.lock().await;
        self.inner.root.bind_arc(value)
    }

    /// Resolves a root binding
    pub fn resolve<T>(&self) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.root.resolve::<T>()
    }

    /// Registers `step` under `name`, replacing any previous registration
    pub fn register_step<S, A>(&self, name: impl Into<String>, step: S)
    where
        S: Step<A>,
    {
        let name = name.into();
        let boxed = BoxedStep::named(name.as_str(), step);
        let replaced = self
            .inner
            .steps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), boxed);

        if replaced.is_some() {
            tracing::debug!("Replaced step `{}`", name);
        }
    }

    /// Returns whether a step is registered under `name`
    pub fn has_step(&self, name: &str) -> bool {
        self.inner
            .steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Schedules a step to run once the cursor allows
    ///
    /// `args` are bound into a fresh child of the root scope, shadowing root
    /// bindings for this invocation only. Returns the eligible time assigned.
    ///
    /// # Errors
    ///
    /// * [`CrawlError::UnknownStep`] - nothing is submitted
    /// * [`CrawlError::DuplicateBinding`] - `args` repeats a type under the
    ///   reject policy; nothing is submitted
    ///
    /// Errors raised while the step runs are logged, never returned here.
    ///
    /// A running step already holds the execution lock, so it must not await
    /// this (or [`Orchestrator::bind`]); it takes a [`Chain`] parameter
    /// instead.
    pub async fn next(&self, step: impl Into<StepRef>, args: Args) -> Result<Instant> {
        let step = self.inner.lookup(step.into())?;
        let scope = self.inner.derive(args)?;

        let mut cursor = self.inner.cursor.lock().await;
        Ok(self.inner.schedule(&mut cursor, step, scope))
    }

    /// Schedules a step value rather than a registered name
    pub async fn next_step<S, A>(&self, step: S, args: Args) -> Result<Instant>
    where
        S: Step<A>,
    {
        self.next(BoxedStep::new(step), args).await
    }

    /// Waits until every scheduled step, including follow-ups, has finished
    pub async fn wait(&self) {
        self.inner.scheduler.join().await
    }

    /// Returns the number of steps queued and not yet started
    pub fn pending_steps(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// Returns the cookie jar of the bound [`HttpClient`]
    pub fn cookie_jar(&self) -> Result<Arc<Jar>> {
        Ok(self.resolve::<HttpClient>()?.cookie_jar())
    }

    /// Starts a request on the bound [`HttpClient`]
    pub fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        Ok(self.resolve::<HttpClient>()?.request(method, url))
    }

    /// Starts a GET request on the bound [`HttpClient`]
    pub fn get(&self, url: &str) -> Result<RequestBuilder> {
        self.request(Method::GET, url)
    }

    /// Writes an entry to the bound [`Logger`]
    pub fn log(&self, message: impl AsRef<str>) {
        report(&self.inner.root, Level::INFO, message.as_ref());
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<String> = self
            .inner
            .steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        f.debug_struct("Orchestrator")
            .field("steps", &steps)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}
