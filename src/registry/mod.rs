//! Hierarchical dependency registry
//!
//! A [`Scope`] maps type identities to shared values and falls back to its
//! parent on a miss, so per-invocation values shadow process-wide
//! collaborators without touching them. Step functions declare what they
//! need as parameters implementing [`FromScope`]; [`Scope::invoke`] resolves
//! each parameter in declared order and calls the function.
//!
//! ```
//! use std::sync::Arc;
//! use stepcrawl::registry::{Args, Scope};
//!
//! # tokio_test_block(async {
//! let root = Scope::root();
//! root.bind(String::from("shared")).unwrap();
//!
//! let step = |greeting: Arc<String>, n: Arc<u32>| async move {
//!     assert_eq!(greeting.as_str(), "shared");
//!     assert_eq!(*n, 7);
//! };
//! root.invoke(step, Args::new().with(7u32)).await.unwrap();
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod scope;
mod step;

pub use scope::{Args, BindPolicy, Scope};
pub use step::{BoxedStep, FromScope, Step, StepOutput};

pub(crate) use scope::Binding;
