//! # Bindery
//!
//! A hierarchical binding context for Rust: an inversion-of-control
//! container resolving values by key, synchronously or asynchronously.
//!
//! ## Features
//!
//! - **Hierarchical contexts**: child contexts (e.g. one per request) fall back
//!   to their parents and never write to them
//! - **Binding strategies**: constants, sync/async factories, injectable
//!   classes, providers, value factories and aliases
//! - **Scopes**: transient, singleton (cached where bound) and context
//!   (cached per requesting context)
//! - **Sync/async duality**: `get_sync` fails fast instead of blocking when a
//!   dependency can only resolve asynchronously
//! - **Cycle detection** with the full dependency chain in the error
//! - **Extension points**: tags, filters and live views
//! - **Injection**: `#[derive(Injectable)]` or explicit metadata tables
//!
//! ## Quick Start
//!
//! ```rust
//! use bindery::prelude::*;
//!
//! #[derive(Injectable)]
//! struct GreetingService {
//!     #[inject("user")]
//!     user: Arc<String>,
//! }
//!
//! impl GreetingService {
//!     fn greet(&self) -> String {
//!         format!("Hello, {}", self.user)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> bindery::Result<()> {
//!     let app = Context::named("app");
//!     app.bind("services.greeting")?
//!         .in_scope(BindingScope::Singleton)
//!         .to_class::<GreetingService>()?;
//!
//!     // per-request state lives in a child context
//!     let request = app.create_child("request");
//!     request.bind("user")?.to(String::from("John"))?;
//!
//!     let service = request.get::<GreetingService>("services.greeting").await;
//!     // singletons resolve their dependencies where they are bound
//!     assert!(service.is_err());
//!
//!     app.bind("user")?.to(String::from("Jane"))?;
//!     let service = request.get::<GreetingService>("services.greeting").await?;
//!     assert_eq!(service.greet(), "Hello, Jane");
//!     Ok(())
//! }
//! ```

// lets the derive macro refer to `::bindery` from inside this crate
extern crate self as bindery;

pub mod binding;
pub mod config;
pub mod context;
pub mod error;
pub mod inject;
pub mod key;
pub mod lifecycle;
pub mod resolution;

// Re-export core types
pub use binding::{Binding, BindingFilter, BindingScope, BindingType, BoundValue, filter_by_key, filter_by_tag};
pub use config::EnvConfigLoader;
pub use context::{
    Context, ContextBuilder, ContextEvent, ContextEventKind, ContextObserver, ContextView,
    Subscription, ViewGetter,
};
pub use error::{ContextError, Result};
pub use inject::{
    FromInjected, Getter, Injectable, Injected, InjectedArgs, Injection, InjectionMetadata,
    Member, MethodMetadata, Provider, ValueFactory,
};
pub use key::{AsBindingKey, BindingKey, IntoBindingKey};
pub use lifecycle::Dispose;
pub use resolution::{ResolutionContext, ResolutionOptions, ResolutionSession, ValueOrPromise};

// Re-export macros
pub use bindery_macro::Injectable as DeriveInjectable;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;

/// Prelude module for convenient imports
///
/// ```
/// use bindery::prelude::*;
/// ```
pub mod prelude {
    pub use crate::binding::{Binding, BindingFilter, BindingScope, filter_by_key, filter_by_tag};
    pub use crate::context::{Context, ContextView};
    pub use crate::error::{ContextError, Result};
    pub use crate::inject::{
        Getter, Injectable, InjectedArgs, Injection, InjectionMetadata, Provider, ValueFactory,
    };
    pub use crate::key::BindingKey;
    pub use crate::lifecycle::Dispose;
    pub use crate::resolution::{ResolutionContext, ValueOrPromise};
    pub use crate::DeriveInjectable as Injectable;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
