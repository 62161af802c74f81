use super::{InjectedArgs, InjectionMetadata, short_type_name};
use crate::error::Result;
use crate::resolution::ValueOrPromise;

/// A type the container can construct, with its dependencies injected.
///
/// Usually implemented with `#[derive(Injectable)]`; a manual implementation
/// declares its injection points in [`Injectable::metadata`] and picks the
/// resolved values out of the arguments in [`Injectable::construct`].
///
/// # Example
/// ```
/// use bindery::{Context, InjectedArgs, Injection, InjectionMetadata, Injectable, Result};
/// use std::sync::Arc;
///
/// struct Greeter {
///     user: Arc<String>,
/// }
///
/// impl Injectable for Greeter {
///     fn metadata() -> Result<InjectionMetadata> {
///         InjectionMetadata::builder("Greeter")
///             .param(0, Injection::key("user"))
///             .build()
///     }
///
///     fn construct(args: InjectedArgs) -> Result<Self> {
///         Ok(Self { user: args.param(0)? })
///     }
/// }
///
/// let ctx = Context::new();
/// ctx.bind("user").unwrap().to(String::from("John")).unwrap();
/// ctx.bind("greeter").unwrap().to_class::<Greeter>().unwrap();
/// assert_eq!(*ctx.get_sync::<Greeter>("greeter").unwrap().user, "John");
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Injection points of the type. None by default.
    fn metadata() -> Result<InjectionMetadata> {
        Ok(InjectionMetadata::empty(short_type_name::<Self>()))
    }

    /// Build an instance from the resolved injections.
    ///
    /// # Errors
    /// Returns an error if an argument has an unexpected form or type.
    fn construct(args: InjectedArgs) -> Result<Self>;
}

/// A class whose instances produce the bound value.
///
/// The provider itself is constructed with injection; `value` may complete
/// asynchronously, which makes the whole resolution asynchronous.
pub trait Provider: Injectable {
    type Value: Send + Sync + 'static;

    fn value(&self) -> Result<ValueOrPromise<Self::Value>>;
}

/// A type with a static value method whose parameters are injected.
pub trait ValueFactory: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    /// Injection points of the `value` parameters.
    fn metadata() -> Result<InjectionMetadata> {
        Ok(InjectionMetadata::empty(short_type_name::<Self>()))
    }

    fn value(args: InjectedArgs) -> Result<ValueOrPromise<Self::Value>>;
}
