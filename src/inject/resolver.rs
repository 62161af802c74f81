use super::metadata::{InjectionKind, InjectionPoint};
use super::{Getter, Injectable, InjectionMetadata, Member, MethodMetadata, Provider, ValueFactory};
use crate::binding::{BoundValue, SourceFn};
use crate::context::{Context, ContextView};
use crate::error::{ContextError, Result};
use crate::key::{BindingKey, CONFIG_SUFFIX};
use crate::resolution::{ResolutionSession, ValueOrPromise};
use std::sync::Arc;

/// A resolved injection, before it is converted to the field type.
#[derive(Clone)]
pub enum Injected {
    /// A single value; `None` for an optional point with nothing bound.
    Value(Option<BoundValue>),
    /// The values of every matching binding.
    Values(Vec<BoundValue>),
    Getter {
        context: Context,
        key: BindingKey<()>,
    },
    View(ContextView),
    Context(Context),
    Session(ResolutionSession),
    /// A caller-supplied argument of an invoked method.
    Argument(BoundValue),
}

impl Injected {
    fn form(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Values(_) => "value list",
            Self::Getter { .. } => "getter",
            Self::View(_) => "view",
            Self::Context(_) => "context",
            Self::Session(_) => "session",
            Self::Argument(_) => "argument",
        }
    }
}

/// One resolved injection point.
#[derive(Clone)]
pub struct InjectedSlot {
    target: Arc<str>,
    member: Member,
    name: String,
    /// What the point asked for.
    source: String,
    value: Injected,
}

impl InjectedSlot {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Injected {
        &self.value
    }

    fn unexpected(&self, wanted: &str) -> ContextError {
        ContextError::InvalidInjection {
            target: self.target.to_string(),
            member: self.name.clone(),
            reason: format!("expected a {wanted}, the point resolves to a {}", self.value.form()),
        }
    }

    fn missing(&self) -> ContextError {
        ContextError::InjectionResolution {
            target: self.target.to_string(),
            member: self.name.clone(),
            key: self.source.clone(),
        }
    }

    fn downcast<T: Send + Sync + 'static>(&self, value: &BoundValue) -> Result<Arc<T>> {
        Arc::clone(value)
            .downcast::<T>()
            .map_err(|_| ContextError::type_mismatch::<T>(format!("{}.{}", self.target, self.name)))
    }
}

/// Conversion from a resolved injection into a field or argument type.
///
/// Implemented for `Arc<T>` (required value), `Option<Arc<T>>` (optional
/// value), `Vec<Arc<T>>` (tag or filter injection), [`Getter<T>`],
/// [`ContextView`], [`Context`] and [`ResolutionSession`].
pub trait FromInjected: Sized {
    fn from_injected(slot: &InjectedSlot) -> Result<Self>;
}

impl<T: Send + Sync + 'static> FromInjected for Arc<T> {
    fn from_injected(slot: &InjectedSlot) -> Result<Self> {
        match &slot.value {
            Injected::Value(Some(v)) | Injected::Argument(v) => slot.downcast(v),
            Injected::Value(None) => Err(slot.missing()),
            _ => Err(slot.unexpected("value")),
        }
    }
}

impl<T: Send + Sync + 'static> FromInjected for Option<Arc<T>> {
    fn from_injected(slot: &InjectedSlot) -> Result<Self> {
        match &slot.value {
            Injected::Value(v) => v.as_ref().map(|v| slot.downcast(v)).transpose(),
            Injected::Argument(v) => slot.downcast(v).map(Some),
            _ => Err(slot.unexpected("value")),
        }
    }
}

impl<T: Send + Sync + 'static> FromInjected for Vec<Arc<T>> {
    fn from_injected(slot: &InjectedSlot) -> Result<Self> {
        match &slot.value {
            Injected::Values(values) => values.iter().map(|v| slot.downcast(v)).collect(),
            _ => Err(slot.unexpected("value list")),
        }
    }
}

impl<T: Send + Sync + 'static> FromInjected for Getter<T> {
    fn from_injected(slot: &InjectedSlot) -> Result<Self> {
        match &slot.value {
            Injected::Getter { context, key } => Ok(Getter::new(context.clone(), key.retype())),
            _ => Err(slot.unexpected("getter")),
        }
    }
}

impl FromInjected for ContextView {
    fn from_injected(slot: &InjectedSlot) -> Result<Self> {
        match &slot.value {
            Injected::View(view) => Ok(view.clone()),
            _ => Err(slot.unexpected("view")),
        }
    }
}

impl FromInjected for Context {
    fn from_injected(slot: &InjectedSlot) -> Result<Self> {
        match &slot.value {
            Injected::Context(ctx) => Ok(ctx.clone()),
            _ => Err(slot.unexpected("context")),
        }
    }
}

impl FromInjected for ResolutionSession {
    fn from_injected(slot: &InjectedSlot) -> Result<Self> {
        match &slot.value {
            Injected::Session(session) => Ok(session.clone()),
            _ => Err(slot.unexpected("session")),
        }
    }
}

/// The resolved injections handed to a constructor, provider or method.
#[derive(Clone)]
pub struct InjectedArgs {
    target: Arc<str>,
    slots: Vec<InjectedSlot>,
}

impl InjectedArgs {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, member: impl Into<Member>) -> Option<&InjectedSlot> {
        let member = member.into();
        self.slots.iter().find(|s| s.member == member)
    }

    /// Convert the injection at `member` to the requested type.
    pub fn get<V: FromInjected>(&self, member: impl Into<Member>) -> Result<V> {
        let member = member.into();
        match self.slots.iter().find(|s| s.member == member) {
            Some(slot) => V::from_injected(slot),
            None => Err(ContextError::InvalidInjection {
                target: self.target.to_string(),
                member: member.to_string(),
                reason: "no injection is declared for this member".to_string(),
            }),
        }
    }

    /// The parameter at `index`, converted to the requested type.
    pub fn param<V: FromInjected>(&self, index: usize) -> Result<V> {
        self.get(Member::Parameter(index))
    }

    /// The property `name`, converted to the requested type.
    pub fn property<V: FromInjected>(&self, name: &str) -> Result<V> {
        self.get(Member::Property(name.to_string()))
    }

    pub fn required<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        self.param(index)
    }

    pub fn optional<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.param(index)
    }

    pub fn all<T: Send + Sync + 'static>(&self, index: usize) -> Result<Vec<Arc<T>>> {
        self.param(index)
    }
}

/// Resolve one injection point within `session`.
pub(crate) fn resolve_point(
    ctx: &Context,
    target: &Arc<str>,
    point: &InjectionPoint,
    session: &mut ResolutionSession,
) -> Result<ValueOrPromise<InjectedSlot>> {
    let value = session.enter_injection(target, &point.name, |session| {
        resolve_kind(ctx, target, point, session)
    })?;
    let slot_target = Arc::clone(target);
    let member = point.member.clone();
    let name = point.name.clone();
    let source = point.describe();
    Ok(value.map(move |value| InjectedSlot {
        target: slot_target,
        member,
        name,
        source,
        value,
    }))
}

fn resolve_kind(
    ctx: &Context,
    target: &str,
    point: &InjectionPoint,
    session: &mut ResolutionSession,
) -> Result<ValueOrPromise<Injected>> {
    let missing = |key: String| ContextError::InjectionResolution {
        target: target.to_string(),
        member: point.name.clone(),
        key,
    };
    match &point.kind {
        InjectionKind::Key(key) => match ctx.resolve_in_session(key, point.optional, session) {
            Ok(value) => Ok(value.map(Injected::Value)),
            Err(ContextError::BindingNotFound { key: missing_key, .. }) if missing_key == key.key() => {
                Err(missing(key.to_string()))
            }
            Err(e) => Err(e),
        },
        InjectionKind::Getter(key) => Ok(ValueOrPromise::Value(Injected::Getter {
            context: ctx.clone(),
            key: key.clone(),
        })),
        InjectionKind::View(filter) => Ok(ValueOrPromise::Value(Injected::View(
            ctx.create_view(filter.clone()),
        ))),
        InjectionKind::Filter(filter) => {
            let mut items = Vec::new();
            for binding in ctx.find(filter.clone()) {
                items.push(ctx.resolve_required(binding.key(), session)?);
            }
            Ok(ValueOrPromise::all(items).map(Injected::Values))
        }
        InjectionKind::FilterOne(filter) => match ctx.find_one(filter.clone()) {
            Some(binding) => Ok(ctx
                .resolve_required(binding.key(), session)?
                .map(|v| Injected::Value(Some(v)))),
            None if point.optional => Ok(ValueOrPromise::Value(Injected::Value(None))),
            None => Err(missing(filter.description().to_string())),
        },
        InjectionKind::Context => Ok(ValueOrPromise::Value(Injected::Context(ctx.clone()))),
        InjectionKind::Session => Ok(ValueOrPromise::Value(Injected::Session(session.clone()))),
        InjectionKind::Config(path) => {
            let Some(owner) = session.current_binding().map(str::to_string) else {
                tracing::trace!(target, member = %point.name, "config injection outside of a binding");
                return Ok(ValueOrPromise::Value(Injected::Value(None)));
            };
            let key = BindingKey::<()>::with_path(format!("{owner}{CONFIG_SUFFIX}"), Some(path))?;
            Ok(ctx.resolve_in_session(&key, true, session)?.map(Injected::Value))
        }
    }
}

/// Resolve points in declaration order.
fn resolve_points(
    ctx: &Context,
    target: &Arc<str>,
    points: &[InjectionPoint],
    session: &mut ResolutionSession,
) -> Result<ValueOrPromise<Vec<InjectedSlot>>> {
    let mut items = Vec::with_capacity(points.len());
    for point in points {
        items.push(resolve_point(ctx, target, point, session)?);
    }
    Ok(ValueOrPromise::all(items))
}

/// Resolve every injection point of `metadata`.
pub(crate) fn resolve_args(
    ctx: &Context,
    metadata: &InjectionMetadata,
    session: &mut ResolutionSession,
) -> Result<ValueOrPromise<InjectedArgs>> {
    let target: Arc<str> = Arc::from(metadata.target());
    tracing::trace!(target = %target, context = ctx.name(), "resolving injections");
    let params = resolve_points(ctx, &target, metadata.params(), session)?;
    let properties = resolve_points(ctx, &target, metadata.properties(), session)?;
    params.and_then(move |mut slots| {
        Ok(properties.map(move |props| {
            slots.extend(props);
            InjectedArgs { target, slots }
        }))
    })
}

/// Construct `C` with its injections resolved from `ctx`.
pub fn instantiate<C: Injectable>(
    ctx: &Context,
    metadata: &InjectionMetadata,
    session: &mut ResolutionSession,
) -> Result<ValueOrPromise<C>> {
    resolve_args(ctx, metadata, session)?.and_then(|args| C::construct(args).map(ValueOrPromise::Value))
}

pub(crate) fn class_source<C: Injectable>(metadata: InjectionMetadata) -> SourceFn {
    Arc::new(move |_binding, ctx, session| {
        Ok(instantiate::<C>(ctx, &metadata, session)?.map(|instance| Arc::new(instance) as BoundValue))
    })
}

pub(crate) fn provider_source<P: Provider>(metadata: InjectionMetadata) -> SourceFn {
    Arc::new(move |_binding, ctx, session| {
        instantiate::<P>(ctx, &metadata, session)?.and_then(|provider| {
            Ok(provider.value()?.map(|value| Arc::new(value) as BoundValue))
        })
    })
}

pub(crate) fn value_factory_source<F: ValueFactory>(metadata: InjectionMetadata) -> SourceFn {
    Arc::new(move |_binding, ctx, session| {
        resolve_args(ctx, &metadata, session)?
            .and_then(|args| Ok(F::value(args)?.map(|value| Arc::new(value) as BoundValue)))
    })
}

impl Context {
    /// Call a method with its injected parameters resolved from this context.
    ///
    /// Positions declared in `metadata` are resolved; every other position
    /// takes the next value from `args`, in order. Remaining `args` are
    /// appended after the last declared position.
    ///
    /// ```
    /// use bindery::{BoundValue, Context, Injection, MethodMetadata};
    /// use std::sync::Arc;
    ///
    /// let ctx = Context::new();
    /// ctx.bind("user").unwrap().to(String::from("John")).unwrap();
    ///
    /// let greet = MethodMetadata::builder("GreetingController", "greet")
    ///     .param(0, Injection::key("user"))
    ///     .build()
    ///     .unwrap();
    /// let greeting = ctx
    ///     .invoke_method(&greet, vec![Arc::new("Hello") as BoundValue], |args| {
    ///         let user = args.required::<String>(0)?;
    ///         let prefix = args.required::<&'static str>(1)?;
    ///         Ok(format!("{prefix}, {user}"))
    ///     })
    ///     .unwrap()
    ///     .into_sync("greet")
    ///     .unwrap();
    /// assert_eq!(greeting, "Hello, John");
    /// ```
    pub fn invoke_method<R, F>(
        &self,
        metadata: &MethodMetadata,
        args: Vec<BoundValue>,
        method: F,
    ) -> Result<ValueOrPromise<R>>
    where
        R: Send + 'static,
        F: FnOnce(InjectedArgs) -> anyhow::Result<R> + Send + 'static,
    {
        let target: Arc<str> = Arc::from(metadata.target());
        let mut session = ResolutionSession::new();
        let arity = metadata
            .params()
            .iter()
            .filter_map(|p| match p.member {
                Member::Parameter(i) => Some(i + 1),
                Member::Property(_) => None,
            })
            .max()
            .unwrap_or(0)
            .max(metadata.params().len() + args.len());

        let mut supplied = args.into_iter();
        let mut items = Vec::with_capacity(arity);
        for index in 0..arity {
            match metadata.injected_at(index) {
                Some(point) => items.push(resolve_point(self, &target, point, &mut session)?),
                None => {
                    let Some(value) = supplied.next() else {
                        return Err(ContextError::InvalidInjection {
                            target: target.to_string(),
                            member: format!("{}[{index}]", metadata.method()),
                            reason: "no injection declared and no argument supplied".to_string(),
                        });
                    };
                    items.push(ValueOrPromise::Value(InjectedSlot {
                        target: Arc::clone(&target),
                        member: Member::Parameter(index),
                        name: format!("{}[{index}]", metadata.method()),
                        source: "<argument>".to_string(),
                        value: Injected::Argument(value),
                    }));
                }
            }
        }

        let method_name = format!("{}.{}", metadata.target(), metadata.method());
        tracing::trace!(method = %method_name, arity, "invoking method");
        ValueOrPromise::all(items).and_then(move |slots| {
            let args = InjectedArgs { target, slots };
            method(args)
                .map(ValueOrPromise::Value)
                .map_err(|e| ContextError::from_factory(&method_name, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingScope;
    use crate::inject::Injection;

    #[derive(Debug)]
    struct Greeter {
        user: Arc<String>,
        nickname: Option<Arc<String>>,
    }

    impl Injectable for Greeter {
        fn metadata() -> Result<InjectionMetadata> {
            InjectionMetadata::builder("Greeter")
                .param(0, Injection::key("user"))
                .property("nickname", Injection::key("nickname").optional())
                .build()
        }

        fn construct(args: InjectedArgs) -> Result<Self> {
            Ok(Self {
                user: args.required(0)?,
                nickname: args.property("nickname")?,
            })
        }
    }

    struct GreetingProvider {
        user: Arc<String>,
    }

    impl Injectable for GreetingProvider {
        fn metadata() -> Result<InjectionMetadata> {
            InjectionMetadata::builder("GreetingProvider")
                .param(0, Injection::key("user"))
                .build()
        }

        fn construct(args: InjectedArgs) -> Result<Self> {
            Ok(Self {
                user: args.required(0)?,
            })
        }
    }

    impl Provider for GreetingProvider {
        type Value = String;

        fn value(&self) -> Result<ValueOrPromise<String>> {
            let user = Arc::clone(&self.user);
            Ok(ValueOrPromise::promise(async move { Ok(format!("Hello, {user}")) }))
        }
    }

    struct Shout;

    impl ValueFactory for Shout {
        type Value = String;

        fn metadata() -> Result<InjectionMetadata> {
            InjectionMetadata::builder("Shout")
                .param(0, Injection::key("user"))
                .build()
        }

        fn value(args: InjectedArgs) -> Result<ValueOrPromise<String>> {
            let user = args.required::<String>(0)?;
            Ok(ValueOrPromise::Value(user.to_uppercase()))
        }
    }

    #[test]
    fn test_class_with_optional_property() {
        let ctx = Context::new();
        ctx.bind("user").unwrap().to(String::from("John")).unwrap();
        ctx.bind("greeter").unwrap().to_class::<Greeter>().unwrap();

        let greeter = ctx.get_sync::<Greeter>("greeter").unwrap();
        assert_eq!(*greeter.user, "John");
        assert!(greeter.nickname.is_none());
    }

    #[test]
    fn test_missing_required_injection() {
        let ctx = Context::new();
        ctx.bind("greeter").unwrap().to_class::<Greeter>().unwrap();

        let err = ctx.get_sync::<Greeter>("greeter").unwrap_err();
        assert!(matches!(
            err,
            ContextError::InjectionResolution { target, member, key }
                if target == "Greeter" && member == "constructor[0]" && key == "user"
        ));
    }

    #[test]
    fn test_transitive_not_found_propagates_unchanged() {
        let ctx = Context::new();
        ctx.bind("user").unwrap().to_alias("accounts.current").unwrap();
        ctx.bind("greeter").unwrap().to_class::<Greeter>().unwrap();

        let err = ctx.get_sync::<Greeter>("greeter").unwrap_err();
        assert!(matches!(
            err,
            ContextError::BindingNotFound { key, resolution_path, .. }
                if key == "accounts.current" && resolution_path == vec!["greeter", "user"]
        ));
    }

    #[tokio::test]
    async fn test_async_provider() {
        let ctx = Context::new();
        ctx.bind("user").unwrap().to(String::from("John")).unwrap();
        ctx.bind("greeting").unwrap().to_provider::<GreetingProvider>().unwrap();

        assert!(matches!(
            ctx.get_sync::<String>("greeting"),
            Err(ContextError::AsyncResolutionNotAllowed { .. })
        ));
        assert_eq!(*ctx.get::<String>("greeting").await.unwrap(), "Hello, John");
    }

    #[test]
    fn test_value_factory() {
        let ctx = Context::new();
        ctx.bind("user").unwrap().to(String::from("John")).unwrap();
        ctx.bind("shout").unwrap().to_value_factory::<Shout>().unwrap();
        assert_eq!(*ctx.get_sync::<String>("shout").unwrap(), "JOHN");
    }

    #[test]
    fn test_singleton_class_identity() {
        let ctx = Context::new();
        ctx.bind("user").unwrap().to(String::from("John")).unwrap();
        ctx.bind("greeter")
            .unwrap()
            .in_scope(BindingScope::Singleton)
            .to_class::<Greeter>()
            .unwrap();

        let a = ctx.get_sync::<Greeter>("greeter").unwrap();
        let b = ctx.get_sync::<Greeter>("greeter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invoke_method_mixes_injected_and_supplied_args() {
        let ctx = Context::new();
        ctx.bind("user").unwrap().to(String::from("John")).unwrap();
        let metadata = MethodMetadata::builder("GreetingController", "greet")
            .param(1, Injection::key("user"))
            .build()
            .unwrap();

        let greeting = ctx
            .invoke_method(&metadata, vec![Arc::new(3usize) as BoundValue], |args| {
                let times = args.required::<usize>(0)?;
                let user = args.required::<String>(1)?;
                Ok(format!("Hello, {user}").repeat(*times))
            })
            .unwrap()
            .into_sync("greet")
            .unwrap();
        assert_eq!(greeting, "Hello, JohnHello, JohnHello, John");
    }

    #[test]
    fn test_invoke_method_missing_argument() {
        let ctx = Context::new();
        let metadata = MethodMetadata::builder("GreetingController", "greet")
            .param(1, Injection::context())
            .build()
            .unwrap();
        let err = ctx
            .invoke_method(&metadata, Vec::new(), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidInjection { member, .. } if member == "greet[0]"));
    }

    #[test]
    fn test_wrong_form_is_reported() {
        let ctx = Context::new();
        let metadata = MethodMetadata::builder("Probe", "run")
            .param(0, Injection::context())
            .build()
            .unwrap();
        let err = ctx
            .invoke_method(&metadata, Vec::new(), |args| {
                let _ = args.required::<String>(0)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidInjection { reason, .. } if reason.contains("context")));
    }
}
