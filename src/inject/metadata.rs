use crate::binding::{BindingFilter, filter_by_tag};
use crate::error::{ContextError, Result};
use crate::key::{AsBindingKey, BindingKey};
use std::collections::BTreeMap;
use std::fmt;

/// How one injection point obtains its value.
#[derive(Clone, Debug)]
pub(crate) enum InjectionKind {
    /// The value bound to a key (the key may carry a property path).
    Key(BindingKey<()>),
    /// A resolver re-reading the key on every call.
    Getter(BindingKey<()>),
    /// A live view over matching bindings.
    View(BindingFilter),
    /// The values of every matching binding.
    Filter(BindingFilter),
    /// The value of the single preferred matching binding.
    FilterOne(BindingFilter),
    /// The context resolution happens in.
    Context,
    /// The current resolution session.
    Session,
    /// A property of the configuration of the binding under construction.
    Config(String),
}

/// Declaration of one injection point.
///
/// Errors in a declaration (such as a malformed key) are kept until the
/// metadata is built, where they fail the whole declaration.
///
/// ```
/// use bindery::Injection;
///
/// let user = Injection::key("user").optional();
/// let greeters = Injection::tag("greeter");
/// let port = Injection::config("rest.port");
/// # let _ = (user, greeters, port);
/// ```
#[derive(Clone, Debug)]
pub struct Injection {
    kind: std::result::Result<InjectionKind, String>,
    optional: bool,
}

impl Injection {
    fn of(kind: InjectionKind) -> Self {
        Self {
            kind: Ok(kind),
            optional: false,
        }
    }

    fn parse_key(key: impl AsBindingKey) -> std::result::Result<BindingKey<()>, String> {
        key.as_binding_key().map_err(|e| e.to_string())
    }

    /// Inject the value bound to `key`.
    pub fn key(key: impl AsBindingKey) -> Self {
        Self {
            kind: Self::parse_key(key).map(InjectionKind::Key),
            optional: false,
        }
    }

    /// Inject a [`Getter`](crate::Getter) re-resolving `key` on each call.
    pub fn getter(key: impl AsBindingKey) -> Self {
        Self {
            kind: Self::parse_key(key).map(InjectionKind::Getter),
            optional: false,
        }
    }

    /// Inject a live [`ContextView`](crate::ContextView).
    pub fn view(filter: impl Into<BindingFilter>) -> Self {
        Self::of(InjectionKind::View(filter.into()))
    }

    /// Inject the values of every binding carrying `tag`, in view order.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::filter(filter_by_tag(tag))
    }

    /// Inject the values of every binding matching `filter`.
    pub fn filter(filter: impl Into<BindingFilter>) -> Self {
        Self::of(InjectionKind::Filter(filter.into()))
    }

    /// Inject the value of one binding carrying `tag`: the nearest, then the
    /// earliest registered.
    pub fn tag_one(tag: impl Into<String>) -> Self {
        Self::of(InjectionKind::FilterOne(filter_by_tag(tag)))
    }

    pub fn filter_one(filter: impl Into<BindingFilter>) -> Self {
        Self::of(InjectionKind::FilterOne(filter.into()))
    }

    /// Inject the resolving context itself.
    pub fn context() -> Self {
        Self::of(InjectionKind::Context)
    }

    /// Inject the current resolution session.
    pub fn session() -> Self {
        Self::of(InjectionKind::Session)
    }

    /// Inject `path` of the configuration bound for the binding under
    /// construction. Always optional.
    pub fn config(path: impl Into<String>) -> Self {
        Self {
            kind: Ok(InjectionKind::Config(path.into())),
            optional: true,
        }
    }

    /// Resolve to nothing, instead of failing, when the key is not bound.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    fn validate(self, target: &str, member: &str) -> Result<(InjectionKind, bool)> {
        let invalid = |reason: String| ContextError::InvalidInjection {
            target: target.to_string(),
            member: member.to_string(),
            reason,
        };
        let kind = self.kind.map_err(invalid)?;
        match &kind {
            InjectionKind::Context | InjectionKind::Session | InjectionKind::View(_) | InjectionKind::Getter(_)
                if self.optional =>
            {
                Err(invalid(format!("{} injection cannot be optional", kind.form())))
            }
            InjectionKind::Config(path) if path.contains(crate::key::PROPERTY_SEPARATOR) => {
                Err(invalid(format!("config path '{path}' cannot contain a key separator")))
            }
            _ => Ok((kind, self.optional)),
        }
    }
}

impl InjectionKind {
    fn form(&self) -> &'static str {
        match self {
            Self::Key(_) => "key",
            Self::Getter(_) => "getter",
            Self::View(_) => "view",
            Self::Filter(_) => "filter",
            Self::FilterOne(_) => "single-binding filter",
            Self::Context => "context",
            Self::Session => "session",
            Self::Config(_) => "config",
        }
    }

    /// What the point asks for, for diagnostics.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Key(key) | Self::Getter(key) => key.to_string(),
            Self::View(f) | Self::Filter(f) | Self::FilterOne(f) => f.description().to_string(),
            Self::Context => "<context>".to_string(),
            Self::Session => "<session>".to_string(),
            Self::Config(path) => format!("<config>#{path}"),
        }
    }
}

/// Constructor parameter position or property name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Member {
    Parameter(usize),
    Property(String),
}

impl From<usize> for Member {
    fn from(index: usize) -> Self {
        Self::Parameter(index)
    }
}

impl From<&str> for Member {
    fn from(name: &str) -> Self {
        Self::Property(name.to_string())
    }
}

impl From<String> for Member {
    fn from(name: String) -> Self {
        Self::Property(name)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter(i) => write!(f, "[{i}]"),
            Self::Property(name) => f.write_str(name),
        }
    }
}

/// A validated injection point.
#[derive(Clone, Debug)]
pub struct InjectionPoint {
    pub(crate) member: Member,
    /// `constructor[0]`, `value[1]` or a property name.
    pub(crate) name: String,
    pub(crate) kind: InjectionKind,
    pub(crate) optional: bool,
}

impl InjectionPoint {
    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// The key, filter or form this point asks for.
    pub fn describe(&self) -> String {
        self.kind.describe()
    }
}

/// Injection table of a class, provider or value factory.
///
/// Constructor parameters must be declared for every position from `0` up,
/// without gaps; properties by name.
#[derive(Clone, Debug)]
pub struct InjectionMetadata {
    target: String,
    params: Vec<InjectionPoint>,
    properties: Vec<InjectionPoint>,
}

impl InjectionMetadata {
    /// A target without injection points.
    pub fn empty(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            params: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Start describing `target`, usually `short_type_name::<Self>()`.
    pub fn builder(target: impl Into<String>) -> InjectionMetadataBuilder {
        InjectionMetadataBuilder {
            target: target.into(),
            params: BTreeMap::new(),
            properties: Vec::new(),
            duplicate: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn params(&self) -> &[InjectionPoint] {
        &self.params
    }

    pub fn properties(&self) -> &[InjectionPoint] {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.properties.is_empty()
    }
}

pub struct InjectionMetadataBuilder {
    target: String,
    params: BTreeMap<usize, Injection>,
    properties: Vec<(String, Injection)>,
    duplicate: Option<Member>,
}

impl InjectionMetadataBuilder {
    /// Describe constructor parameter `index`.
    pub fn param(mut self, index: usize, injection: Injection) -> Self {
        if self.params.insert(index, injection).is_some() {
            self.duplicate.get_or_insert(Member::Parameter(index));
        }
        self
    }

    /// Describe an injected property.
    pub fn property(mut self, name: impl Into<String>, injection: Injection) -> Self {
        let name = name.into();
        if self.properties.iter().any(|(n, _)| *n == name) {
            self.duplicate.get_or_insert(Member::Property(name.clone()));
        }
        self.properties.push((name, injection));
        self
    }

    pub fn build(self) -> Result<InjectionMetadata> {
        if let Some(member) = self.duplicate {
            return Err(ContextError::InvalidInjection {
                target: self.target,
                member: member.to_string(),
                reason: "declared more than once".to_string(),
            });
        }
        let mut params = Vec::with_capacity(self.params.len());
        for (expected, (index, injection)) in self.params.into_iter().enumerate() {
            if index != expected {
                return Err(ContextError::InvalidInjection {
                    target: self.target,
                    member: format!("constructor[{expected}]"),
                    reason: "constructor parameter has no injection".to_string(),
                });
            }
            let name = format!("constructor[{index}]");
            let (kind, optional) = injection.validate(&self.target, &name)?;
            params.push(InjectionPoint {
                member: Member::Parameter(index),
                name,
                kind,
                optional,
            });
        }
        let mut properties = Vec::with_capacity(self.properties.len());
        for (name, injection) in self.properties {
            let (kind, optional) = injection.validate(&self.target, &name)?;
            properties.push(InjectionPoint {
                member: Member::Property(name.clone()),
                name,
                kind,
                optional,
            });
        }
        Ok(InjectionMetadata {
            target: self.target,
            params,
            properties,
        })
    }
}

/// Injection table of one method: the injected parameters, by position.
///
/// Positions without an injection are filled from the caller's arguments
/// when the method is invoked.
#[derive(Clone, Debug)]
pub struct MethodMetadata {
    target: String,
    method: String,
    params: Vec<InjectionPoint>,
}

impl MethodMetadata {
    pub fn builder(target: impl Into<String>, method: impl Into<String>) -> MethodMetadataBuilder {
        MethodMetadataBuilder {
            target: target.into(),
            method: method.into(),
            params: BTreeMap::new(),
            duplicate: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[InjectionPoint] {
        &self.params
    }

    pub(crate) fn injected_at(&self, index: usize) -> Option<&InjectionPoint> {
        self.params.iter().find(|p| p.member == Member::Parameter(index))
    }
}

pub struct MethodMetadataBuilder {
    target: String,
    method: String,
    params: BTreeMap<usize, Injection>,
    duplicate: Option<usize>,
}

impl MethodMetadataBuilder {
    pub fn param(mut self, index: usize, injection: Injection) -> Self {
        if self.params.insert(index, injection).is_some() {
            self.duplicate.get_or_insert(index);
        }
        self
    }

    pub fn build(self) -> Result<MethodMetadata> {
        if let Some(index) = self.duplicate {
            return Err(ContextError::InvalidInjection {
                target: self.target,
                member: format!("{}[{index}]", self.method),
                reason: "declared more than once".to_string(),
            });
        }
        let mut params = Vec::with_capacity(self.params.len());
        for (index, injection) in self.params {
            let name = format!("{}[{index}]", self.method);
            let (kind, optional) = injection.validate(&self.target, &name)?;
            params.push(InjectionPoint {
                member: Member::Parameter(index),
                name,
                kind,
                optional,
            });
        }
        Ok(MethodMetadata {
            target: self.target,
            method: self.method,
            params,
        })
    }
}

/// `my_app::services::UserService` becomes `UserService`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base_end = full.find('<').unwrap_or(full.len());
    let start = full[..base_end].rfind("::").map(|i| i + 2).unwrap_or(0);
    &full[start..]
}
