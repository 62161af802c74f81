use super::Context;
use crate::binding::Binding;
use crate::error::Result;

/// Builder for a context pre-populated with bindings.
///
/// # Example
/// ```
/// use bindery::{Binding, Context};
///
/// let app = Context::named("app");
/// let request = Context::builder()
///     .name("request")
///     .parent(&app)
///     .binding(Binding::create("request.id").unwrap().to(42u64).unwrap())
///     .build()
///     .unwrap();
///
/// assert_eq!(*request.get_sync::<u64>("request.id").unwrap(), 42);
/// ```
pub struct ContextBuilder {
    name: Option<String>,
    parent: Option<Context>,
    bindings: Vec<Binding>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            parent: None,
            bindings: Vec::new(),
        }
    }

    /// Name the context; a generated `context-<uuid>` is used otherwise.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parent(mut self, parent: &Context) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Register a binding when the context is built, in call order.
    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn build(self) -> Result<Context> {
        let ctx = Context::create(self.name, self.parent.as_ref());
        for binding in &self.bindings {
            ctx.add(binding)?;
        }
        Ok(ctx)
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_name() {
        let ctx = ContextBuilder::new().build().unwrap();
        assert!(ctx.name().starts_with("context-"));
        assert!(ctx.parent().is_none());
    }

    #[test]
    fn test_bindings_keep_order() {
        let ctx = Context::builder()
            .binding(Binding::create("b").unwrap().to(2u8).unwrap())
            .binding(Binding::create("a").unwrap().to(1u8).unwrap())
            .build()
            .unwrap();
        let keys: Vec<String> = ctx.find("*").iter().map(|b| b.key().to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
