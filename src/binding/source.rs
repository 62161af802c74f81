use super::{Binding, BindingType, BoundValue};
use crate::context::Context;
use crate::error::Result;
use crate::key::BindingKey;
use crate::resolution::{ResolutionSession, ValueOrPromise};
use std::sync::Arc;

/// Type-erased producer behind dynamic, class and provider bindings.
pub(crate) type SourceFn = Arc<
    dyn Fn(&Binding, &Context, &mut ResolutionSession) -> Result<ValueOrPromise<BoundValue>>
        + Send
        + Sync,
>;

/// What a binding resolves to. One variant per [`BindingType`].
#[derive(Clone)]
pub(crate) enum BindingSource {
    Constant(BoundValue),
    DynamicValue {
        target: Option<&'static str>,
        produce: SourceFn,
    },
    Class {
        target: &'static str,
        produce: SourceFn,
    },
    Provider {
        target: &'static str,
        produce: SourceFn,
    },
    Alias(BindingKey<()>),
}

impl BindingSource {
    pub(crate) fn binding_type(&self) -> BindingType {
        match self {
            Self::Constant(_) => BindingType::Constant,
            Self::DynamicValue { .. } => BindingType::DynamicValue,
            Self::Class { .. } => BindingType::Class,
            Self::Provider { .. } => BindingType::Provider,
            Self::Alias(_) => BindingType::Alias,
        }
    }

    /// Name of the Rust type behind class/provider/factory bindings.
    pub(crate) fn target(&self) -> Option<String> {
        match self {
            Self::Class { target, .. } | Self::Provider { target, .. } => Some(target.to_string()),
            Self::DynamicValue { target, .. } => target.map(str::to_string),
            Self::Alias(key) => Some(key.to_string()),
            Self::Constant(_) => None,
        }
    }

    pub(crate) fn produce(
        &self,
        binding: &Binding,
        ctx: &Context,
        session: &mut ResolutionSession,
    ) -> Result<ValueOrPromise<BoundValue>> {
        match self {
            Self::Constant(value) => Ok(ValueOrPromise::Value(Arc::clone(value))),
            Self::DynamicValue { produce, .. }
            | Self::Class { produce, .. }
            | Self::Provider { produce, .. } => produce(binding, ctx, session),
            Self::Alias(target) => ctx.resolve_required(target, session),
        }
    }
}
