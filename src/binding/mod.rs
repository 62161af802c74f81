mod filter;
mod handle;
mod scope;
mod source;

use std::any::Any;
use std::sync::Arc;

pub use filter::{BindingFilter, filter_by_key, filter_by_tag};
pub use handle::Binding;
pub use scope::{BindingScope, BindingType};
pub(crate) use source::SourceFn;

/// A resolved value, type-erased. Typed access goes through `downcast`.
pub type BoundValue = Arc<dyn Any + Send + Sync>;
