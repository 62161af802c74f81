//! Context: the hierarchical binding registry
//!
//! - `container` - `Context` itself: registration, lookup, resolution, close
//! - `builder` - `ContextBuilder`
//! - `events` - bind/unbind/change notifications and observers
//! - `view` - live filtered views used for extension points

mod builder;
mod container;
mod events;
mod view;

pub use builder::ContextBuilder;
pub use container::Context;
pub(crate) use container::ContextInner;
pub use events::{ContextEvent, ContextEventKind, ContextObserver, Subscription};
pub use view::{ContextView, ViewGetter};
