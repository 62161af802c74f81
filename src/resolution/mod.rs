mod cache;
mod context;
mod session;
mod value;

pub(crate) use cache::ValueCache;
pub use context::{ResolutionContext, ResolutionOptions};
pub use session::{ResolutionElement, ResolutionSession};
pub use value::ValueOrPromise;
