//! Disposal of cached values
//!
//! When a context closes, the cached values of its disposable bindings are
//! disposed in reverse order of creation:
//!
//! ```text
//! Context::close()
//!    ↓
//! mark closed (new resolutions fail)
//!    ↓
//! Dispose::dispose (newest value first)
//!    ↓
//! release bindings, notify observers and views
//! ```

mod dispose;
mod disposer;

pub use dispose::{Dispose, DisposeHook};
pub(crate) use dispose::dispose_hook;
pub(crate) use disposer::{PendingDisposal, dispose_all};
