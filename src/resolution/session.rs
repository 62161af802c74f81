use crate::error::{ContextError, Result};
use std::fmt;

/// One frame of the active resolution chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionElement {
    /// A binding being resolved, by key.
    Binding(String),
    /// An injection point being resolved, e.g. `UserController.constructor[0]`.
    Injection { target: String, member: String },
}

impl fmt::Display for ResolutionElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binding(key) => f.write_str(key),
            Self::Injection { target, member } => write!(f, "@{target}.{member}"),
        }
    }
}

/// Bookkeeping for one top-level `get`/`get_sync` call.
///
/// Tracks the chain of bindings and injections currently being resolved so
/// that a key met twice on the chain is reported as a cycle instead of
/// recursing forever. Futures created during resolution carry a clone of the
/// session taken at the point they were created.
#[derive(Debug, Clone, Default)]
pub struct ResolutionSession {
    stack: Vec<ResolutionElement>,
    async_encountered: bool,
}

impl ResolutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with `key` pushed on the chain. The key is popped again
    /// whether `f` succeeds or fails.
    pub fn enter_binding<R>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.push_binding(key)?;
        let result = f(self);
        self.pop();
        result
    }

    pub fn enter_injection<R>(
        &mut self,
        target: &str,
        member: &str,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.stack.push(ResolutionElement::Injection {
            target: target.to_string(),
            member: member.to_string(),
        });
        let result = f(self);
        self.pop();
        result
    }

    fn push_binding(&mut self, key: &str) -> Result<()> {
        let seen = self
            .stack
            .iter()
            .any(|e| matches!(e, ResolutionElement::Binding(k) if k == key));
        if seen {
            let mut chain = self.binding_path();
            chain.push(key.to_string());
            tracing::debug!(chain = %chain.join(" --> "), "circular dependency detected");
            return Err(ContextError::CircularDependency { chain });
        }
        self.stack.push(ResolutionElement::Binding(key.to_string()));
        Ok(())
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    /// Keys of the bindings on the chain, outermost first.
    pub fn binding_path(&self) -> Vec<String> {
        self.stack
            .iter()
            .filter_map(|e| match e {
                ResolutionElement::Binding(k) => Some(k.clone()),
                ResolutionElement::Injection { .. } => None,
            })
            .collect()
    }

    /// Full chain including injection frames, for diagnostics.
    pub fn resolution_path(&self) -> String {
        self.stack
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" --> ")
    }

    /// The innermost binding on the chain.
    pub fn current_binding(&self) -> Option<&str> {
        self.stack.iter().rev().find_map(|e| match e {
            ResolutionElement::Binding(k) => Some(k.as_str()),
            ResolutionElement::Injection { .. } => None,
        })
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn mark_async(&mut self) {
        self.async_encountered = true;
    }

    /// Whether any step so far could only complete asynchronously.
    pub fn is_async(&self) -> bool {
        self.async_encountered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_cycle_with_full_chain() {
        let mut session = ResolutionSession::new();
        let err = session
            .enter_binding("a", |s| {
                s.enter_injection("B", "constructor[0]", |s| {
                    s.enter_binding("b", |s| s.enter_binding("a", |_| Ok(())))
                })
            })
            .unwrap_err();
        match err {
            ContextError::CircularDependency { chain } => assert_eq!(chain, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn test_pops_on_error() {
        let mut session = ResolutionSession::new();
        let _ = session.enter_binding("a", |_| -> Result<()> {
            Err(ContextError::closed("ctx"))
        });
        assert_eq!(session.depth(), 0);
        session.enter_binding("a", |_| Ok(())).unwrap();
    }

    #[test]
    fn test_resolution_path_shows_injections() {
        let mut session = ResolutionSession::new();
        session
            .enter_binding("controllers.Hello", |s| {
                s.enter_injection("HelloController", "greeter", |s| {
                    assert_eq!(s.current_binding(), Some("controllers.Hello"));
                    assert_eq!(
                        s.resolution_path(),
                        "controllers.Hello --> @HelloController.greeter"
                    );
                    Ok(())
                })
            })
            .unwrap();
    }
}
