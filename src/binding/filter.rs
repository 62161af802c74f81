use super::Binding;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Binding) -> bool + Send + Sync>;

/// Predicate selecting bindings, used by `find`, views and tag injection.
#[derive(Clone)]
pub struct BindingFilter {
    predicate: Predicate,
    description: String,
}

impl BindingFilter {
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Binding) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            description: description.into(),
        }
    }

    /// Matches every binding.
    pub fn all() -> Self {
        Self::new("*", |_| true)
    }

    pub fn matches(&self, binding: &Binding) -> bool {
        (self.predicate)(binding)
    }

    pub fn and(self, other: BindingFilter) -> Self {
        let description = format!("({} && {})", self.description, other.description);
        Self::new(description, move |b| self.matches(b) && other.matches(b))
    }

    pub fn or(self, other: BindingFilter) -> Self {
        let description = format!("({} || {})", self.description, other.description);
        Self::new(description, move |b| self.matches(b) || other.matches(b))
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for BindingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingFilter({})", self.description)
    }
}

/// Select bindings carrying `tag`.
pub fn filter_by_tag(tag: impl Into<String>) -> BindingFilter {
    let tag = tag.into();
    BindingFilter::new(format!("tag:{tag}"), move |b| b.has_tag(&tag))
}

/// Select bindings whose key matches a glob pattern.
///
/// `*` matches any run of characters other than `.`, `?` matches one such
/// character. A pattern without wildcards matches the key exactly.
pub fn filter_by_key(pattern: impl Into<String>) -> BindingFilter {
    let pattern = pattern.into();
    let matcher = KeyPattern::compile(&pattern);
    BindingFilter::new(format!("key:{pattern}"), move |b| matcher.is_match(b.key().key()))
}

enum KeyPattern {
    Exact(String),
    Glob(Regex),
}

impl KeyPattern {
    fn compile(pattern: &str) -> Self {
        if !pattern.contains(['*', '?']) {
            return Self::Exact(pattern.to_string());
        }
        let mut expr = String::from("^");
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str("[^.]*"),
                '?' => expr.push_str("[^.]"),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        match Regex::new(&expr) {
            Ok(re) => Self::Glob(re),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "invalid key pattern, falling back to exact match");
                Self::Exact(pattern.to_string())
            }
        }
    }

    fn is_match(&self, key: &str) -> bool {
        match self {
            Self::Exact(p) => p == key,
            Self::Glob(re) => re.is_match(key),
        }
    }
}

impl From<&str> for BindingFilter {
    fn from(pattern: &str) -> Self {
        filter_by_key(pattern)
    }
}

impl From<String> for BindingFilter {
    fn from(pattern: String) -> Self {
        filter_by_key(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_pattern() {
        let services = KeyPattern::compile("services.*");
        assert!(services.is_match("services.Foo"));
        assert!(!services.is_match("services.Foo.config"));
        assert!(!services.is_match("repositories.Foo"));

        let one = KeyPattern::compile("a?c");
        assert!(one.is_match("abc"));
        assert!(!one.is_match("a.c"));
    }

    #[test]
    fn test_exact_pattern_escapes_nothing() {
        let exact = KeyPattern::compile("a.b+c");
        assert!(exact.is_match("a.b+c"));
        assert!(!exact.is_match("aXb+c"));
    }

    #[test]
    fn test_filter_by_tag_and_combinators() {
        let a = Binding::create("greeters.en").unwrap().tag("greeter");
        let b = Binding::create("greeters.fr").unwrap();

        let greeter = filter_by_tag("greeter");
        assert!(greeter.matches(&a));
        assert!(!greeter.matches(&b));

        let either = filter_by_tag("greeter").or(filter_by_key("greeters.fr"));
        assert!(either.matches(&a) && either.matches(&b));

        let both = filter_by_tag("greeter").and(filter_by_key("greeters.*"));
        assert!(both.matches(&a) && !both.matches(&b));
    }
}
