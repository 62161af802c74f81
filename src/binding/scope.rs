use serde::Serialize;
use strum_macros::{Display, EnumString};

/// Lifecycle policy for the value a binding resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum BindingScope {
    /// A new value per resolution.
    #[default]
    Transient,
    /// One value cached in the binding, shared by every context that sees it.
    /// Dependencies are resolved from the context that owns the binding.
    Singleton,
    /// One value per resolving context.
    Context,
}

/// How a binding produces its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum BindingType {
    Constant,
    DynamicValue,
    Class,
    Provider,
    Alias,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_scope_parses_from_config_strings() {
        assert_eq!(BindingScope::from_str("singleton").unwrap(), BindingScope::Singleton);
        assert_eq!(BindingScope::from_str("Context").unwrap(), BindingScope::Context);
        assert!(BindingScope::from_str("request").is_err());
        assert_eq!(BindingScope::default(), BindingScope::Transient);
    }

    #[test]
    fn test_type_display() {
        assert_eq!(BindingType::DynamicValue.to_string(), "DynamicValue");
    }
}
