use proc_macro::TokenStream;

mod injectable;

/// Derive macro implementing `bindery::Injectable` for a struct
///
/// Fields marked with `#[inject(...)]` are resolved from the context;
/// other fields are filled with `Default::default()`. Named fields become
/// injected properties, tuple fields constructor parameters.
///
/// # Example
/// ```ignore
/// use bindery::prelude::*;
///
/// #[derive(Injectable)]
/// pub struct UserController {
///     #[inject("services.UserService")]
///     users: Arc<UserService>,
///     #[inject("auth.currentUser", optional)]
///     current_user: Option<Arc<User>>,
///     #[inject(tag = "greeter")]
///     greeters: Vec<Arc<Greeter>>,
///     #[inject(config = "page_size")]
///     page_size: Option<Arc<serde_json::Value>>,
/// }
/// ```
#[proc_macro_derive(Injectable, attributes(inject))]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    injectable::derive_injectable(input)
}
