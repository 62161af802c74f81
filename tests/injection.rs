use bindery::prelude::*;
use bindery::{BoundValue, ContextEventKind, ResolutionSession};

#[derive(Debug, Injectable)]
struct HelloController {
    #[inject("user")]
    user: Arc<String>,
    #[inject("auth.nickname", optional)]
    nickname: Option<Arc<String>>,
    greetings: u32,
}

#[test]
fn derive_injects_properties_and_defaults_the_rest() {
    let ctx = Context::new();
    ctx.bind("user").unwrap().to(String::from("John")).unwrap();
    ctx.bind("controllers.Hello")
        .unwrap()
        .to_class::<HelloController>()
        .unwrap();

    let controller = ctx.get_sync::<HelloController>("controllers.Hello").unwrap();
    assert_eq!(*controller.user, "John");
    assert!(controller.nickname.is_none());
    assert_eq!(controller.greetings, 0);
}

#[test]
fn missing_required_injection_names_the_point() {
    let ctx = Context::new();
    ctx.bind("controllers.Hello")
        .unwrap()
        .to_class::<HelloController>()
        .unwrap();

    let err = ctx
        .get_sync::<HelloController>("controllers.Hello")
        .unwrap_err();
    assert!(matches!(
        err,
        ContextError::InjectionResolution { ref target, ref member, ref key }
            if target == "HelloController" && member == "user" && key == "user"
    ));
}

struct GreetingProvider {
    user: Arc<String>,
}

impl Injectable for GreetingProvider {
    fn metadata() -> Result<InjectionMetadata> {
        InjectionMetadata::builder("GreetingProvider")
            .param(0, Injection::key("user"))
            .build()
    }

    fn construct(args: InjectedArgs) -> Result<Self> {
        Ok(Self {
            user: args.required(0)?,
        })
    }
}

impl Provider for GreetingProvider {
    type Value = String;

    fn value(&self) -> Result<ValueOrPromise<String>> {
        Ok(ValueOrPromise::Value(format!("Hello, {}", self.user)))
    }
}

#[tokio::test]
async fn provider_matches_factory_result() {
    let ctx = Context::new();
    ctx.bind("user").unwrap().to(String::from("John")).unwrap();
    ctx.bind("greeting.factory")
        .unwrap()
        .to_dynamic_value(|rc| Ok(format!("Hello, {}", rc.get_sync::<String>("user")?)))
        .unwrap();
    ctx.bind("greeting.provider")
        .unwrap()
        .to_provider::<GreetingProvider>()
        .unwrap();

    let from_factory = ctx.get::<String>("greeting.factory").await.unwrap();
    let from_provider = ctx.get::<String>("greeting.provider").await.unwrap();
    assert_eq!(from_factory, from_provider);
    assert_eq!(*from_provider, "Hello, John");
}

#[derive(Debug, Injectable)]
struct ServiceA(#[inject("services.B")] Arc<ServiceB>);

#[derive(Debug, Injectable)]
struct ServiceB(#[inject("services.A")] Arc<ServiceA>);

#[tokio::test]
async fn class_cycle_is_detected() {
    let ctx = Context::new();
    ctx.bind("services.A").unwrap().to_class::<ServiceA>().unwrap();
    ctx.bind("services.B").unwrap().to_class::<ServiceB>().unwrap();

    let err = ctx.get::<ServiceA>("services.A").await.unwrap_err();
    match err {
        ContextError::CircularDependency { chain } => {
            assert_eq!(chain, vec!["services.A", "services.B", "services.A"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

#[derive(Injectable)]
struct EnglishGreeter;

impl Greeter for EnglishGreeter {
    fn greet(&self, name: &str) -> String {
        format!("Hello, {name}")
    }
}

#[derive(Injectable)]
struct FrenchGreeter;

impl Greeter for FrenchGreeter {
    fn greet(&self, name: &str) -> String {
        format!("Bonjour, {name}")
    }
}

#[derive(Injectable)]
struct GermanGreeter;

impl Greeter for GermanGreeter {
    fn greet(&self, name: &str) -> String {
        format!("Hallo, {name}")
    }
}

fn as_greeter(value: &BoundValue) -> Option<String> {
    if let Some(g) = value.downcast_ref::<EnglishGreeter>() {
        return Some(g.greet("John"));
    }
    if let Some(g) = value.downcast_ref::<FrenchGreeter>() {
        return Some(g.greet("John"));
    }
    value.downcast_ref::<GermanGreeter>().map(|g| g.greet("John"))
}

#[tokio::test]
async fn tag_view_resolves_exactly_the_tagged_bindings() {
    let ctx = Context::new();
    let view = ctx.create_view(filter_by_tag("greeter"));

    ctx.bind("greeters.en").unwrap().tag("greeter").to_class::<EnglishGreeter>().unwrap();
    ctx.bind("unrelated.a").unwrap().to(1u8).unwrap();
    ctx.bind("greeters.fr").unwrap().tag("greeter").to_class::<FrenchGreeter>().unwrap();
    ctx.bind("unrelated.b").unwrap().tag("other").to(2u8).unwrap();
    ctx.bind("greeters.de").unwrap().tag("greeter").to_class::<GermanGreeter>().unwrap();

    let values = view.values().await.unwrap();
    let greetings: Vec<String> = values.iter().filter_map(as_greeter).collect();
    assert_eq!(values.len(), 3);
    assert_eq!(greetings, vec!["Hello, John", "Bonjour, John", "Hallo, John"]);
}

#[derive(Injectable)]
struct Registry {
    #[inject(tag = "plugin")]
    plugins: Vec<Arc<String>>,
    #[inject(tag_one = "plugin")]
    preferred: Arc<String>,
    #[inject(view = "plugin")]
    view: ContextView,
    #[inject(getter = "current.user")]
    current_user: Getter<String>,
    #[inject(context)]
    context: Context,
}

#[test]
fn derive_supports_every_injection_form() {
    let app = Context::named("app");
    app.bind("plugins.a").unwrap().tag("plugin").to(String::from("a")).unwrap();
    let request = app.create_child("request");
    request.bind("plugins.b").unwrap().tag("plugin").to(String::from("b")).unwrap();
    request.bind("current.user").unwrap().to(String::from("John")).unwrap();
    request.bind("registry").unwrap().to_class::<Registry>().unwrap();

    let registry = request.get_sync::<Registry>("registry").unwrap();
    let plugins: Vec<&str> = registry.plugins.iter().map(|p| p.as_str()).collect();
    assert_eq!(plugins, vec!["b", "a"]);
    assert_eq!(*registry.preferred, "b");
    assert_eq!(registry.view.bindings().len(), 2);
    assert!(registry.context.same_as(&request));

    assert_eq!(*registry.current_user.get_sync().unwrap(), "John");
    request.bind("current.user").unwrap().to(String::from("Jane")).unwrap();
    assert_eq!(*registry.current_user.get_sync().unwrap(), "Jane");

    // the injected view stays live
    let mut events = registry.view.events();
    request.bind("plugins.c").unwrap().tag("plugin").to(String::from("c")).unwrap();
    assert_eq!(registry.view.bindings().len(), 3);
    assert_eq!(events.try_recv().unwrap().kind, ContextEventKind::Changed);
}

#[derive(Injectable)]
struct RestServer {
    #[inject(config = "port")]
    port: Option<Arc<serde_json::Value>>,
    #[inject(config = "tls")]
    tls: Option<Arc<serde_json::Value>>,
    #[inject(session)]
    session: ResolutionSession,
}

#[test]
fn derive_injects_own_configuration() {
    let ctx = Context::new();
    ctx.configure("servers.rest")
        .unwrap()
        .to(serde_json::json!({ "port": 3000 }))
        .unwrap();
    ctx.bind("servers.rest").unwrap().to_class::<RestServer>().unwrap();

    let server = ctx.get_sync::<RestServer>("servers.rest").unwrap();
    assert_eq!(server.port.as_deref(), Some(&serde_json::json!(3000)));
    assert!(server.tls.is_none());
    assert_eq!(server.session.current_binding(), Some("servers.rest"));
}
