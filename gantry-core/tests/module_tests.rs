use gantry_core::{Error, Injector, ModuleDescriptor, ModuleGraph, ProviderDescriptor, RequestScope, Token};
use std::sync::Arc;

struct Database {
    name: &'static str,
}

struct CatsService {
    db: Arc<Database>,
}

fn app_modules() -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor::new("AppModule").import("CatsModule"),
        ModuleDescriptor::new("CatsModule")
            .import("DatabaseModule")
            .provider(ProviderDescriptor::factory("CatsService", ["Database"], |deps| {
                Ok(CatsService {
                    db: deps.get("Database")?,
                })
            }))
            .export("CatsService"),
        ModuleDescriptor::new("DatabaseModule")
            .provider(ProviderDescriptor::value("Database", Database { name: "cats" }))
            .export_all(),
        ModuleDescriptor::new("ConfigModule")
            .global()
            .provider(ProviderDescriptor::value("Config", "production".to_string()))
            .export("Config"),
    ]
}

#[test]
fn test_imports_ordered_before_importers() {
    let graph = ModuleGraph::build(app_modules()).unwrap();
    let order = graph.module_order();
    let position = |name: &str| order.iter().position(|m| m == name).unwrap();

    assert!(position("DatabaseModule") < position("CatsModule"));
    assert!(position("CatsModule") < position("AppModule"));
}

#[test]
fn test_visibility_follows_exports() {
    let graph = ModuleGraph::build(app_modules()).unwrap();

    assert!(graph.is_visible("AppModule", &"CatsService".into()));
    assert!(!graph.is_visible("AppModule", &"Database".into()));
    assert!(graph.is_visible("CatsModule", &"Database".into()));
    assert!(graph.is_visible("AppModule", &"Config".into()));
    assert_eq!(graph.owner_of(&"CatsService".into()), Some("CatsModule"));
    assert!(graph.exports_of("DatabaseModule").unwrap().contains(&Token::from("Database")));
}

#[test]
fn test_injector_resolves_through_graph() {
    let graph = Arc::new(ModuleGraph::build(app_modules()).unwrap());
    let injector = Injector::new(
        graph,
        "AppModule",
        Arc::from(Vec::new()),
        Arc::new(RequestScope::new()),
    );

    let cats = injector.get::<CatsService>("CatsService").unwrap();
    assert_eq!(cats.db.name, "cats");
    assert!(matches!(
        injector.get::<Database>("Database"),
        Err(Error::UnresolvedDependency(_))
    ));
}

#[test]
fn test_diamond_imports_are_not_cycles() {
    let graph = ModuleGraph::build(vec![
        ModuleDescriptor::new("App").import("Left").import("Right"),
        ModuleDescriptor::new("Left").import("Shared"),
        ModuleDescriptor::new("Right").import("Shared"),
        ModuleDescriptor::new("Shared"),
    ])
    .unwrap();
    assert_eq!(graph.module_order().len(), 4);
}

#[test]
fn test_longer_import_cycle_reports_path() {
    let result = ModuleGraph::build(vec![
        ModuleDescriptor::new("A").import("B"),
        ModuleDescriptor::new("B").import("C"),
        ModuleDescriptor::new("C").import("A"),
    ]);

    match result {
        Err(Error::ModuleCycle(path)) => assert_eq!(path, vec!["A", "B", "C", "A"]),
        other => panic!("expected module cycle, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_unknown_import_rejected() {
    let result = ModuleGraph::build(vec![ModuleDescriptor::new("App").import("Ghost")]);
    assert!(matches!(result, Err(Error::UnresolvedDependency(_))));
}

#[test]
fn test_same_token_in_two_modules_rejected() {
    let result = ModuleGraph::build(vec![
        ModuleDescriptor::new("A").provider(ProviderDescriptor::value("Logger", 1u8)),
        ModuleDescriptor::new("B").provider(ProviderDescriptor::value("Logger", 2u8)),
    ]);
    assert!(matches!(result, Err(Error::DuplicateProvider(_))));
}

#[test]
fn test_provider_may_depend_on_global_export() {
    let graph = ModuleGraph::build(vec![
        ModuleDescriptor::new("Users").provider(ProviderDescriptor::factory(
            "UsersService",
            ["Config"],
            |deps| Ok(deps.get::<String>("Config")?.len()),
        )),
        ModuleDescriptor::new("ConfigModule")
            .global()
            .provider(ProviderDescriptor::value("Config", "dev".to_string()))
            .export("Config"),
    ])
    .unwrap();

    let len = graph
        .registry()
        .resolve_as::<usize>(&"UsersService".into(), None)
        .unwrap();
    assert_eq!(*len, 3);
}
