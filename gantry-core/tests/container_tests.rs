use gantry_core::{Error, Lifetime, ProviderDescriptor, ProviderRegistry, RequestScope, Token};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Config {
    url: String,
}

struct Repository {
    config: Arc<Config>,
}

struct Service {
    repository: Arc<Repository>,
}

fn tokens(order: &[Token]) -> Vec<&str> {
    order.iter().map(Token::as_str).collect()
}

#[test]
fn test_dependencies_constructed_before_dependents() {
    let registry = ProviderRegistry::new(vec![
        ProviderDescriptor::factory("service", ["repository"], |deps| {
            Ok(Service {
                repository: deps.get("repository")?,
            })
        }),
        ProviderDescriptor::factory("repository", ["config"], |deps| {
            Ok(Repository {
                config: deps.at(0)?,
            })
        }),
        ProviderDescriptor::value(
            "config",
            Config {
                url: "postgres://localhost".to_string(),
            },
        ),
    ])
    .unwrap();

    assert_eq!(
        tokens(registry.construction_order()),
        vec!["config", "repository", "service"]
    );

    registry.instantiate_singletons().unwrap();
    let service = registry
        .resolve_as::<Service>(&"service".into(), None)
        .unwrap();
    assert_eq!(service.repository.config.url, "postgres://localhost");
}

#[test]
fn test_independent_providers_keep_declaration_order() {
    let registry = ProviderRegistry::new(vec![
        ProviderDescriptor::value("b", 2u32),
        ProviderDescriptor::value("a", 1u32),
        ProviderDescriptor::value("c", 3u32),
    ])
    .unwrap();

    assert_eq!(tokens(registry.construction_order()), vec!["b", "a", "c"]);
}

#[test]
fn test_cycle_fails_before_any_construction() {
    let built = Arc::new(AtomicUsize::new(0));
    let provider = |token: &'static str, dependency: &'static str| {
        let built = built.clone();
        ProviderDescriptor::factory(token, [dependency], move |_| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(token)
        })
    };

    let result = ProviderRegistry::new(vec![
        provider("a", "b"),
        provider("b", "c"),
        provider("c", "a"),
    ]);

    match result {
        Err(Error::DependencyCycle(path)) => {
            assert_eq!(path.first(), path.last());
            assert_eq!(path.len(), 4);
            for token in ["a", "b", "c"] {
                assert!(path.iter().any(|t| t == token));
            }
        }
        other => panic!("expected a dependency cycle, got {:?}", other.map(|_| ())),
    }
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let result = ProviderRegistry::new(vec![ProviderDescriptor::factory(
        "loop",
        ["loop"],
        |_| Ok(()),
    )]);
    assert!(matches!(result, Err(Error::DependencyCycle(_))));
}

#[test]
fn test_undeclared_dependency() {
    let result = ProviderRegistry::new(vec![ProviderDescriptor::factory(
        "mailer",
        ["smtp"],
        |_| Ok(()),
    )]);

    match result {
        Err(Error::UnresolvedDependency(message)) => assert!(message.contains("smtp")),
        other => panic!("expected unresolved dependency, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_duplicate_token() {
    let result = ProviderRegistry::new(vec![
        ProviderDescriptor::value("clock", 1u8),
        ProviderDescriptor::value("clock", 2u8),
    ]);
    assert!(matches!(result, Err(Error::DuplicateProvider(_))));
}

#[test]
fn test_singleton_depending_on_scoped_is_rejected() {
    let result = ProviderRegistry::new(vec![
        ProviderDescriptor::scoped("request_user", Vec::<Token>::new(), |_| Ok("alice")),
        ProviderDescriptor::factory("audit", ["request_user"], |_| Ok(())),
    ]);

    match result {
        Err(Error::ScopeMismatch { singleton, scoped }) => {
            assert_eq!(singleton, "audit");
            assert_eq!(scoped, "request_user");
        }
        other => panic!("expected scope mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_transitive_scope_mismatch_is_rejected() {
    let result = ProviderRegistry::new(vec![
        ProviderDescriptor::scoped("tenant", Vec::<Token>::new(), |_| Ok(7u32)),
        ProviderDescriptor::scoped("session", ["tenant"], |_| Ok(())),
        ProviderDescriptor::factory("reporter", ["session"], |_| Ok(())),
    ]);
    assert!(matches!(result, Err(Error::ScopeMismatch { .. })));
}

#[test]
fn test_scoped_may_depend_on_singleton() {
    let registry = ProviderRegistry::new(vec![
        ProviderDescriptor::value("config", 10u32),
        ProviderDescriptor::scoped("counter", ["config"], |deps| {
            Ok(*deps.get::<u32>("config")? + 1)
        }),
    ])
    .unwrap();

    let scope = RequestScope::new();
    let value = registry
        .resolve_as::<u32>(&"counter".into(), Some(&scope))
        .unwrap();
    assert_eq!(*value, 11);
    assert_eq!(
        registry.descriptor(&"counter".into()).map(|d| d.lifetime),
        Some(Lifetime::PerRequest)
    );
}

#[test]
fn test_scoped_instance_shared_within_request_only() {
    let registry = ProviderRegistry::new(vec![ProviderDescriptor::scoped(
        "unit_of_work",
        Vec::<Token>::new(),
        |_| Ok(String::from("uow")),
    )])
    .unwrap();
    let token: Token = "unit_of_work".into();

    let first = RequestScope::new();
    let a = registry.resolve(&token, Some(&first)).unwrap();
    let b = registry.resolve(&token, Some(&first)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(first.len(), 1);

    let second = RequestScope::new();
    let c = registry.resolve(&token, Some(&second)).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.construction_count(&token), 2);
}

#[test]
fn test_scoped_outside_request_fails() {
    let registry = ProviderRegistry::new(vec![ProviderDescriptor::scoped(
        "request_id",
        Vec::<Token>::new(),
        |_| Ok(1u64),
    )])
    .unwrap();
    assert!(matches!(
        registry.resolve(&"request_id".into(), None),
        Err(Error::UnresolvedDependency(_))
    ));
}

#[test]
fn test_wrong_type_reported() {
    let registry = ProviderRegistry::new(vec![ProviderDescriptor::value("port", 8080u16)]).unwrap();
    assert!(registry.resolve_as::<String>(&"port".into(), None).is_err());
}

#[test]
fn test_factory_error_propagates_and_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let registry = ProviderRegistry::new(vec![ProviderDescriptor::factory(
        "flaky",
        Vec::<Token>::new(),
        move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::ServiceUnavailable("warming up".to_string()))
            } else {
                Ok(42u32)
            }
        },
    )])
    .unwrap();

    assert!(registry.resolve(&"flaky".into(), None).is_err());
    assert_eq!(*registry.resolve_as::<u32>(&"flaky".into(), None).unwrap(), 42);
    assert_eq!(registry.construction_count(&"flaky".into()), 1);
}

#[test]
fn test_concurrent_singleton_constructed_once() {
    let registry = Arc::new(
        ProviderRegistry::new(vec![ProviderDescriptor::factory(
            "pool",
            Vec::<Token>::new(),
            |_| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(vec![0u8; 16])
            },
        )])
        .unwrap(),
    );

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || registry.resolve(&"pool".into(), None).unwrap())
        })
        .collect();
    let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(registry.construction_count(&"pool".into()), 1);
    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
}
