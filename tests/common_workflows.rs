//! Integration tests for common Gantry workflows.
//!
//! A small cats application wired the way a real service would be: a global
//! configuration module, a database module, a feature module and one
//! controller with guards, pipes, interceptors and filters at every scope.

use gantry::exception_filter::ValidationExceptionFilter;
use gantry::interceptor::CacheInterceptor;
use gantry::pipe::ParseIntPipe;
use gantry::prelude::*;
use gantry::{AuthenticationGuard, ModuleGraph, Principal, RolesGuard, Token};
use gantry_config::{CONFIG_TOKEN, GantryConfig};
use gantry_testing::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Cat {
    id: u32,
    name: String,
    age: u8,
}

#[derive(Debug, Deserialize)]
struct CreateCat {
    name: String,
    age: u8,
}

impl Validate for CreateCat {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        if self.name.trim().is_empty() {
            violations.push("name should not be empty".to_string());
        }
        if self.age > 30 {
            violations.push("age must not be greater than 30".to_string());
        }
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cat {0} not found")]
struct CatNotFound(u32);

#[derive(Default)]
struct CatRepository {
    cats: Mutex<Vec<Cat>>,
}

struct CatsService {
    repository: Arc<CatRepository>,
    config: Arc<GantryConfig>,
    lookups: AtomicUsize,
}

impl CatsService {
    fn create(&self, input: CreateCat) -> Cat {
        let mut cats = self.repository.cats.lock().unwrap();
        let cat = Cat {
            id: cats.len() as u32 + 1,
            name: input.name,
            age: input.age,
        };
        cats.push(cat.clone());
        cat
    }

    fn find_all(&self, limit: usize) -> Vec<Cat> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.repository.cats.lock().unwrap().iter().take(limit).cloned().collect()
    }

    fn find_one(&self, id: u32) -> Result<Cat, CatNotFound> {
        self.repository
            .cats
            .lock()
            .unwrap()
            .iter()
            .find(|cat| cat.id == id)
            .cloned()
            .ok_or(CatNotFound(id))
    }
}

fn resolver(token: &str) -> Option<Principal> {
    match token {
        "admin-token" => Some(Principal::new("admin").with_roles(["admin"])),
        "user-token" => Some(Principal::new("user").with_roles(["user"])),
        _ => None,
    }
}

fn modules(config: &GantryConfig) -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor::new("AppModule").import("CatsModule"),
        ModuleDescriptor::new("ConfigModule")
            .global()
            .provider(config.provider())
            .export(CONFIG_TOKEN),
        ModuleDescriptor::new("DatabaseModule")
            .provider(ProviderDescriptor::factory(
                "CatRepository",
                Vec::<Token>::new(),
                |_| Ok(CatRepository::default()),
            ))
            .export("CatRepository"),
        ModuleDescriptor::new("CatsModule")
            .import("DatabaseModule")
            .provider(ProviderDescriptor::factory(
                "CatsService",
                ["CatRepository", CONFIG_TOKEN],
                |deps| {
                    Ok(CatsService {
                        repository: deps.get("CatRepository")?,
                        config: deps.get(CONFIG_TOKEN)?,
                        lookups: AtomicUsize::new(0),
                    })
                },
            ))
            .export("CatsService"),
    ]
}

fn cats_controller(calls: &CallRecorder) -> ControllerDescriptor {
    ControllerDescriptor::new("CatsController", "CatsModule")
        .guard(AuthenticationGuard::new(resolver))
        .guard(RolesGuard::new())
        .interceptor(calls.interceptor("controller"))
        .filter(TypedFilter::new(|err: &CatNotFound, _| {
            Catch::Handled(error_response(404, err.to_string()))
        }))
        .handler(
            HandlerDescriptor::post(
                "create",
                handler_fn(|inv| async move {
                    let input: CreateCat = inv.args.parse(0)?;
                    let cats = inv.inject::<CatsService>("CatsService")?;
                    Reply::json(&cats.create(input))
                }),
            )
            .at("/cats")
            .inject("CatsService")
            .roles(["admin"])
            .param(ParamDescriptor::body().pipe(ValidationPipe::<CreateCat>::new())),
        )
        .handler(
            HandlerDescriptor::get(
                "findAll",
                handler_fn(|inv| async move {
                    let limit: usize = inv.args.parse(0)?;
                    let cats = inv.inject::<CatsService>("CatsService")?;
                    Reply::json(&cats.find_all(limit))
                }),
            )
            .at("/cats")
            .inject("CatsService")
            .public()
            .interceptor(CacheInterceptor::new(Duration::from_secs(60), 16))
            .param(
                ParamDescriptor::query("limit")
                    .pipe(DefaultValuePipe::new(10))
                    .pipe(ParseIntPipe),
            ),
        )
        .handler(
            HandlerDescriptor::get(
                "findOne",
                handler_fn(|inv| async move {
                    let id: u32 = inv.args.parse(0)?;
                    let cats = inv.inject::<CatsService>("CatsService")?;
                    cats.find_one(id).map_err(Error::custom).and_then(|cat| Reply::json(&cat))
                }),
            )
            .at("/cats/:id")
            .inject("CatsService")
            .param(ParamDescriptor::path("id").pipe(calls.pipe("id")).pipe(ParseIntPipe)),
        )
        .handler(
            HandlerDescriptor::get(
                "settings",
                handler_fn(|inv| async move {
                    let cats = inv.inject::<CatsService>("CatsService")?;
                    if cats.config.pipeline.production_mode {
                        return Ok(Reply::text("production"));
                    }
                    Err(Error::Internal("settings store unavailable".to_string()))
                }),
            )
            .public()
            .inject("CatsService"),
        )
        .handler(
            HandlerDescriptor::get(
                "slow",
                handler_fn(|_| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Reply::empty())
                }),
            )
            .public(),
        )
}

fn app_with(config: GantryConfig, calls: &CallRecorder) -> TestClient {
    Application::builder()
        .options(config.pipeline_options())
        .controller(cats_controller(calls))
        .global_interceptor(calls.interceptor("global"))
        .global_filter(ValidationExceptionFilter)
        .modules(modules(&config))
        .build()
        .unwrap()
        .into()
}

fn admin(request: TestRequest) -> TestRequest {
    request.bearer("admin-token")
}

#[tokio::test]
async fn test_create_then_fetch() {
    let calls = CallRecorder::new();
    let client = app_with(GantryConfig::default(), &calls);

    let created = client
        .call(
            "CatsController.create",
            admin(TestRequest::post("/cats")).json(&json!({"name": "Tom", "age": 3})),
        )
        .await;
    assert_status(&created, 201);
    assert_json_body(&created, &json!({"id": 1, "name": "Tom", "age": 3}));

    let fetched = client
        .call(
            "CatsController.findOne",
            admin(TestRequest::get("/cats/1")).param("id", "1"),
        )
        .await;
    assert_status(&fetched, 200);
    assert_eq!(fetched.body_json().unwrap()["name"], "Tom");
}

#[tokio::test]
async fn test_missing_cat_goes_through_typed_filter() {
    let calls = CallRecorder::new();
    let client = app_with(GantryConfig::default(), &calls);

    let response = client
        .call(
            "CatsController.findOne",
            admin(TestRequest::get("/cats/42")).param("id", "42"),
        )
        .await;
    assert_error_body(&response, 404, "cat 42 not found");
}

#[tokio::test]
async fn test_stage_order_around_handler() {
    let calls = CallRecorder::new();
    let client = app_with(GantryConfig::default(), &calls);

    client
        .call(
            "CatsController.findOne",
            admin(TestRequest::get("/cats/1")).param("id", "1"),
        )
        .await;

    assert_eq!(
        calls.calls(),
        vec!["global:pre", "controller:pre", "id", "controller:post", "global:post"]
    );
}

#[tokio::test]
async fn test_invalid_body_lists_violations() {
    let calls = CallRecorder::new();
    let client = app_with(GantryConfig::default(), &calls);

    let response = client
        .call(
            "CatsController.create",
            admin(TestRequest::post("/cats")).json(&json!({"name": " ", "age": 99})),
        )
        .await;
    assert_status(&response, 400);
    assert_eq!(
        response.body_json().unwrap()["message"],
        json!(["name should not be empty", "age must not be greater than 30"])
    );
    assert_eq!(
        calls.calls(),
        vec!["global:pre", "controller:pre", "controller:post", "global:post"]
    );
}

#[tokio::test]
async fn test_roles_and_authentication() {
    let calls = CallRecorder::new();
    let client = app_with(GantryConfig::default(), &calls);
    let body = json!({"name": "Tom", "age": 3});

    let as_user = client
        .call(
            "CatsController.create",
            TestRequest::post("/cats").bearer("user-token").json(&body),
        )
        .await;
    assert_error_body(&as_user, 403, "Forbidden resource");

    let anonymous = client
        .call("CatsController.create", TestRequest::post("/cats").json(&body))
        .await;
    assert_status(&anonymous, 401);

    let public = client.call("CatsController.findAll", TestRequest::get("/cats")).await;
    assert_status(&public, 200);
}

#[tokio::test]
async fn test_find_all_is_cached() {
    let calls = CallRecorder::new();
    let client = app_with(GantryConfig::default(), &calls);

    for _ in 0..3 {
        let response = client
            .call("CatsController.findAll", TestRequest::get("/cats").query("limit", "5"))
            .await;
        assert_json_body(&response, &json!([]));
    }

    let service = client.app().get::<CatsService>("CatsService").unwrap();
    assert_eq!(service.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_config_controls_error_detail() {
    let calls = CallRecorder::new();

    let config = GantryConfig::builder()
        .value(json!({"pipeline": {"production_mode": false}}))
        .build()
        .unwrap();
    let client = app_with(config, &calls);
    let response = client.call("CatsController.settings", TestRequest::get("/settings")).await;
    assert_error_body(&response, 500, "Internal server error: settings store unavailable");

    let production = app_with(GantryConfig::default(), &calls);
    let response = production
        .call("CatsController.settings", TestRequest::get("/settings"))
        .await;
    assert_status(&response, 200);
    assert_text_body(&response, "production");
}

#[tokio::test]
async fn test_disconnect_aborts_without_response() {
    let calls = CallRecorder::new();
    let client = app_with(GantryConfig::default(), &calls);

    let outcome = client
        .call_cancelled_after("CatsController.slow", TestRequest::get("/slow"), Duration::from_millis(20))
        .await;
    assert_aborted(&outcome);
}

#[tokio::test]
async fn test_graph_exposes_module_order() {
    let graph = ModuleGraph::build(modules(&GantryConfig::default())).unwrap();
    let order = graph.module_order();
    let position = |name: &str| order.iter().position(|m| m == name).unwrap();
    assert!(position("DatabaseModule") < position("CatsModule"));
    assert!(position("CatsModule") < position("AppModule"));
}
