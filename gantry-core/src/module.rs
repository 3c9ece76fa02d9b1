//! Module graph for organizing providers and controlling visibility.
//!
//! A module owns providers, exports some of their tokens, and imports other
//! modules by name. The graph is built once at startup:
//!
//! - import edges must form a DAG (otherwise [`Error::ModuleCycle`])
//! - a module sees its own providers, the exports of the modules it
//!   imports, and the exports of every global module
//! - a module may re-export tokens it sees through an import, or forward
//!   every export of an imported module with [`ModuleDescriptor::re_export`]
//! - every provider's dependencies must be visible to its owning module
//!
//! ```rust
//! use gantry_core::{ModuleDescriptor, ModuleGraph, ProviderDescriptor};
//!
//! let database = ModuleDescriptor::new("DatabaseModule")
//!     .provider(ProviderDescriptor::value("db", "postgres://".to_string()))
//!     .export("db");
//!
//! let users = ModuleDescriptor::new("UsersModule")
//!     .import("DatabaseModule")
//!     .provider(ProviderDescriptor::factory("users", ["db"], |deps| {
//!         deps.get::<String>("db").map(|url| url.len())
//!     }));
//!
//! let graph = ModuleGraph::build(vec![database, users]).unwrap();
//! assert!(graph.is_visible("UsersModule", &"db".into()));
//! assert!(!graph.is_visible("DatabaseModule", &"users".into()));
//! ```

use crate::container::downcast;
use crate::logging::{debug, trace};
use crate::{Error, ProviderDescriptor, ProviderRegistry, RequestScope, Token};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Declaration of one module
#[derive(Debug, Clone, Default)]
pub struct ModuleDescriptor {
    pub name: String,
    pub providers: Vec<ProviderDescriptor>,
    pub exports: Vec<Token>,
    pub imports: Vec<String>,
    pub re_exports: Vec<String>,
    pub global: bool,
    export_all: bool,
}

impl ModuleDescriptor {
    /// Create a new module with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a provider
    pub fn provider(mut self, provider: ProviderDescriptor) -> Self {
        self.providers.push(provider);
        self
    }

    /// Add multiple providers
    pub fn providers(mut self, providers: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Export a provider token
    pub fn export(mut self, token: impl Into<Token>) -> Self {
        self.exports.push(token.into());
        self
    }

    /// Export every provider this module owns
    pub fn export_all(mut self) -> Self {
        self.export_all = true;
        self
    }

    /// Import another module by name
    pub fn import(mut self, module: impl Into<String>) -> Self {
        self.imports.push(module.into());
        self
    }

    /// Forward every export of an imported module
    pub fn re_export(mut self, module: impl Into<String>) -> Self {
        self.re_exports.push(module.into());
        self
    }

    /// Make this module's exports visible everywhere without importing
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    fn declared_exports(&self) -> Vec<Token> {
        let mut exports = self.exports.clone();
        if self.export_all {
            exports.extend(self.providers.iter().map(|p| p.token.clone()));
        }
        exports
    }
}

/// Immutable module graph with the provider registry it owns
pub struct ModuleGraph {
    registry: ProviderRegistry,
    visibility: HashMap<String, HashSet<Token>>,
    exports: HashMap<String, HashSet<Token>>,
    owners: HashMap<Token, String>,
    order: Vec<String>,
}

impl ModuleGraph {
    /// Validate the modules and compute per-module visibility
    pub fn build(modules: Vec<ModuleDescriptor>) -> Result<Self, Error> {
        let mut by_name: HashMap<String, ModuleDescriptor> = HashMap::new();
        let mut declared = Vec::with_capacity(modules.len());
        for module in modules {
            if by_name.contains_key(&module.name) {
                return Err(Error::Configuration(format!(
                    "module '{}' is declared twice",
                    module.name
                )));
            }
            declared.push(module.name.clone());
            by_name.insert(module.name.clone(), module);
        }

        for name in &declared {
            let module = &by_name[name];
            for import in module.imports.iter().chain(&module.re_exports) {
                if !by_name.contains_key(import) {
                    return Err(Error::UnresolvedDependency(format!(
                        "module '{}' imports unknown module '{}'",
                        name, import
                    )));
                }
            }
            for forwarded in &module.re_exports {
                if !module.imports.contains(forwarded) {
                    return Err(Error::UnresolvedDependency(format!(
                        "module '{}' re-exports '{}' without importing it",
                        name, forwarded
                    )));
                }
            }
        }

        let order = import_order(&declared, &by_name)?;

        let mut owners = HashMap::new();
        for name in &order {
            for provider in &by_name[name].providers {
                if owners.insert(provider.token.clone(), name.clone()).is_some() {
                    return Err(Error::DuplicateProvider(provider.token.to_string()));
                }
            }
        }

        let global_modules: Vec<&String> = order.iter().filter(|n| by_name[*n].global).collect();

        // Imports precede importers in `order`, so every imported module's
        // export set is final by the time it is read.
        let mut exports: HashMap<String, HashSet<Token>> = HashMap::new();
        let mut visibility: HashMap<String, HashSet<Token>> = HashMap::new();
        for name in &order {
            let module = &by_name[name];
            let mut visible: HashSet<Token> =
                module.providers.iter().map(|p| p.token.clone()).collect();
            for import in &module.imports {
                visible.extend(exports[import].iter().cloned());
            }
            for global in &global_modules {
                if *global != name {
                    if let Some(global_exports) = exports.get(*global) {
                        visible.extend(global_exports.iter().cloned());
                    }
                }
            }

            let mut exported = HashSet::new();
            for token in module.declared_exports() {
                if !visible.contains(&token) {
                    return Err(Error::UnresolvedDependency(format!(
                        "module '{}' exports '{}' which it neither owns nor imports",
                        name, token
                    )));
                }
                exported.insert(token);
            }
            for forwarded in &module.re_exports {
                exported.extend(exports[forwarded].iter().cloned());
            }

            trace!(module = %name, visible = visible.len(), exported = exported.len(), "Module visibility computed");
            exports.insert(name.clone(), exported);
            visibility.insert(name.clone(), visible);
        }

        // Global exports declared later in the order are visible to modules
        // processed earlier; fold them in now that every export set is known.
        for name in &order {
            for global in &global_modules {
                if *global != name {
                    let global_exports = exports[*global].clone();
                    if let Some(visible) = visibility.get_mut(name) {
                        visible.extend(global_exports);
                    }
                }
            }
        }

        for name in &order {
            let visible = &visibility[name];
            for provider in &by_name[name].providers {
                for dependency in &provider.dependencies {
                    if !visible.contains(dependency) {
                        return Err(Error::UnresolvedDependency(format!(
                            "provider '{}' in module '{}' depends on '{}', which is not visible there",
                            provider.token, name, dependency
                        )));
                    }
                }
            }
        }

        let mut providers = Vec::new();
        for name in &order {
            if let Some(module) = by_name.remove(name) {
                providers.extend(module.providers);
            }
        }
        let registry = ProviderRegistry::new(providers)?;

        debug!(modules = order.len(), "Module graph built");

        Ok(Self {
            registry,
            visibility,
            exports,
            owners,
            order,
        })
    }

    /// The provider registry backing this graph
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Mapping from module name to the tokens resolvable inside it
    pub fn visibility(&self) -> &HashMap<String, HashSet<Token>> {
        &self.visibility
    }

    /// Tokens a module exports, including re-exports
    pub fn exports_of(&self, module: &str) -> Option<&HashSet<Token>> {
        self.exports.get(module)
    }

    /// The module that owns a provider
    pub fn owner_of(&self, token: &Token) -> Option<&str> {
        self.owners.get(token).map(String::as_str)
    }

    /// Module names with imports ordered before importers
    pub fn module_order(&self) -> &[String] {
        &self.order
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.visibility.contains_key(module)
    }

    /// Whether `token` is resolvable from `module`
    pub fn is_visible(&self, module: &str, token: &Token) -> bool {
        self.visibility
            .get(module)
            .map(|tokens| tokens.contains(token))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("order", &self.order)
            .finish()
    }
}

fn import_order(
    declared: &[String],
    modules: &HashMap<String, ModuleDescriptor>,
) -> Result<Vec<String>, Error> {
    fn visit(
        name: &String,
        modules: &HashMap<String, ModuleDescriptor>,
        done: &mut HashSet<String>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<(), Error> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = stack.iter().position(|n| n == name) {
            let mut path = stack[start..].to_vec();
            path.push(name.clone());
            return Err(Error::ModuleCycle(path));
        }

        stack.push(name.clone());
        for import in &modules[name].imports {
            visit(import, modules, done, stack, order)?;
        }
        stack.pop();
        done.insert(name.clone());
        order.push(name.clone());
        Ok(())
    }

    let mut done = HashSet::new();
    let mut order = Vec::with_capacity(declared.len());
    let mut stack = Vec::new();
    for name in declared {
        visit(name, modules, &mut done, &mut stack, &mut order)?;
    }
    Ok(order)
}

/// Resolves providers on behalf of one handler within one request
///
/// Only tokens visible to the handler's module, plus tokens injected
/// explicitly on the handler, are resolvable.
#[derive(Clone)]
pub struct Injector {
    graph: Arc<ModuleGraph>,
    module: Arc<str>,
    extra: Arc<[Token]>,
    scope: Arc<RequestScope>,
}

impl Injector {
    pub fn new(
        graph: Arc<ModuleGraph>,
        module: impl Into<Arc<str>>,
        extra: Arc<[Token]>,
        scope: Arc<RequestScope>,
    ) -> Self {
        Self {
            graph,
            module: module.into(),
            extra,
            scope,
        }
    }

    /// Module the injector resolves on behalf of
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn can_resolve(&self, token: &Token) -> bool {
        self.graph.is_visible(&self.module, token) || self.extra.contains(token)
    }

    /// Resolve a typed provider instance
    pub fn get<T: Send + Sync + 'static>(&self, token: impl Into<Token>) -> Result<Arc<T>, Error> {
        let token = token.into();
        if !self.can_resolve(&token) {
            return Err(Error::UnresolvedDependency(format!(
                "'{}' is not visible to module '{}'",
                token, self.module
            )));
        }
        let instance = self.graph.registry().resolve(&token, Some(&self.scope))?;
        downcast(&token, instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, token: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(name)
            .provider(ProviderDescriptor::value(token, token.to_string()))
            .export(token)
    }

    #[test]
    fn test_unexported_provider_hidden() {
        let graph = ModuleGraph::build(vec![
            ModuleDescriptor::new("Data").provider(ProviderDescriptor::value("secret", 1u8)),
            ModuleDescriptor::new("App").import("Data"),
        ])
        .unwrap();
        assert!(graph.is_visible("Data", &"secret".into()));
        assert!(!graph.is_visible("App", &"secret".into()));
    }

    #[test]
    fn test_exports_are_not_transitive_without_reexport() {
        let graph = ModuleGraph::build(vec![
            leaf("Core", "clock"),
            ModuleDescriptor::new("Shared").import("Core"),
            ModuleDescriptor::new("App").import("Shared"),
        ])
        .unwrap();
        assert!(graph.is_visible("Shared", &"clock".into()));
        assert!(!graph.is_visible("App", &"clock".into()));
    }

    #[test]
    fn test_reexport_forwards_tokens() {
        let graph = ModuleGraph::build(vec![
            leaf("Core", "clock"),
            ModuleDescriptor::new("Shared").import("Core").re_export("Core"),
            ModuleDescriptor::new("App").import("Shared"),
        ])
        .unwrap();
        assert!(graph.is_visible("App", &"clock".into()));
    }

    #[test]
    fn test_token_reexport() {
        let graph = ModuleGraph::build(vec![
            leaf("Core", "clock"),
            ModuleDescriptor::new("Shared").import("Core").export("clock"),
            ModuleDescriptor::new("App").import("Shared"),
        ])
        .unwrap();
        assert!(graph.is_visible("App", &"clock".into()));
    }

    #[test]
    fn test_global_module_visible_everywhere() {
        let graph = ModuleGraph::build(vec![
            ModuleDescriptor::new("App"),
            leaf("Config", "config").global(),
        ])
        .unwrap();
        assert!(graph.is_visible("App", &"config".into()));
    }

    #[test]
    fn test_import_cycle() {
        let result = ModuleGraph::build(vec![
            ModuleDescriptor::new("A").import("B"),
            ModuleDescriptor::new("B").import("A"),
        ]);
        match result {
            Err(Error::ModuleCycle(path)) => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("expected module cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invisible_provider_dependency_rejected() {
        let result = ModuleGraph::build(vec![
            ModuleDescriptor::new("Data").provider(ProviderDescriptor::value("db", 1u8)),
            ModuleDescriptor::new("Users")
                .import("Data")
                .provider(ProviderDescriptor::factory("users", ["db"], |_| Ok(0u8))),
        ]);
        assert!(matches!(result, Err(Error::UnresolvedDependency(_))));
    }

    #[test]
    fn test_export_of_foreign_token_rejected() {
        let result = ModuleGraph::build(vec![ModuleDescriptor::new("App").export("nothing")]);
        assert!(matches!(result, Err(Error::UnresolvedDependency(_))));
    }

    #[test]
    fn test_injector_enforces_visibility() {
        let graph = Arc::new(
            ModuleGraph::build(vec![
                ModuleDescriptor::new("Data")
                    .provider(ProviderDescriptor::value("db", 7u32))
                    .provider(ProviderDescriptor::value("internal", 9u32))
                    .export("db"),
                ModuleDescriptor::new("App").import("Data"),
            ])
            .unwrap(),
        );
        let scope = Arc::new(RequestScope::new());
        let injector = Injector::new(graph.clone(), "App", Arc::from(Vec::new()), scope.clone());
        assert_eq!(*injector.get::<u32>("db").unwrap(), 7);
        assert!(injector.get::<u32>("internal").is_err());

        let widened = Injector::new(graph, "App", Arc::from(vec![Token::from("internal")]), scope);
        assert_eq!(*widened.get::<u32>("internal").unwrap(), 9);
    }
}
