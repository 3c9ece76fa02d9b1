//! Provider registry: the dependency injection container.
//!
//! Providers are declared up front as [`ProviderDescriptor`]s (token,
//! construction recipe, dependency tokens, lifetime). Building a
//! [`ProviderRegistry`] validates the whole graph before anything is
//! constructed:
//!
//! - every dependency token must be declared
//! - the graph must be acyclic
//! - a singleton may never depend on a per-request provider
//!
//! ```rust
//! use gantry_core::{ProviderDescriptor, ProviderRegistry};
//!
//! struct Database { url: String }
//! struct UserService { db: std::sync::Arc<Database> }
//!
//! let registry = ProviderRegistry::new(vec![
//!     ProviderDescriptor::value("db", Database { url: "mem://".into() }),
//!     ProviderDescriptor::factory("users", ["db"], |deps| {
//!         Ok(UserService { db: deps.get::<Database>("db")? })
//!     }),
//! ])
//! .unwrap();
//!
//! let users = registry.resolve_as::<UserService>(&"users".into(), None).unwrap();
//! assert_eq!(users.db.url, "mem://");
//! ```

use crate::Error;
use crate::logging::{debug, trace};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Type-erased provider instance
pub type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&Dependencies) -> Result<Instance, Error> + Send + Sync>;

/// Identity of a provider
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(Arc<str>);

impl Token {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Token named after a Rust type
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&Token> for Token {
    fn from(token: &Token) -> Self {
        token.clone()
    }
}

/// How long a constructed instance lives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// Constructed once, shared for the life of the process
    Singleton,
    /// Constructed once per request, dropped with the request
    PerRequest,
}

/// Construction recipe for one provider
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub token: Token,
    pub dependencies: Vec<Token>,
    pub lifetime: Lifetime,
    factory: Factory,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("token", &self.token)
            .field("dependencies", &self.dependencies)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl ProviderDescriptor {
    /// Create a descriptor from an already type-erased factory
    pub fn new<F>(
        token: impl Into<Token>,
        lifetime: Lifetime,
        dependencies: impl IntoIterator<Item = impl Into<Token>>,
        factory: F,
    ) -> Self
    where
        F: Fn(&Dependencies) -> Result<Instance, Error> + Send + Sync + 'static,
    {
        Self {
            token: token.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            lifetime,
            factory: Arc::new(factory),
        }
    }

    /// A singleton backed by a pre-built value
    pub fn value<T: Send + Sync + 'static>(token: impl Into<Token>, value: T) -> Self {
        let instance: Instance = Arc::new(value);
        Self::new(token, Lifetime::Singleton, Vec::<Token>::new(), move |_| {
            Ok(instance.clone())
        })
    }

    /// A singleton built from its dependencies on first resolution
    pub fn factory<T, F>(
        token: impl Into<Token>,
        dependencies: impl IntoIterator<Item = impl Into<Token>>,
        factory: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Dependencies) -> Result<T, Error> + Send + Sync + 'static,
    {
        Self::new(token, Lifetime::Singleton, dependencies, move |deps| {
            Ok(Arc::new(factory(deps)?) as Instance)
        })
    }

    /// A per-request provider built fresh for each request scope
    pub fn scoped<T, F>(
        token: impl Into<Token>,
        dependencies: impl IntoIterator<Item = impl Into<Token>>,
        factory: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Dependencies) -> Result<T, Error> + Send + Sync + 'static,
    {
        Self::new(token, Lifetime::PerRequest, dependencies, move |deps| {
            Ok(Arc::new(factory(deps)?) as Instance)
        })
    }
}

/// Resolved dependencies handed to a provider factory, in declared order
pub struct Dependencies {
    resolved: Vec<(Token, Instance)>,
}

impl Dependencies {
    /// Typed access to a dependency by token
    pub fn get<T: Send + Sync + 'static>(&self, token: impl Into<Token>) -> Result<Arc<T>, Error> {
        let token = token.into();
        let instance = self
            .resolved
            .iter()
            .find(|(candidate, _)| *candidate == token)
            .map(|(_, instance)| instance.clone())
            .ok_or_else(|| {
                Error::UnresolvedDependency(format!("'{}' is not a declared dependency", token))
            })?;
        downcast(&token, instance)
    }

    /// Typed access to a dependency by declared position
    pub fn at<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, Error> {
        let (token, instance) = self.resolved.get(index).ok_or_else(|| {
            Error::UnresolvedDependency(format!("no dependency at position {}", index))
        })?;
        downcast(token, instance.clone())
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(
    token: &Token,
    instance: Instance,
) -> Result<Arc<T>, Error> {
    instance.downcast::<T>().map_err(|_| {
        Error::UnresolvedDependency(format!(
            "provider '{}' is not of type {}",
            token,
            std::any::type_name::<T>()
        ))
    })
}

/// Per-request provider instances
///
/// Owned by the request context and dropped when the pipeline finishes,
/// which releases every per-request instance built during the request.
#[derive(Default)]
pub struct RequestScope {
    instances: Mutex<HashMap<Token, Instance>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, token: &Token) -> Option<Instance> {
        self.instances.lock().get(token).cloned()
    }

    // First insert wins so repeated resolution inside a request is idempotent.
    fn insert(&self, token: Token, instance: Instance) -> Instance {
        self.instances.lock().entry(token).or_insert(instance).clone()
    }

    /// Number of per-request instances held by this scope
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        let count = self.instances.get_mut().len();
        if count > 0 {
            trace!(instances = count, "Releasing per-request providers");
        }
    }
}

/// Validated provider graph with memoized singletons
pub struct ProviderRegistry {
    descriptors: HashMap<Token, ProviderDescriptor>,
    order: Vec<Token>,
    singletons: HashMap<Token, OnceCell<Instance>>,
    constructions: HashMap<Token, AtomicUsize>,
}

impl ProviderRegistry {
    /// Build and validate a registry from provider descriptors
    pub fn new(providers: impl IntoIterator<Item = ProviderDescriptor>) -> Result<Self, Error> {
        let mut descriptors = HashMap::new();
        let mut declared = Vec::new();

        for provider in providers {
            if descriptors.contains_key(&provider.token) {
                return Err(Error::DuplicateProvider(provider.token.to_string()));
            }
            trace!(provider = %provider.token, lifetime = ?provider.lifetime, "Declaring provider");
            declared.push(provider.token.clone());
            descriptors.insert(provider.token.clone(), provider);
        }

        for token in &declared {
            for dependency in &descriptors[token].dependencies {
                if !descriptors.contains_key(dependency) {
                    return Err(Error::UnresolvedDependency(format!(
                        "'{}' depends on undeclared provider '{}'",
                        token, dependency
                    )));
                }
            }
        }

        let order = topological_order(&declared, &descriptors)?;
        check_scopes(&declared, &descriptors)?;

        let singletons = declared
            .iter()
            .filter(|token| descriptors[*token].lifetime == Lifetime::Singleton)
            .map(|token| (token.clone(), OnceCell::new()))
            .collect();
        let constructions = declared
            .iter()
            .map(|token| (token.clone(), AtomicUsize::new(0)))
            .collect();

        debug!(provider_count = declared.len(), "Provider registry validated");

        Ok(Self {
            descriptors,
            order,
            singletons,
            constructions,
        })
    }

    /// Whether a token is declared
    pub fn has(&self, token: &Token) -> bool {
        self.descriptors.contains_key(token)
    }

    /// Look up a provider descriptor
    pub fn descriptor(&self, token: &Token) -> Option<&ProviderDescriptor> {
        self.descriptors.get(token)
    }

    /// Topological construction order; independent providers keep
    /// declaration order
    pub fn construction_order(&self) -> &[Token] {
        &self.order
    }

    /// How many times the provider's factory has run
    pub fn construction_count(&self, token: &Token) -> usize {
        self.constructions
            .get(token)
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Construct every singleton in topological order
    pub fn instantiate_singletons(&self) -> Result<(), Error> {
        for token in &self.order {
            if self.descriptors[token].lifetime == Lifetime::Singleton {
                self.resolve(token, None)?;
            }
        }
        debug!(singletons = self.singletons.len(), "Singletons instantiated");
        Ok(())
    }

    /// Resolve a provider instance
    ///
    /// Per-request providers require a scope; singletons ignore it.
    pub fn resolve(&self, token: &Token, scope: Option<&RequestScope>) -> Result<Instance, Error> {
        let mut visiting = Vec::new();
        self.resolve_inner(token, scope, &mut visiting)
    }

    /// Resolve and downcast a provider instance
    pub fn resolve_as<T: Send + Sync + 'static>(
        &self,
        token: &Token,
        scope: Option<&RequestScope>,
    ) -> Result<Arc<T>, Error> {
        downcast(token, self.resolve(token, scope)?)
    }

    fn resolve_inner(
        &self,
        token: &Token,
        scope: Option<&RequestScope>,
        visiting: &mut Vec<Token>,
    ) -> Result<Instance, Error> {
        let descriptor = self.descriptors.get(token).ok_or_else(|| {
            Error::UnresolvedDependency(format!("provider '{}' is not declared", token))
        })?;

        if visiting.contains(token) {
            let mut path: Vec<String> = visiting.iter().map(Token::to_string).collect();
            path.push(token.to_string());
            return Err(Error::DependencyCycle(path));
        }

        match descriptor.lifetime {
            Lifetime::Singleton => {
                let cell = &self.singletons[token];
                if let Some(instance) = cell.get() {
                    return Ok(instance.clone());
                }
                visiting.push(token.clone());
                let result = cell
                    .get_or_try_init(|| self.construct(descriptor, None, visiting))
                    .cloned();
                visiting.pop();
                result
            }
            Lifetime::PerRequest => {
                let scope = scope.ok_or_else(|| {
                    Error::UnresolvedDependency(format!(
                        "per-request provider '{}' resolved outside a request",
                        token
                    ))
                })?;
                if let Some(instance) = scope.get(token) {
                    return Ok(instance);
                }
                visiting.push(token.clone());
                let result = self.construct(descriptor, Some(scope), visiting);
                visiting.pop();
                Ok(scope.insert(token.clone(), result?))
            }
        }
    }

    fn construct(
        &self,
        descriptor: &ProviderDescriptor,
        scope: Option<&RequestScope>,
        visiting: &mut Vec<Token>,
    ) -> Result<Instance, Error> {
        let mut resolved = Vec::with_capacity(descriptor.dependencies.len());
        for dependency in &descriptor.dependencies {
            let instance = self.resolve_inner(dependency, scope, visiting)?;
            resolved.push((dependency.clone(), instance));
        }

        let instance = (descriptor.factory)(&Dependencies { resolved })?;
        if let Some(count) = self.constructions.get(&descriptor.token) {
            count.fetch_add(1, Ordering::SeqCst);
        }
        debug!(provider = %descriptor.token, lifetime = ?descriptor.lifetime, "Provider constructed");
        Ok(instance)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("order", &self.order)
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

// Depth-first post-order walk; roots and edges are visited in declaration
// order so the resulting order is deterministic.
fn topological_order(
    declared: &[Token],
    descriptors: &HashMap<Token, ProviderDescriptor>,
) -> Result<Vec<Token>, Error> {
    fn visit(
        token: &Token,
        descriptors: &HashMap<Token, ProviderDescriptor>,
        marks: &mut HashMap<Token, Mark>,
        stack: &mut Vec<Token>,
        order: &mut Vec<Token>,
    ) -> Result<(), Error> {
        match marks.get(token) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|t| t == token).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(Token::to_string).collect();
                path.push(token.to_string());
                return Err(Error::DependencyCycle(path));
            }
            None => {}
        }

        marks.insert(token.clone(), Mark::Visiting);
        stack.push(token.clone());
        for dependency in &descriptors[token].dependencies {
            visit(dependency, descriptors, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(token.clone(), Mark::Done);
        order.push(token.clone());
        Ok(())
    }

    let mut marks = HashMap::with_capacity(declared.len());
    let mut order = Vec::with_capacity(declared.len());
    let mut stack = Vec::new();
    for token in declared {
        visit(token, descriptors, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

// Any singleton -> ... -> per-request chain contains a direct
// singleton -> per-request edge, but the error names the outermost
// singleton so the report points at the declaration to fix.
fn check_scopes(
    declared: &[Token],
    descriptors: &HashMap<Token, ProviderDescriptor>,
) -> Result<(), Error> {
    fn find_scoped(
        token: &Token,
        descriptors: &HashMap<Token, ProviderDescriptor>,
        seen: &mut HashSet<Token>,
    ) -> Option<Token> {
        for dependency in &descriptors[token].dependencies {
            if !seen.insert(dependency.clone()) {
                continue;
            }
            if descriptors[dependency].lifetime == Lifetime::PerRequest {
                return Some(dependency.clone());
            }
            if let Some(found) = find_scoped(dependency, descriptors, seen) {
                return Some(found);
            }
        }
        None
    }

    for token in declared {
        if descriptors[token].lifetime != Lifetime::Singleton {
            continue;
        }
        let mut seen = HashSet::new();
        if let Some(scoped) = find_scoped(token, descriptors, &mut seen) {
            return Err(Error::ScopeMismatch {
                singleton: token.to_string(),
                scoped: scoped.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Config {
        name: &'static str,
    }

    struct Repo {
        config: Arc<Config>,
    }

    #[test]
    fn test_resolve_with_dependency() {
        let registry = ProviderRegistry::new(vec![
            ProviderDescriptor::value("config", Config { name: "test" }),
            ProviderDescriptor::factory("repo", ["config"], |deps| {
                Ok(Repo {
                    config: deps.get("config")?,
                })
            }),
        ])
        .unwrap();

        let repo = registry.resolve_as::<Repo>(&"repo".into(), None).unwrap();
        assert_eq!(repo.config.name, "test");
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let result = ProviderRegistry::new(vec![
            ProviderDescriptor::value("config", 1u32),
            ProviderDescriptor::value("config", 2u32),
        ]);
        assert!(matches!(result, Err(Error::DuplicateProvider(_))));
    }

    #[test]
    fn test_undeclared_dependency() {
        let result = ProviderRegistry::new(vec![ProviderDescriptor::factory(
            "repo",
            ["missing"],
            |_| Ok(0u8),
        )]);
        assert!(matches!(result, Err(Error::UnresolvedDependency(_))));
    }

    #[test]
    fn test_cycle_path_reported() {
        let result = ProviderRegistry::new(vec![
            ProviderDescriptor::factory("a", ["b"], |_| Ok(0u8)),
            ProviderDescriptor::factory("b", ["c"], |_| Ok(0u8)),
            ProviderDescriptor::factory("c", ["a"], |_| Ok(0u8)),
        ]);
        match result {
            Err(Error::DependencyCycle(path)) => {
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_wrong_type_downcast() {
        let registry = ProviderRegistry::new(vec![ProviderDescriptor::value("n", 5u32)]).unwrap();
        let result = registry.resolve_as::<String>(&"n".into(), None);
        assert!(matches!(result, Err(Error::UnresolvedDependency(_))));
    }

    #[test]
    fn test_scoped_requires_scope() {
        let registry =
            ProviderRegistry::new(vec![ProviderDescriptor::scoped("req", Vec::<Token>::new(), |_| {
                Ok(0u8)
            })])
            .unwrap();
        assert!(registry.resolve(&"req".into(), None).is_err());

        let scope = RequestScope::new();
        let first = registry.resolve(&"req".into(), Some(&scope)).unwrap();
        let second = registry.resolve(&"req".into(), Some(&scope)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn test_token_of_type() {
        assert_eq!(Token::of::<Config>().as_str(), std::any::type_name::<Config>());
    }
}
