//! Route registry and namespace multiplexer.
//!
//! ## Lifecycle
//!
//! ```text
//! RouteRegistry (REGISTERED) ──seal()──→ RouteTable (ACTIVE, immutable)
//! ```
//!
//! Routes are registered once, single-threaded, at startup. A route may carry
//! a legacy alias (e.g. `/legacy/samples` for `/samples`); both paths point at
//! the *same* `Arc<GuardedHandler>`, so a handler or guard change is visible
//! on both trees.
//!
//! ## Conflicts
//!
//! Two registrations conflict when they have the same verb and the same path
//! shape (literal segments plus placeholder types; names are ignored). A
//! conflict, including one introduced by an alias, is a fatal
//! `ROUTE_CONFLICT`. The outcome does not depend on registration order.
//!
//! ## Lookup
//!
//! Templates are compiled into a segment trie at registration. Lookup walks
//! the request path once, preferring literal children, then `int`, then `str`
//! placeholders, backtracking only on dead ends.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::gate::{
    GatewayRequest, GatewayResponse, GuardChain, GuardedHandler, Handler, RequestGate, RouteInfo,
};
use crate::policy::{split_path, ParamKind, PathParams, PathPattern, PatternError, Segment};
use crate::types::Verb;

/// Default mount point of the legacy tree.
pub const DEFAULT_LEGACY_PREFIX: &str = "/legacy";

/// Startup errors raised by the registry. All are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// (path shape, verb) already registered.
    #[error("Route conflict: {verb} {path} collides with {verb} {existing}")]
    RouteConflict {
        /// Verb of both registrations.
        verb: Verb,
        /// Template being registered.
        path: String,
        /// Template already registered.
        existing: String,
    },

    /// Template does not compile.
    #[error("Invalid route template {path}: {source}")]
    InvalidPattern {
        /// Offending template.
        path: String,
        /// Pattern error.
        #[source]
        source: PatternError,
    },

    /// Legacy alias captures different placeholders than its primary.
    #[error("Legacy alias {alias} must capture the same placeholders as {path}")]
    AliasParamMismatch {
        /// Primary template.
        path: String,
        /// Alias template.
        alias: String,
    },
}

impl RegistryError {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RouteConflict { .. } => "ROUTE_CONFLICT",
            Self::InvalidPattern { .. } => "INVALID_ROUTE_TEMPLATE",
            Self::AliasParamMismatch { .. } => "ALIAS_PARAM_MISMATCH",
        }
    }
}

/// Lifecycle state of a route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteState {
    /// Registered, table not yet sealed.
    Registered,
    /// Sealed and serving traffic.
    Active,
}

/// Introspection record for one (path, verb) mapping.
#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    /// Template of this mapping.
    pub path: String,
    /// Verb.
    pub verb: Verb,
    /// Primary template when this mapping is a legacy alias.
    pub alias_of: Option<String>,
    /// Guard stages.
    pub chain: GuardChain,
    /// Lifecycle state.
    pub state: RouteState,
}

struct CompiledRoute {
    primary: PathPattern,
    guarded: Arc<GuardedHandler>,
}

struct Endpoint {
    template: PathPattern,
    legacy: bool,
    route: Arc<CompiledRoute>,
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    int_child: Option<Box<Node>>,
    str_child: Option<Box<Node>>,
    endpoints: HashMap<Verb, Endpoint>,
}

impl Node {
    fn child_mut(&mut self, segment: &Segment) -> &mut Node {
        match segment {
            Segment::Literal(text) => self.literals.entry(text.clone()).or_default(),
            Segment::Param { kind: ParamKind::Int, .. } => self.int_child.get_or_insert_with(Box::default).as_mut(),
            Segment::Param { kind: ParamKind::Str, .. } => self.str_child.get_or_insert_with(Box::default).as_mut(),
        }
    }

    fn child(&self, segment: &Segment) -> Option<&Node> {
        match segment {
            Segment::Literal(text) => self.literals.get(text),
            Segment::Param { kind: ParamKind::Int, .. } => self.int_child.as_deref(),
            Segment::Param { kind: ParamKind::Str, .. } => self.str_child.as_deref(),
        }
    }

    fn existing(&self, pattern: &PathPattern, verb: Verb) -> Option<&Endpoint> {
        let mut node = self;
        for segment in pattern.segments() {
            node = node.child(segment)?;
        }
        node.endpoints.get(&verb)
    }

    fn insert(&mut self, endpoint: Endpoint, verb: Verb) {
        let mut node = self;
        for segment in endpoint.template.segments() {
            node = node.child_mut(segment);
        }
        node.endpoints.insert(verb, endpoint);
    }

    /// Find the node for `segments` whose endpoints satisfy `accept`.
    fn find<'a, 'p>(
        &'a self,
        segments: &[&'p str],
        captured: &mut Vec<&'p str>,
        accept: &dyn Fn(&Node) -> bool,
    ) -> Option<&'a Node> {
        let Some((head, rest)) = segments.split_first() else {
            return accept(self).then_some(self);
        };

        if let Some(child) = self.literals.get(*head) {
            if let Some(found) = child.find(rest, captured, accept) {
                return Some(found);
            }
        }
        let typed = [
            (self.int_child.as_deref(), ParamKind::Int),
            (self.str_child.as_deref(), ParamKind::Str),
        ];
        for (child, kind) in typed {
            let Some(child) = child else { continue };
            if !kind.accepts(head) {
                continue;
            }
            captured.push(*head);
            if let Some(found) = child.find(rest, captured, accept) {
                return Some(found);
            }
            captured.pop();
        }
        None
    }
}

/// Route registry under construction.
pub struct RouteRegistry {
    root: Node,
    entries: Vec<RouteEntry>,
    legacy_prefix: Option<PathPattern>,
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(path: &str) -> Result<PathPattern, RegistryError> {
    PathPattern::parse(path).map_err(|source| RegistryError::InvalidPattern {
        path: path.to_string(),
        source,
    })
}

impl RouteRegistry {
    /// Registry with no legacy tree.
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            entries: Vec::new(),
            legacy_prefix: None,
        }
    }

    /// Registry whose namespaces are mirrored under `prefix`.
    pub fn with_legacy_prefix(prefix: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            legacy_prefix: Some(compile(prefix)?),
            ..Self::new()
        })
    }

    /// Configured legacy prefix, if any.
    pub fn legacy_prefix(&self) -> Option<&PathPattern> {
        self.legacy_prefix.as_ref()
    }

    /// Register `handler` for `verb` on `path`, optionally aliased at `legacy_path`.
    ///
    /// Either both mappings are inserted or neither is.
    pub fn register(
        &mut self,
        path: &str,
        verb: Verb,
        handler: Arc<dyn Handler>,
        chain: GuardChain,
        legacy_path: Option<&str>,
    ) -> Result<(), RegistryError> {
        let primary = compile(path)?;
        let alias = legacy_path.map(compile).transpose()?;
        self.insert(primary, alias, verb, handler, chain)
    }

    fn insert(
        &mut self,
        primary: PathPattern,
        alias: Option<PathPattern>,
        verb: Verb,
        handler: Arc<dyn Handler>,
        chain: GuardChain,
    ) -> Result<(), RegistryError> {
        self.ensure_free(&primary, verb)?;
        if let Some(alias) = &alias {
            self.ensure_free(alias, verb)?;
            if alias.shape() == primary.shape() {
                return Err(RegistryError::RouteConflict {
                    verb,
                    path: alias.to_string(),
                    existing: primary.to_string(),
                });
            }
            let mut primary_names: Vec<_> = primary.param_names().collect();
            let mut alias_names: Vec<_> = alias.param_names().collect();
            primary_names.sort_unstable();
            alias_names.sort_unstable();
            if primary_names != alias_names {
                return Err(RegistryError::AliasParamMismatch {
                    path: primary.to_string(),
                    alias: alias.to_string(),
                });
            }
        }

        let route = Arc::new(CompiledRoute {
            primary: primary.clone(),
            guarded: Arc::new(GuardedHandler::new(chain.clone(), handler)),
        });

        self.entries.push(RouteEntry {
            path: primary.to_string(),
            verb,
            alias_of: None,
            chain: chain.clone(),
            state: RouteState::Registered,
        });
        self.root.insert(
            Endpoint {
                template: primary.clone(),
                legacy: false,
                route: Arc::clone(&route),
            },
            verb,
        );

        if let Some(alias) = alias {
            self.entries.push(RouteEntry {
                path: alias.to_string(),
                verb,
                alias_of: Some(primary.to_string()),
                chain,
                state: RouteState::Registered,
            });
            self.root.insert(
                Endpoint {
                    template: alias,
                    legacy: true,
                    route,
                },
                verb,
            );
        }
        Ok(())
    }

    fn ensure_free(&self, pattern: &PathPattern, verb: Verb) -> Result<(), RegistryError> {
        match self.root.existing(pattern, verb) {
            Some(existing) => Err(RegistryError::RouteConflict {
                verb,
                path: pattern.to_string(),
                existing: existing.template.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Open a namespace rooted at `base`, mirrored under the legacy prefix
    /// when one is configured.
    pub fn namespace(&mut self, base: &str) -> Result<Namespace<'_>, RegistryError> {
        let base = compile(base)?;
        let legacy = self.legacy_prefix.is_some();
        Ok(Namespace {
            registry: self,
            base,
            legacy,
        })
    }

    /// Registered mappings, primary and alias.
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// Freeze the registry into an immutable route table.
    pub fn seal(self) -> RouteTable {
        let mut entries = self.entries;
        for entry in &mut entries {
            entry.state = RouteState::Active;
        }
        let legacy_count = entries.iter().filter(|e| e.alias_of.is_some()).count();
        info!(
            target: "ispyb_gate::registry",
            route_count = entries.len(),
            legacy_count = legacy_count,
            "route table sealed"
        );
        RouteTable {
            root: self.root,
            entries,
        }
    }
}

/// Routes registered relative to a base path.
pub struct Namespace<'r> {
    registry: &'r mut RouteRegistry,
    base: PathPattern,
    legacy: bool,
}

impl<'r> Namespace<'r> {
    /// Do not mirror this namespace under the legacy prefix.
    pub fn without_legacy(mut self) -> Self {
        self.legacy = false;
        self
    }

    /// Register `path` (relative to the namespace base, `""` for the base itself).
    pub fn route(
        &mut self,
        path: &str,
        verb: Verb,
        handler: Arc<dyn Handler>,
        chain: GuardChain,
    ) -> Result<&mut Self, RegistryError> {
        let relative = if path.is_empty() { "/" } else { path };
        let primary = compile(relative)?.prefixed(&self.base);
        let alias = match (&self.registry.legacy_prefix, self.legacy) {
            (Some(prefix), true) => Some(primary.prefixed(prefix)),
            _ => None,
        };
        self.registry.insert(primary, alias, verb, handler, chain)?;
        Ok(self)
    }
}

/// A route resolved for one request.
pub struct ResolvedRoute<'a> {
    /// Handler fused with its guard chain.
    pub guarded: &'a GuardedHandler,
    /// Captured placeholder values.
    pub params: PathParams,
    /// Matched template info.
    pub info: RouteInfo,
    /// Primary path the policy is evaluated against.
    pub resource_path: String,
}

/// Outcome of route resolution.
pub enum Resolution<'a> {
    /// A route handles this verb and path.
    Found(ResolvedRoute<'a>),
    /// The path exists but not for this verb.
    MethodNotAllowed {
        /// Verbs registered for the path.
        allowed: Vec<Verb>,
    },
    /// No route for this path.
    NotFound,
}

/// Sealed, immutable route table.
pub struct RouteTable {
    root: Node,
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Resolve `verb` + `path` to a route.
    pub fn resolve(&self, verb: Verb, path: &str) -> Resolution<'_> {
        let segments: Vec<&str> = split_path(path).collect();
        let mut captured = Vec::new();

        let accept_verb = |node: &Node| node.endpoints.contains_key(&verb);
        if let Some(node) = self.root.find(&segments, &mut captured, &accept_verb) {
            if let Some(endpoint) = node.endpoints.get(&verb) {
                return Resolution::Found(Self::resolved(endpoint, &captured, path));
            }
        }

        captured.clear();
        let accept_any = |node: &Node| !node.endpoints.is_empty();
        match self.root.find(&segments, &mut captured, &accept_any) {
            Some(node) => {
                let mut allowed: Vec<Verb> = node.endpoints.keys().copied().collect();
                allowed.sort();
                Resolution::MethodNotAllowed { allowed }
            }
            None => Resolution::NotFound,
        }
    }

    fn resolved<'a>(endpoint: &'a Endpoint, captured: &[&str], path: &str) -> ResolvedRoute<'a> {
        let mut params = PathParams::new();
        for (name, value) in endpoint.template.param_names().zip(captured.iter()) {
            params.push(name, *value);
        }
        let resource_path = endpoint
            .route
            .primary
            .render(&params)
            .unwrap_or_else(|| path.to_string());
        ResolvedRoute {
            guarded: endpoint.route.guarded.as_ref(),
            params,
            info: RouteInfo {
                template: endpoint.template.to_string(),
                primary_template: endpoint.route.primary.to_string(),
                legacy: endpoint.legacy,
            },
            resource_path,
        }
    }

    /// Resolve the request and run it through the gate.
    pub async fn dispatch(&self, gate: &RequestGate, request: GatewayRequest) -> GatewayResponse {
        match self.resolve(request.verb, &request.path) {
            Resolution::Found(route) => {
                gate.run(route.guarded, request, &route.resource_path, route.params, route.info)
                    .await
            }
            Resolution::MethodNotAllowed { allowed } => {
                let allowed: Vec<&str> = allowed.iter().map(Verb::as_str).collect();
                GatewayResponse::error(
                    405,
                    "METHOD_NOT_ALLOWED",
                    format!("{} not allowed; allowed: {}", request.verb, allowed.join(", ")),
                )
            }
            Resolution::NotFound => GatewayResponse::error(
                404,
                "ROUTE_NOT_FOUND",
                format!("No route for {}", request.path),
            ),
        }
    }

    /// All mappings, primary and alias, in registration order.
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
