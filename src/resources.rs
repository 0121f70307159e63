//! Resource catalog: CRUD routes for the platform resources.
//!
//! Each [`ResourceKind`] gets a collection route (GET, POST) and an item
//! route `{<id>:int}` (GET, PUT, PATCH, DELETE) on the standard guard chain.
//! Storage is delegated to a [`ResourceBackend`]; the gate has already
//! authorized the call when a handler runs.
//!
//! | Namespace | Collections |
//! |-----------|-------------|
//! | `/samples` | samples, crystals, proteins, diffraction plans |
//! | `/contacts` | persons, lab contacts, laboratories |
//! | `/phasing` | phasing results |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::gate::{handler_fn, GatewayRequest, GatewayResponse, GuardChain, Handler, RequestContext};
use crate::registry::{RegistryError, RouteRegistry};
use crate::types::Verb;

/// A CRUD resource exposed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    /// Display name, singular.
    pub name: &'static str,
    /// Namespace base path.
    pub namespace: &'static str,
    /// Collection path relative to the namespace (`""` for the base).
    pub collection: &'static str,
    /// Item placeholder name.
    pub id_param: &'static str,
    /// Primary-key field in item bodies.
    pub id_field: &'static str,
}

impl ResourceKind {
    /// Collection template relative to the namespace.
    pub fn collection_path(&self) -> &'static str {
        self.collection
    }

    /// Item template relative to the namespace.
    pub fn item_path(&self) -> String {
        format!("{}/{{{}:int}}", self.collection, self.id_param)
    }

    /// Backend key.
    pub fn key(&self) -> String {
        format!("{}{}", self.namespace, self.collection)
    }
}

/// Resources mounted by [`register_catalog`].
pub const CATALOG: &[ResourceKind] = &[
    ResourceKind {
        name: "sample",
        namespace: "/samples",
        collection: "",
        id_param: "sample_id",
        id_field: "blSampleId",
    },
    ResourceKind {
        name: "crystal",
        namespace: "/samples",
        collection: "/crystals",
        id_param: "crystal_id",
        id_field: "crystalId",
    },
    ResourceKind {
        name: "protein",
        namespace: "/samples",
        collection: "/proteins",
        id_param: "protein_id",
        id_field: "proteinId",
    },
    ResourceKind {
        name: "diffraction plan",
        namespace: "/samples",
        collection: "/diffraction_plans",
        id_param: "diffraction_plan_id",
        id_field: "diffractionPlanId",
    },
    ResourceKind {
        name: "person",
        namespace: "/contacts",
        collection: "/persons",
        id_param: "person_id",
        id_field: "personId",
    },
    ResourceKind {
        name: "lab contact",
        namespace: "/contacts",
        collection: "/lab_contacts",
        id_param: "lab_contact_id",
        id_field: "labContactId",
    },
    ResourceKind {
        name: "laboratory",
        namespace: "/contacts",
        collection: "/labs",
        id_param: "laboratory_id",
        id_field: "laboratoryId",
    },
    ResourceKind {
        name: "phasing result",
        namespace: "/phasing",
        collection: "",
        id_param: "phasing_result_id",
        id_field: "phasingId",
    },
];

/// Backend errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Body is not a JSON object.
    #[error("Invalid body: {0}")]
    InvalidBody(String),

    /// Storage failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl BackendError {
    fn into_response(self) -> GatewayResponse {
        match &self {
            Self::InvalidBody(_) => GatewayResponse::error(400, "INVALID_BODY", self.to_string()),
            Self::Backend(_) => GatewayResponse::error(503, "BACKEND_UNAVAILABLE", self.to_string()),
        }
    }
}

/// Storage for resource items. Items are JSON objects keyed by integer id.
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Items matching every `filters` field exactly.
    async fn list(&self, kind: &ResourceKind, filters: &BTreeMap<String, String>) -> Result<Vec<Value>, BackendError>;

    /// Insert an item, assigning its id.
    async fn create(&self, kind: &ResourceKind, body: Value) -> Result<Value, BackendError>;

    /// Fetch an item.
    async fn get(&self, kind: &ResourceKind, id: i64) -> Result<Option<Value>, BackendError>;

    /// Replace an item.
    async fn replace(&self, kind: &ResourceKind, id: i64, body: Value) -> Result<Option<Value>, BackendError>;

    /// Merge fields into an item.
    async fn patch(&self, kind: &ResourceKind, id: i64, body: Value) -> Result<Option<Value>, BackendError>;

    /// Delete an item; `false` when absent.
    async fn delete(&self, kind: &ResourceKind, id: i64) -> Result<bool, BackendError>;
}

#[derive(Debug, Default)]
struct Collection {
    next_id: i64,
    items: BTreeMap<i64, Map<String, Value>>,
}

/// In-memory resource backend.
#[derive(Debug, Default)]
pub struct InMemoryResourceBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

fn into_object(body: Value) -> Result<Map<String, Value>, BackendError> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::InvalidBody(format!("expected a JSON object, got {}", type_name(&other)))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn field_matches(item: &Map<String, Value>, field: &str, expected: &str) -> bool {
    match item.get(field) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

impl InMemoryResourceBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items stored for `kind`.
    pub fn count(&self, kind: &ResourceKind) -> usize {
        self.collections
            .read()
            .get(&kind.key())
            .map(|c| c.items.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ResourceBackend for InMemoryResourceBackend {
    async fn list(&self, kind: &ResourceKind, filters: &BTreeMap<String, String>) -> Result<Vec<Value>, BackendError> {
        let collections = self.collections.read();
        let Some(collection) = collections.get(&kind.key()) else {
            return Ok(Vec::new());
        };
        Ok(collection
            .items
            .values()
            .filter(|item| filters.iter().all(|(field, expected)| field_matches(item, field, expected)))
            .map(|item| Value::Object(item.clone()))
            .collect())
    }

    async fn create(&self, kind: &ResourceKind, body: Value) -> Result<Value, BackendError> {
        let mut item = into_object(body)?;
        let mut collections = self.collections.write();
        let collection = collections.entry(kind.key()).or_default();
        collection.next_id += 1;
        let id = collection.next_id;
        item.insert(kind.id_field.to_string(), json!(id));
        collection.items.insert(id, item.clone());
        Ok(Value::Object(item))
    }

    async fn get(&self, kind: &ResourceKind, id: i64) -> Result<Option<Value>, BackendError> {
        Ok(self
            .collections
            .read()
            .get(&kind.key())
            .and_then(|c| c.items.get(&id))
            .map(|item| Value::Object(item.clone())))
    }

    async fn replace(&self, kind: &ResourceKind, id: i64, body: Value) -> Result<Option<Value>, BackendError> {
        let mut item = into_object(body)?;
        let mut collections = self.collections.write();
        let Some(existing) = collections.get_mut(&kind.key()).and_then(|c| c.items.get_mut(&id)) else {
            return Ok(None);
        };
        item.insert(kind.id_field.to_string(), json!(id));
        *existing = item.clone();
        Ok(Some(Value::Object(item)))
    }

    async fn patch(&self, kind: &ResourceKind, id: i64, body: Value) -> Result<Option<Value>, BackendError> {
        let fields = into_object(body)?;
        let mut collections = self.collections.write();
        let Some(existing) = collections.get_mut(&kind.key()).and_then(|c| c.items.get_mut(&id)) else {
            return Ok(None);
        };
        for (field, value) in fields {
            if field != kind.id_field {
                existing.insert(field, value);
            }
        }
        Ok(Some(Value::Object(existing.clone())))
    }

    async fn delete(&self, kind: &ResourceKind, id: i64) -> Result<bool, BackendError> {
        Ok(self
            .collections
            .write()
            .get_mut(&kind.key())
            .map(|c| c.items.remove(&id).is_some())
            .unwrap_or(false))
    }
}

fn not_found(kind: &ResourceKind, id: i64) -> GatewayResponse {
    GatewayResponse::error(404, "NOT_FOUND", format!("{} {} not found", kind.name, id))
}

fn deleted_body(kind: &ResourceKind, id: i64) -> Value {
    let mut body = Map::new();
    body.insert(kind.id_field.to_string(), json!(id));
    body.insert("deleted".to_string(), Value::Bool(true));
    Value::Object(body)
}

fn item_id(kind: &ResourceKind, ctx: &RequestContext) -> Option<i64> {
    ctx.params.get_int(kind.id_param)
}

fn body_or_empty(request: GatewayRequest) -> Value {
    request.body.unwrap_or(Value::Null)
}

fn collection_handler(kind: ResourceKind, verb: Verb, backend: Arc<dyn ResourceBackend>) -> Arc<dyn Handler> {
    handler_fn(move |_ctx: RequestContext, request: GatewayRequest| {
        let backend = Arc::clone(&backend);
        async move {
            let result = match verb {
                Verb::Post => backend.create(&kind, body_or_empty(request)).await.map(GatewayResponse::created),
                _ => backend
                    .list(&kind, &request.query)
                    .await
                    .map(|items| GatewayResponse::ok(Value::Array(items))),
            };
            result.unwrap_or_else(BackendError::into_response)
        }
    })
}

fn item_handler(kind: ResourceKind, verb: Verb, backend: Arc<dyn ResourceBackend>) -> Arc<dyn Handler> {
    handler_fn(move |ctx: RequestContext, request: GatewayRequest| {
        let backend = Arc::clone(&backend);
        async move {
            let Some(id) = item_id(&kind, &ctx) else {
                return GatewayResponse::error(400, "INVALID_ID", format!("{} id must be an integer", kind.name));
            };
            debug!(target: "ispyb_gate::resources", resource = kind.name, id = id, verb = %verb, "resource call");
            let result = match verb {
                Verb::Get => backend.get(&kind, id).await,
                Verb::Put => backend.replace(&kind, id, body_or_empty(request)).await,
                Verb::Patch => backend.patch(&kind, id, body_or_empty(request)).await,
                Verb::Delete => backend
                    .delete(&kind, id)
                    .await
                    .map(|deleted| deleted.then(|| deleted_body(&kind, id))),
                _ => return GatewayResponse::error(405, "METHOD_NOT_ALLOWED", format!("{} not allowed", verb)),
            };
            match result {
                Ok(Some(body)) => GatewayResponse::ok(body),
                Ok(None) => not_found(&kind, id),
                Err(err) => err.into_response(),
            }
        }
    })
}

/// `GET /contacts/persons/{login}/info`: the person whose `login` field matches.
fn person_info_handler(backend: Arc<dyn ResourceBackend>) -> Arc<dyn Handler> {
    handler_fn(move |ctx: RequestContext, _request: GatewayRequest| {
        let backend = Arc::clone(&backend);
        async move {
            let Some(login) = ctx.params.get("login").map(str::to_string) else {
                return GatewayResponse::error(400, "INVALID_LOGIN", "missing login");
            };
            let persons = match CATALOG.iter().find(|k| k.name == "person") {
                Some(kind) => kind,
                None => return GatewayResponse::error(404, "NOT_FOUND", "person resource not mounted"),
            };
            let filters = BTreeMap::from([("login".to_string(), login.clone())]);
            match backend.list(persons, &filters).await {
                Ok(mut found) if !found.is_empty() => GatewayResponse::ok(found.swap_remove(0)),
                Ok(_) => GatewayResponse::error(404, "NOT_FOUND", format!("person {} not found", login)),
                Err(err) => err.into_response(),
            }
        }
    })
}

/// Mount every [`CATALOG`] resource plus the person-info route.
pub fn register_catalog(registry: &mut RouteRegistry, backend: Arc<dyn ResourceBackend>) -> Result<(), RegistryError> {
    for kind in CATALOG {
        let mut ns = registry.namespace(kind.namespace)?;
        for verb in [Verb::Get, Verb::Post] {
            ns.route(
                kind.collection_path(),
                verb,
                collection_handler(*kind, verb, Arc::clone(&backend)),
                GuardChain::standard(),
            )?;
        }
        let item_path = kind.item_path();
        for verb in [Verb::Get, Verb::Put, Verb::Patch, Verb::Delete] {
            ns.route(
                &item_path,
                verb,
                item_handler(*kind, verb, Arc::clone(&backend)),
                GuardChain::token_required_role_required(),
            )?;
        }
    }

    registry.namespace("/contacts")?.route(
        "/persons/{login}/info",
        Verb::Get,
        person_info_handler(backend),
        GuardChain::standard(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> &'static ResourceKind {
        &CATALOG[0]
    }

    #[test]
    fn test_catalog_paths() {
        assert_eq!(samples().item_path(), "/{sample_id:int}");
        assert_eq!(CATALOG[1].item_path(), "/crystals/{crystal_id:int}");
        assert_eq!(CATALOG[1].key(), "/samples/crystals");
    }

    #[test]
    fn test_catalog_registers_without_conflict() {
        let mut registry = RouteRegistry::with_legacy_prefix("/legacy").unwrap();
        register_catalog(&mut registry, Arc::new(InMemoryResourceBackend::new())).unwrap();
        // 6 verbs per resource plus person info, doubled by the legacy tree.
        assert_eq!(registry.entries().len(), (CATALOG.len() * 6 + 1) * 2);
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let backend = InMemoryResourceBackend::new();
        let kind = samples();

        let created = backend.create(kind, json!({ "name": "lysozyme" })).await.unwrap();
        assert_eq!(created["blSampleId"], 1);

        let patched = backend.patch(kind, 1, json!({ "comments": "ok", "blSampleId": 99 })).await.unwrap().unwrap();
        assert_eq!(patched["name"], "lysozyme");
        assert_eq!(patched["blSampleId"], 1);

        let replaced = backend.replace(kind, 1, json!({ "name": "thaumatin" })).await.unwrap().unwrap();
        assert!(replaced.get("comments").is_none());

        assert!(backend.delete(kind, 1).await.unwrap());
        assert!(backend.get(kind, 1).await.unwrap().is_none());
        assert!(!backend.delete(kind, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let backend = InMemoryResourceBackend::new();
        let kind = samples();
        backend.create(kind, json!({ "name": "a", "proteinId": 3 })).await.unwrap();
        backend.create(kind, json!({ "name": "b", "proteinId": 4 })).await.unwrap();

        let filters = BTreeMap::from([("proteinId".to_string(), "4".to_string())]);
        let items = backend.list(kind, &filters).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "b");
    }

    #[tokio::test]
    async fn test_non_object_body_rejected() {
        let backend = InMemoryResourceBackend::new();
        let err = backend.create(samples(), json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidBody(_)));
        assert_eq!(backend.count(samples()), 0);
    }
}
