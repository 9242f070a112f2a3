//! Handler resolution and registry (component H's handler-loading half).
//!
//! §9's Open Question ("how does a `processor` ingester load its handler:
//! file path, dynamic import, or pre-registered name?") is resolved in
//! favor of a pre-registered name registry plus an inline-expression
//! fallback — no dynamic file loading. The registry itself is lifted
//! straight from `fleet_core::plugins::registry::PluginRegistry`,
//! trading "action plugins keyed by id" for "handlers keyed by name".
//! The inline-expression path is `safe_eval`, the sibling module.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ChompError, Result};
use crate::model::{FieldValue, HandlerRef, IngesterDef};

pub mod safe_eval;

/// Per-upstream-ingester field snapshot passed to a handler: outer key is
/// the upstream ingester name, inner key the field name.
pub type HandlerInputs = HashMap<String, HashMap<String, FieldValue>>;

/// A pre-registered processing function for a `processor` ingester.
///
/// Registered handlers are looked up by name (`HandlerRef::Registered`);
/// this is the "trusted code, known at deploy time" counterpart to the
/// restricted inline-expression path.
pub trait Handler: Send + Sync {
    /// Compute this tick's field values from the gathered dependency
    /// inputs. Implementations should not block; long-running work
    /// belongs behind the ingestion timeout the Scheduler already
    /// enforces around the whole tick.
    fn call(&self, ingester: &IngesterDef, inputs: &HandlerInputs) -> Result<HashMap<String, FieldValue>>;
}

impl<F> Handler for F
where
    F: Fn(&IngesterDef, &HandlerInputs) -> Result<HashMap<String, FieldValue>> + Send + Sync,
{
    fn call(&self, ingester: &IngesterDef, inputs: &HandlerInputs) -> Result<HashMap<String, FieldValue>> {
        self(ingester, inputs)
    }
}

/// Registry of handlers known by name at process startup, mirroring
/// `PluginRegistry`'s `new`/`register`/`get`/`contains`/`all`/`ids`/`len`
/// surface.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any prior registration.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Look up a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Iterate over all registered handlers.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.values()
    }

    /// Iterate over all registered names.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry has no registered handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A handler reference resolved to something invocable, cached for the
/// ingester's lifetime so a `processor` doesn't re-parse its expression
/// (or re-look-up its registered name) on every tick.
pub enum ResolvedHandler {
    /// A pre-registered handler, ready to [`Handler::call`].
    Registered(Arc<dyn Handler>),
    /// A parsed, safety-checked expression, ready to
    /// [`safe_eval::eval`]. Must evaluate to a mapping; its entries
    /// become the result field values directly, matching the registered
    /// path's `HashMap<String, FieldValue>` return shape.
    Expression(safe_eval::Expr),
}

impl ResolvedHandler {
    /// Invoke this handler against `inputs`, producing field values by
    /// name.
    ///
    /// # Errors
    /// Propagates the underlying [`Handler::call`] or
    /// [`safe_eval::eval`] error; an expression that evaluates to
    /// anything other than a mapping is a [`ChompError::HandlerError`].
    pub fn invoke(
        &self,
        ingester: &IngesterDef,
        inputs: &HandlerInputs,
    ) -> Result<HashMap<String, FieldValue>> {
        match self {
            Self::Registered(handler) => handler.call(ingester, inputs),
            Self::Expression(expr) => {
                let env = inputs
                    .iter()
                    .map(|(upstream, fields)| {
                        let nested = fields
                            .iter()
                            .map(|(field, value)| (field.clone(), safe_eval::Value::from(value)))
                            .collect();
                        (upstream.clone(), safe_eval::Value::Map(nested))
                    })
                    .collect();

                match safe_eval::eval(expr, &env)? {
                    safe_eval::Value::Map(map) => {
                        Ok(map.into_iter().map(|(k, v)| (k, FieldValue::from(v))).collect())
                    }
                    other => Err(ChompError::HandlerError {
                        ingester: ingester.name.clone(),
                        reason: format!(
                            "inline handler expression must evaluate to a mapping, found {other:?}"
                        ),
                    }),
                }
            }
        }
    }
}

/// Resolve a [`HandlerRef`] against `registry`, per §4.H/§9.
///
/// # Errors
/// Returns [`ChompError::HandlerNotFound`] if a registered name is not
/// known, or propagates [`safe_eval::parse_checked`]'s errors for an
/// expression that fails to parse or its safety check.
pub fn resolve(handler_ref: &HandlerRef, registry: &HandlerRegistry) -> Result<ResolvedHandler> {
    match handler_ref {
        HandlerRef::Registered(name) => registry
            .get(name)
            .map(ResolvedHandler::Registered)
            .ok_or_else(|| ChompError::HandlerNotFound(name.clone())),
        HandlerRef::Expression(source) => {
            safe_eval::parse_checked(source).map(ResolvedHandler::Expression)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IngesterType;

    fn sample_ingester() -> IngesterDef {
        IngesterDef {
            name: "combined".to_string(),
            ingester_type: IngesterType::Processor,
            interval: "s30".to_string(),
            fields: vec![],
            handler: None,
        }
    }

    #[test]
    fn registry_round_trips_and_reports_size() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register(
            "combine",
            Arc::new(|_: &IngesterDef, _: &HandlerInputs| Ok(HashMap::new())),
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("combine"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["combine"]);
    }

    #[test]
    fn unregistered_name_is_handler_not_found() {
        let registry = HandlerRegistry::new();
        let err = resolve(&HandlerRef::Registered("missing".to_string()), &registry);
        assert!(matches!(err, Err(ChompError::HandlerNotFound(_))));
    }

    #[test]
    fn registered_handler_invokes_closure() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "double",
            Arc::new(|_: &IngesterDef, inputs: &HandlerInputs| {
                let x = inputs
                    .get("feed")
                    .and_then(|f| f.get("x"))
                    .cloned()
                    .unwrap_or(FieldValue::Null);
                let doubled = match x {
                    FieldValue::Number(n) => FieldValue::Number(n * 2.0),
                    other => other,
                };
                Ok(HashMap::from([("out".to_string(), doubled)]))
            }),
        );
        let resolved = resolve(&HandlerRef::Registered("double".to_string()), &registry).unwrap();
        let mut inputs = HandlerInputs::new();
        inputs.insert(
            "feed".to_string(),
            HashMap::from([("x".to_string(), FieldValue::Number(21.0))]),
        );
        let out = resolved.invoke(&sample_ingester(), &inputs).unwrap();
        assert_eq!(out.get("out"), Some(&FieldValue::Number(42.0)));
    }

    #[test]
    fn expression_handler_must_evaluate_to_a_mapping() {
        let registry = HandlerRegistry::new();
        let resolved = resolve(&HandlerRef::Expression("1 + 1".to_string()), &registry).unwrap();
        let err = resolved.invoke(&sample_ingester(), &HandlerInputs::new());
        assert!(matches!(err, Err(ChompError::HandlerError { .. })));
    }

    #[test]
    fn expression_handler_projects_upstream_fields() {
        let registry = HandlerRegistry::new();
        let resolved = resolve(
            &HandlerRef::Expression("{usd: feed.price * 2}".to_string()),
            &registry,
        )
        .unwrap();
        let mut inputs = HandlerInputs::new();
        inputs.insert(
            "feed".to_string(),
            HashMap::from([("price".to_string(), FieldValue::Number(10.0))]),
        );
        let out = resolved.invoke(&sample_ingester(), &inputs).unwrap();
        assert_eq!(out.get("usd"), Some(&FieldValue::Number(20.0)));
    }

    #[test]
    fn bad_expression_fails_at_resolve_time() {
        let registry = HandlerRegistry::new();
        let err = resolve(&HandlerRef::Expression("foo._private".to_string()), &registry);
        assert!(matches!(err, Err(ChompError::ConfigError(_))));
    }
}
