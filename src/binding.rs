//! Binding Engine (§4.9): live subscriptions between widget properties
//! and paths in an external data model, with optional two-way transforms
//! and LRU-capped derived notifiers.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde_json::Value;

use crate::message::{DataBinding, DataBindingEntry};
use crate::path::PathExpr;

/// The direction/semantics of a binding, per §3's `BindingDefinition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingMode {
    OneWay,
    TwoWay,
    OneWayToSource,
}

impl BindingMode {
    fn from_str(s: &str) -> Self {
        match s {
            "twoWay" => BindingMode::TwoWay,
            "oneWayToSource" => BindingMode::OneWayToSource,
            _ => BindingMode::OneWay,
        }
    }
}

/// A value transform applied in one direction across a binding.
pub type TransformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A parsed, resolved binding: property name, target path, direction,
/// and optional transforms in each direction.
#[derive(Clone)]
pub struct BindingDefinition {
    pub property: String,
    pub path: PathExpr,
    pub mode: BindingMode,
    pub to_widget: Option<TransformFn>,
    pub to_model: Option<TransformFn>,
}

/// A handle to one listener registered on a `ReactiveValue`, returned by
/// `subscribe` and required by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

type Listener = Box<dyn Fn(&Value) + Send + Sync>;

/// The "reactive cell" abstraction consumed (not owned) by the binding
/// engine, per spec.md §9: a handle with a current value and observer
/// registration. The binding engine wraps these with transform layers
/// when a `toWidget` transform is configured; it never implements the
/// underlying reactivity itself.
pub trait ReactiveValue: Send + Sync {
    fn value(&self) -> Value;
    fn subscribe(&self, listener: Listener) -> SubscriptionHandle;
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// A minimal concrete `ReactiveValue`: a value plus a set of listeners,
/// notified synchronously on `set`.
pub struct Notifier {
    state: Mutex<NotifierState>,
}

struct NotifierState {
    value: Value,
    listeners: HashMap<u64, Listener>,
    next_id: u64,
}

impl Notifier {
    pub fn new(value: Value) -> Arc<Self> {
        Arc::new(Notifier {
            state: Mutex::new(NotifierState {
                value,
                listeners: HashMap::new(),
                next_id: 0,
            }),
        })
    }

    pub fn set(&self, value: Value) {
        let mut state = self.state.lock().unwrap();
        state.value = value.clone();
        for listener in state.listeners.values() {
            listener(&value);
        }
    }
}

impl ReactiveValue for Notifier {
    fn value(&self) -> Value {
        self.state.lock().unwrap().value.clone()
    }

    fn subscribe(&self, listener: Listener) -> SubscriptionHandle {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.insert(id, listener);
        SubscriptionHandle(id)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.state.lock().unwrap().listeners.remove(&handle.0);
    }
}

/// The data model external collaborator: resolves paths to reactive
/// cells and accepts writes. Owned by the host application, not by this
/// crate (spec.md §1 Out of Scope).
pub trait DataModel: Send + Sync {
    fn subscribe(&self, path: &PathExpr) -> Arc<Notifier>;
    fn update(&self, path: &PathExpr, value: Value);
}

/// One live binding between a widget property and a data-model path.
#[derive(Clone)]
pub struct WidgetBinding {
    pub widget_id: String,
    pub surface_id: String,
    pub definition: BindingDefinition,
    pub subscription: Arc<Notifier>,
}

struct Registry {
    next_id: u64,
    bindings: HashMap<u64, WidgetBinding>,
    by_widget: HashMap<String, Vec<u64>>,
    by_surface: HashMap<String, Vec<u64>>,
    by_path: HashMap<String, Vec<u64>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            next_id: 0,
            bindings: HashMap::new(),
            by_widget: HashMap::new(),
            by_surface: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    fn insert(&mut self, binding: WidgetBinding) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.by_widget
            .entry(binding.widget_id.clone())
            .or_default()
            .push(id);
        self.by_surface
            .entry(binding.surface_id.clone())
            .or_default()
            .push(id);
        self.by_path
            .entry(binding.definition.path.to_slash_notation())
            .or_default()
            .push(id);
        self.bindings.insert(id, binding);
        id
    }

    fn remove(&mut self, id: u64) -> Option<WidgetBinding> {
        let binding = self.bindings.remove(&id)?;
        remove_from_index(&mut self.by_widget, &binding.widget_id, id);
        remove_from_index(&mut self.by_surface, &binding.surface_id, id);
        remove_from_index(
            &mut self.by_path,
            &binding.definition.path.to_slash_notation(),
            id,
        );
        Some(binding)
    }

    fn ids_for_widget(&self, widget_id: &str) -> Vec<u64> {
        self.by_widget.get(widget_id).cloned().unwrap_or_default()
    }

    fn ids_for_surface(&self, surface_id: &str) -> Vec<u64> {
        self.by_surface
            .get(surface_id)
            .cloned()
            .unwrap_or_default()
    }

    fn ids_for_path(&self, path: &str) -> Vec<u64> {
        self.by_path.get(path).cloned().unwrap_or_default()
    }
}

fn remove_from_index(index: &mut HashMap<String, Vec<u64>>, key: &str, id: u64) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|&x| x != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

struct DerivedEntry {
    source: Arc<Notifier>,
    derived: Arc<Notifier>,
    handle: SubscriptionHandle,
}

const DEFAULT_MAX_CACHE_SIZE: usize = 100;

/// Registry of widget bindings keyed by widget id, surface id, and path,
/// plus an LRU-capped cache of derived (transformed) notifiers.
pub struct BindingEngine {
    registry: Mutex<Registry>,
    derived_cache: Mutex<LruCache<(String, String), DerivedEntry>>,
    last_set: Mutex<HashMap<(String, String), Value>>,
    counter: AtomicU64,
}

impl BindingEngine {
    pub fn new() -> Self {
        Self::with_max_cache_size(DEFAULT_MAX_CACHE_SIZE)
    }

    pub fn with_max_cache_size(max_cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_cache_size.max(1)).unwrap();
        BindingEngine {
            registry: Mutex::new(Registry::new()),
            derived_cache: Mutex::new(LruCache::new(cap)),
            last_set: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Parse a `dataBinding` spec (string shorthand, per-property map, or
    /// full `{path, mode}` map; `None` means no bindings) and register a
    /// `WidgetBinding` per resolved entry. Malformed entries are skipped
    /// silently, per §4.9.
    pub fn process_widget_bindings(
        &self,
        surface_id: &str,
        widget_id: &str,
        spec: Option<&DataBinding>,
        data_model: &dyn DataModel,
    ) {
        let Some(spec) = spec else { return };

        let resolved: Vec<(String, PathExpr, BindingMode)> = match spec {
            DataBinding::Path(path) => {
                vec![(
                    "value".to_string(),
                    PathExpr::from_dot_notation(path),
                    BindingMode::OneWay,
                )]
            }
            DataBinding::PerProperty(map) => map
                .iter()
                .map(|(prop, entry)| match entry {
                    DataBindingEntry::Path(path) => (
                        prop.clone(),
                        PathExpr::from_dot_notation(path),
                        BindingMode::OneWay,
                    ),
                    DataBindingEntry::Spec(spec) => (
                        prop.clone(),
                        PathExpr::from_dot_notation(&spec.path),
                        BindingMode::from_str(&spec.mode),
                    ),
                })
                .collect(),
        };

        let mut registry = self.registry.lock().unwrap();
        for (property, path, mode) in resolved {
            let subscription = data_model.subscribe(&path);
            let definition = BindingDefinition {
                property,
                path,
                mode,
                to_widget: None,
                to_model: None,
            };
            registry.insert(WidgetBinding {
                widget_id: widget_id.to_string(),
                surface_id: surface_id.to_string(),
                definition,
                subscription,
            });
        }
    }

    /// Register a binding with explicit transforms (the `dataBinding`
    /// spec alone cannot name transform functions; callers that need
    /// `toWidget`/`toModel` construct the `BindingDefinition` directly
    /// and register it here).
    pub fn register_binding(
        &self,
        surface_id: &str,
        widget_id: &str,
        definition: BindingDefinition,
        data_model: &dyn DataModel,
    ) {
        let subscription = data_model.subscribe(&definition.path);
        let mut registry = self.registry.lock().unwrap();
        registry.insert(WidgetBinding {
            widget_id: widget_id.to_string(),
            surface_id: surface_id.to_string(),
            definition,
            subscription,
        });
    }

    /// Returns the raw subscription when no `toWidget` transform is
    /// configured; otherwise a derived notifier that applies the
    /// transform to every source emission, cached per (widget, property)
    /// and LRU-evicted beyond the configured capacity.
    pub fn get_value_notifier(&self, widget_id: &str, property: &str) -> Option<Arc<Notifier>> {
        let registry = self.registry.lock().unwrap();
        let binding = registry
            .ids_for_widget(widget_id)
            .into_iter()
            .filter_map(|id| registry.bindings.get(&id))
            .find(|b| b.definition.property == property)?;

        let Some(transform) = binding.definition.to_widget.clone() else {
            return Some(binding.subscription.clone());
        };

        let key = (widget_id.to_string(), property.to_string());
        let mut cache = self.derived_cache.lock().unwrap();
        if let Some(entry) = cache.get(&key) {
            return Some(entry.derived.clone());
        }

        let source = binding.subscription.clone();
        let derived = Notifier::new(transform(&source.value()));
        let derived_for_listener = derived.clone();
        let transform_for_listener = transform.clone();
        let handle = source.subscribe(Box::new(move |v| {
            derived_for_listener.set(transform_for_listener(v));
        }));

        let evicted = cache.push(
            key,
            DerivedEntry {
                source,
                derived: derived.clone(),
                handle,
            },
        );
        if let Some((_, evicted_entry)) = evicted {
            evicted_entry.source.unsubscribe(evicted_entry.handle);
        }

        Some(derived)
    }

    /// For two-way bindings only: apply `toModel` if configured,
    /// deduplicate against the last value written for this (widget,
    /// property) to prevent update loops, and write to the data model.
    pub fn update_from_widget(
        &self,
        widget_id: &str,
        property: &str,
        value: Value,
        data_model: &dyn DataModel,
    ) {
        let registry = self.registry.lock().unwrap();
        let Some(binding) = registry
            .ids_for_widget(widget_id)
            .into_iter()
            .filter_map(|id| registry.bindings.get(&id))
            .find(|b| b.definition.property == property)
        else {
            return;
        };

        if !matches!(
            binding.definition.mode,
            BindingMode::TwoWay | BindingMode::OneWayToSource
        ) {
            return;
        }

        let final_value = match &binding.definition.to_model {
            Some(transform) => transform(&value),
            None => value,
        };
        let path = binding.definition.path.clone();
        drop(registry);

        let key = (widget_id.to_string(), property.to_string());
        let mut last_set = self.last_set.lock().unwrap();
        if last_set.get(&key) == Some(&final_value) {
            return;
        }
        last_set.insert(key, final_value.clone());
        drop(last_set);

        data_model.update(&path, final_value);
    }

    /// Reverse lookup for data-model change propagation (§2/§3's `byPath`
    /// index): every binding currently subscribed on `path`, keyed by its
    /// slash notation. A data-model host drives widget updates by
    /// resolving the changed path here rather than scanning every
    /// registered binding.
    pub fn bindings_for_path(&self, path: &PathExpr) -> Vec<WidgetBinding> {
        let registry = self.registry.lock().unwrap();
        registry
            .ids_for_path(&path.to_slash_notation())
            .into_iter()
            .filter_map(|id| registry.bindings.get(&id).cloned())
            .collect()
    }

    fn dispose_derived_for(&self, predicate: impl Fn(&(String, String)) -> bool) {
        let mut cache = self.derived_cache.lock().unwrap();
        let keys: Vec<(String, String)> = cache
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(entry) = cache.pop(&key) {
                entry.source.unsubscribe(entry.handle);
            }
        }
    }

    /// Dispose all owned derived notifiers and registered bindings for
    /// `widget_id`: listeners are removed from source notifiers before
    /// derived notifiers are dropped.
    pub fn unregister_widget(&self, widget_id: &str) {
        self.dispose_derived_for(|(w, _)| w == widget_id);
        self.last_set.lock().unwrap().retain(|(w, _), _| w != widget_id);
        let mut registry = self.registry.lock().unwrap();
        for id in registry.ids_for_widget(widget_id) {
            registry.remove(id);
        }
    }

    /// Dispose all bindings (and their derived notifiers) belonging to
    /// `surface_id`.
    pub fn unregister_surface(&self, surface_id: &str) {
        let widget_ids: Vec<String> = {
            let registry = self.registry.lock().unwrap();
            registry
                .ids_for_surface(surface_id)
                .into_iter()
                .filter_map(|id| registry.bindings.get(&id).map(|b| b.widget_id.clone()))
                .collect()
        };
        for widget_id in widget_ids {
            self.unregister_widget(&widget_id);
        }
    }

    /// Dispose everything: all derived notifiers (unsubscribed from
    /// their sources first), all registered bindings, and the last-set
    /// dedup cache.
    pub fn dispose(&self) {
        self.dispose_derived_for(|_| true);
        self.last_set.lock().unwrap().clear();
        *self.registry.lock().unwrap() = Registry::new();
    }

    /// Monotonic id generator available to callers constructing derived
    /// `BindingDefinition`s that need a stable identity (not used
    /// internally; exposed for host-application bookkeeping).
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for BindingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct TestModel {
        cells: StdMutex<HashMap<String, Arc<Notifier>>>,
        updates: StdMutex<Vec<(String, Value)>>,
    }

    impl TestModel {
        fn new() -> Self {
            TestModel {
                cells: StdMutex::new(HashMap::new()),
                updates: StdMutex::new(Vec::new()),
            }
        }

        fn seed(&self, path: &str, value: Value) {
            self.cells
                .lock()
                .unwrap()
                .insert(path.to_string(), Notifier::new(value));
        }
    }

    impl DataModel for TestModel {
        fn subscribe(&self, path: &PathExpr) -> Arc<Notifier> {
            let key = path.to_dot_notation();
            self.cells
                .lock()
                .unwrap()
                .entry(key)
                .or_insert_with(|| Notifier::new(Value::Null))
                .clone()
        }

        fn update(&self, path: &PathExpr, value: Value) {
            let key = path.to_dot_notation();
            self.updates.lock().unwrap().push((key.clone(), value.clone()));
            if let Some(cell) = self.cells.lock().unwrap().get(&key) {
                cell.set(value);
            }
        }
    }

    #[test]
    fn string_shorthand_binds_single_value_property_oneway() {
        let model = TestModel::new();
        model.seed("form.age", json!(30));
        let engine = BindingEngine::new();

        let spec = DataBinding::Path("form.age".to_string());
        engine.process_widget_bindings("main", "input1", Some(&spec), &model);

        let notifier = engine.get_value_notifier("input1", "value").unwrap();
        assert_eq!(notifier.value(), json!(30));
    }

    #[test]
    fn null_spec_registers_nothing() {
        let model = TestModel::new();
        let engine = BindingEngine::new();
        engine.process_widget_bindings("main", "w1", None, &model);
        assert!(engine.get_value_notifier("w1", "value").is_none());
    }

    #[test]
    fn scenario_e_two_way_binding_with_transforms() {
        let model = TestModel::new();
        model.seed("form.age", json!(30));
        let engine = BindingEngine::new();

        let to_widget: TransformFn = Arc::new(|v: &Value| json!(v.as_i64().unwrap().to_string()));
        let to_model: TransformFn =
            Arc::new(|v: &Value| json!(v.as_str().unwrap().parse::<i64>().unwrap()));

        engine.register_binding(
            "main",
            "input1",
            BindingDefinition {
                property: "value".to_string(),
                path: PathExpr::from_dot_notation("form.age"),
                mode: BindingMode::TwoWay,
                to_widget: Some(to_widget),
                to_model: Some(to_model),
            },
            &model,
        );

        let notifier = engine.get_value_notifier("input1", "value").unwrap();
        assert_eq!(notifier.value(), json!("30"));

        engine.update_from_widget("input1", "value", json!("31"), &model);
        assert_eq!(model.updates.lock().unwrap().len(), 1);
        assert_eq!(model.cells.lock().unwrap().get("form.age").unwrap().value(), json!(31));

        // Second identical call is deduplicated: no additional update.
        engine.update_from_widget("input1", "value", json!("31"), &model);
        assert_eq!(model.updates.lock().unwrap().len(), 1);
    }

    #[test]
    fn one_way_binding_ignores_update_from_widget() {
        let model = TestModel::new();
        model.seed("form.age", json!(30));
        let engine = BindingEngine::new();
        let spec = DataBinding::Path("form.age".to_string());
        engine.process_widget_bindings("main", "input1", Some(&spec), &model);

        engine.update_from_widget("input1", "value", json!(99), &model);
        assert!(model.updates.lock().unwrap().is_empty());
    }

    #[test]
    fn scenario_f_lru_eviction_disposes_listener_and_notifier() {
        let model = TestModel::new();
        model.seed("a", json!(1));
        model.seed("b", json!(2));
        model.seed("c", json!(3));
        let engine = BindingEngine::with_max_cache_size(2);
        let identity: TransformFn = Arc::new(|v: &Value| v.clone());

        for (widget, path) in [("A", "a"), ("B", "b"), ("C", "c")] {
            engine.register_binding(
                "main",
                widget,
                BindingDefinition {
                    property: "value".to_string(),
                    path: PathExpr::from_dot_notation(path),
                    mode: BindingMode::OneWay,
                    to_widget: Some(identity.clone()),
                    to_model: None,
                },
                &model,
            );
        }

        engine.get_value_notifier("A", "value").unwrap();
        engine.get_value_notifier("B", "value").unwrap();
        // Reading C evicts A (least recently used), not B.
        engine.get_value_notifier("C", "value").unwrap();

        let cache = engine.derived_cache.lock().unwrap();
        assert!(!cache.contains(&("A".to_string(), "value".to_string())));
        assert!(cache.contains(&("B".to_string(), "value".to_string())));
        assert!(cache.contains(&("C".to_string(), "value".to_string())));
    }

    #[test]
    fn unregister_widget_removes_bindings_and_derived_cache() {
        let model = TestModel::new();
        model.seed("a", json!(1));
        let engine = BindingEngine::new();
        let identity: TransformFn = Arc::new(|v: &Value| v.clone());
        engine.register_binding(
            "main",
            "A",
            BindingDefinition {
                property: "value".to_string(),
                path: PathExpr::from_dot_notation("a"),
                mode: BindingMode::OneWay,
                to_widget: Some(identity),
                to_model: None,
            },
            &model,
        );
        engine.get_value_notifier("A", "value").unwrap();
        engine.unregister_widget("A");
        assert!(engine.get_value_notifier("A", "value").is_none());
    }

    #[test]
    fn unregister_surface_cascades_to_its_widgets() {
        let model = TestModel::new();
        model.seed("a", json!(1));
        let engine = BindingEngine::new();
        let spec = DataBinding::Path("a".to_string());
        engine.process_widget_bindings("surf1", "A", Some(&spec), &model);
        engine.unregister_surface("surf1");
        assert!(engine.get_value_notifier("A", "value").is_none());
    }

    #[test]
    fn dispose_clears_everything() {
        let model = TestModel::new();
        model.seed("a", json!(1));
        let engine = BindingEngine::new();
        let spec = DataBinding::Path("a".to_string());
        engine.process_widget_bindings("surf1", "A", Some(&spec), &model);
        engine.dispose();
        assert!(engine.get_value_notifier("A", "value").is_none());
    }

    #[test]
    fn bindings_for_path_resolves_reverse_lookup() {
        let model = TestModel::new();
        model.seed("form.age", json!(30));
        let engine = BindingEngine::new();
        let spec = DataBinding::Path("form.age".to_string());
        engine.process_widget_bindings("main", "input1", Some(&spec), &model);
        engine.process_widget_bindings("main", "input2", Some(&spec), &model);

        let bindings = engine.bindings_for_path(&PathExpr::from_dot_notation("form.age"));
        let widget_ids: Vec<&str> = bindings.iter().map(|b| b.widget_id.as_str()).collect();
        assert_eq!(widget_ids.len(), 2);
        assert!(widget_ids.contains(&"input1"));
        assert!(widget_ids.contains(&"input2"));

        assert!(engine
            .bindings_for_path(&PathExpr::from_dot_notation("form.name"))
            .is_empty());
    }

    #[test]
    fn bindings_for_path_drops_entry_after_unregister() {
        let model = TestModel::new();
        model.seed("a", json!(1));
        let engine = BindingEngine::new();
        let spec = DataBinding::Path("a".to_string());
        engine.process_widget_bindings("main", "A", Some(&spec), &model);
        engine.unregister_widget("A");
        assert!(engine
            .bindings_for_path(&PathExpr::from_dot_notation("a"))
            .is_empty());
    }

    #[test]
    fn malformed_per_property_entry_is_skipped_not_error() {
        let model = TestModel::new();
        let engine = BindingEngine::new();
        let map: HashMap<String, DataBindingEntry> = HashMap::new();
        let spec = DataBinding::PerProperty(map);
        engine.process_widget_bindings("main", "w1", Some(&spec), &model);
        assert!(engine.get_value_notifier("w1", "value").is_none());
    }
}
