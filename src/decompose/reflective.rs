use crate::attributes::{Inspect, ObjectRef, Value};
use crate::containment::panic_message;
use crate::decompose::graph::{Decomposed, DecomposedAttribute, DecomposedGraph, Node, NodeId};
use crate::decompose::Decomposer;
use crate::error::DecomposeError;
use log::warn;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type CustomStep = Arc<dyn Fn(&ObjectRef) -> Option<Value> + Send + Sync>;

/// Capability-table decomposer
///
/// Built-in value kinds have fixed steps. Objects first try a step registered
/// for their exact type, then their textual form, then the generic property
/// walk from [`Inspect::properties`].
#[derive(Default, Clone)]
pub struct ReflectiveDecomposer {
    custom: HashMap<TypeId, CustomStep>,
}

impl ReflectiveDecomposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decompose objects of type `T` through `step`
    ///
    /// The returned value is decomposed in turn. If it reaches the same object
    /// again, that occurrence falls back to the generic step.
    pub fn register<T, F>(&mut self, step: F) -> &mut Self
    where
        T: Inspect,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let step: CustomStep = Arc::new(move |object: &ObjectRef| object.downcast_ref::<T>().map(&step));
        self.custom.insert(TypeId::of::<T>(), step);
        self
    }

    pub fn with_step<T, F>(mut self, step: F) -> Self
    where
        T: Inspect,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.register::<T, F>(step);
        self
    }

    pub fn has_step_for<T: Inspect>(&self) -> bool {
        self.custom.contains_key(&TypeId::of::<T>())
    }
}

impl Decomposer for ReflectiveDecomposer {
    fn decompose(&self, value: &Value) -> DecomposedGraph {
        let mut walk = Walk::new(self);
        walk.run(value.clone());
        DecomposedGraph::new(walk.root, walk.nodes, walk.failures)
    }
}

impl std::fmt::Debug for ReflectiveDecomposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectiveDecomposer")
            .field("custom_steps", &self.custom.len())
            .finish()
    }
}

/// Where a visited value's result is written
#[derive(Clone)]
enum Place {
    Root,
    Item(NodeId, usize),
    Field(NodeId, String),
}

#[derive(Clone)]
struct Slot {
    place: Place,
    /// Attribute wrappers to descend through at `place`
    depth: usize,
}

impl Slot {
    fn at(place: Place) -> Self {
        Self { place, depth: 0 }
    }

    fn inside_attribute(&self) -> Self {
        Self {
            place: self.place.clone(),
            depth: self.depth + 1,
        }
    }
}

enum Task {
    Visit { value: Value, slot: Slot },
    /// The custom step for `identity` and everything its replacement reached are done
    EndCustom { identity: usize, slot: Slot },
}

/// State of one decomposition
///
/// Work is kept on an explicit stack, so input depth never grows the call
/// stack. Containers are allocated with placeholder members that are filled
/// in as their tasks run; children are pushed in reverse so members are
/// still visited depth-first in order.
struct Walk<'a> {
    decomposer: &'a ReflectiveDecomposer,
    root: Decomposed,
    nodes: Vec<Node>,
    tasks: Vec<Task>,
    /// Input identity to the node already allocated for it
    visited: HashMap<usize, NodeId>,
    /// Objects whose custom replacement is being walked
    in_custom: HashSet<usize>,
    /// Keeps visited inputs alive so their addresses are not reused mid-walk
    retained: Vec<Value>,
    failures: Vec<DecomposeError>,
}

impl<'a> Walk<'a> {
    fn new(decomposer: &'a ReflectiveDecomposer) -> Self {
        Self {
            decomposer,
            root: Decomposed::Null,
            nodes: Vec::new(),
            tasks: Vec::new(),
            visited: HashMap::new(),
            in_custom: HashSet::new(),
            retained: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn run(&mut self, value: Value) {
        self.tasks.push(Task::Visit {
            value,
            slot: Slot::at(Place::Root),
        });
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::Visit { value, slot } => self.visit(&value, slot),
                Task::EndCustom { identity, slot } => {
                    self.in_custom.remove(&identity);
                    // Later occurrences reuse the replacement instead of running the step again
                    if let Some(Decomposed::Ref(id)) = self.slot_mut(&slot).cloned() {
                        self.visited.entry(identity).or_insert(id);
                    }
                }
            }
        }
    }

    fn slot_mut(&mut self, slot: &Slot) -> Option<&mut Decomposed> {
        let mut target = match &slot.place {
            Place::Root => Some(&mut self.root),
            Place::Item(id, index) => match self.nodes.get_mut(id.index()) {
                Some(Node::List { items } | Node::Set { items } | Node::Array { items }) => {
                    items.get_mut(*index)
                }
                _ => None,
            },
            Place::Field(id, key) => match self.nodes.get_mut(id.index()) {
                Some(Node::Map { entries: fields } | Node::Record { fields, .. }) => {
                    fields.get_mut(key)
                }
                _ => None,
            },
        }?;
        for _ in 0..slot.depth {
            target = match target {
                Decomposed::Attribute(attribute) => &mut attribute.value,
                _ => return None,
            };
        }
        Some(target)
    }

    fn write(&mut self, slot: &Slot, result: Decomposed) {
        if let Some(target) = self.slot_mut(slot) {
            *target = result;
        }
    }

    /// Allocate a node with placeholder members and register it before any member is visited
    fn reserve(&mut self, identity: usize, input: &Value, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node);
        self.visited.insert(identity, id);
        self.retained.push(input.clone());
        id
    }

    fn sequence(
        &mut self,
        identity: usize,
        input: &Value,
        items: Vec<Value>,
        node: fn(Vec<Decomposed>) -> Node,
    ) -> Decomposed {
        if let Some(id) = self.visited.get(&identity) {
            return Decomposed::Ref(*id);
        }
        let id = self.reserve(identity, input, node(vec![Decomposed::Null; items.len()]));
        for (index, item) in items.into_iter().enumerate().rev() {
            self.tasks.push(Task::Visit {
                value: item,
                slot: Slot::at(Place::Item(id, index)),
            });
        }
        Decomposed::Ref(id)
    }

    /// Keyed members of `id`, visited in the order given
    fn schedule_fields(&mut self, id: NodeId, fields: Vec<(String, Value)>) {
        for (key, field) in fields.into_iter().rev() {
            self.tasks.push(Task::Visit {
                value: field,
                slot: Slot::at(Place::Field(id, key)),
            });
        }
    }

    fn visit(&mut self, value: &Value, slot: Slot) {
        let result = match value {
            Value::Null => Decomposed::Null,
            Value::Bool(b) => Decomposed::Bool(*b),
            Value::Int(i) => Decomposed::Int(*i),
            Value::Float(f) => Decomposed::Float(*f),
            Value::Str(s) => Decomposed::Str(s.clone()),
            Value::Timestamp(t) => Decomposed::Timestamp(*t),
            Value::Text(text) => Decomposed::Str(text.to_string()),
            Value::Type(descriptor) => Decomposed::Str(descriptor.name().to_string()),
            Value::List(list) => self.sequence(list.identity(), value, list.snapshot(), |items| {
                Node::List { items }
            }),
            Value::Set(set) => self.sequence(set.identity(), value, set.snapshot(), |items| {
                Node::Set { items }
            }),
            Value::Array(array) => {
                let identity = Arc::as_ptr(array) as *const () as usize;
                self.sequence(identity, value, array.to_vec(), |items| Node::Array { items })
            }
            Value::Map(map) => {
                if let Some(id) = self.visited.get(&map.identity()) {
                    Decomposed::Ref(*id)
                } else {
                    let entries = map.snapshot();
                    let placeholders = entries
                        .keys()
                        .map(|key| (key.clone(), Decomposed::Null))
                        .collect();
                    let id = self.reserve(
                        map.identity(),
                        value,
                        Node::Map {
                            entries: placeholders,
                        },
                    );
                    self.schedule_fields(id, entries.into_iter().collect());
                    Decomposed::Ref(id)
                }
            }
            Value::Attribute(holder) => {
                self.tasks.push(Task::Visit {
                    value: holder.value().clone(),
                    slot: slot.inside_attribute(),
                });
                Decomposed::Attribute(Box::new(DecomposedAttribute {
                    value: Decomposed::Null,
                    locked: holder.is_locked(),
                    serializable: holder.is_serializable(),
                }))
            }
            Value::Object(object) => match self.object(value, object, &slot) {
                Some(result) => result,
                // A custom replacement writes the slot itself
                None => return,
            },
        };
        self.write(&slot, result);
    }

    fn object(&mut self, value: &Value, object: &ObjectRef, slot: &Slot) -> Option<Decomposed> {
        let identity = object.identity();
        if let Some(id) = self.visited.get(&identity) {
            return Some(Decomposed::Ref(*id));
        }

        if !self.in_custom.contains(&identity) {
            if let Some(step) = self.decomposer.custom.get(&object.type_id()).cloned() {
                return self.custom(value, object, step, slot);
            }
        }

        let type_name = object.type_name();
        match panic::catch_unwind(AssertUnwindSafe(|| object.inspect().as_text())) {
            Ok(Some(text)) => return Some(Decomposed::Str(text)),
            Ok(None) => {}
            Err(payload) => {
                self.fail(DecomposeError::Inspection {
                    type_name: type_name.to_string(),
                    reason: panic_message(payload.as_ref()),
                });
            }
        }

        Some(self.generic(value, object))
    }

    /// Run a registered step; its replacement is walked in place of the object
    fn custom(
        &mut self,
        value: &Value,
        object: &ObjectRef,
        step: CustomStep,
        slot: &Slot,
    ) -> Option<Decomposed> {
        self.retained.push(value.clone());
        match panic::catch_unwind(AssertUnwindSafe(|| step(object))) {
            Ok(Some(replacement)) => {
                let identity = object.identity();
                self.retained.push(replacement.clone());
                self.in_custom.insert(identity);
                // Popped only after every task the replacement schedules
                self.tasks.push(Task::EndCustom {
                    identity,
                    slot: slot.clone(),
                });
                self.tasks.push(Task::Visit {
                    value: replacement,
                    slot: slot.clone(),
                });
                None
            }
            Ok(None) => Some(self.generic(value, object)),
            Err(payload) => {
                self.fail(DecomposeError::Inspection {
                    type_name: object.type_name().to_string(),
                    reason: panic_message(payload.as_ref()),
                });
                Some(self.generic(value, object))
            }
        }
    }

    /// Fallback: a record of the object's readable, non-transient properties
    fn generic(&mut self, value: &Value, object: &ObjectRef) -> Decomposed {
        if let Some(id) = self.visited.get(&object.identity()) {
            return Decomposed::Ref(*id);
        }
        let type_name = object.type_name();
        let id = self.reserve(
            object.identity(),
            value,
            Node::Record {
                type_name: type_name.to_string(),
                fields: BTreeMap::new(),
            },
        );

        let properties = match panic::catch_unwind(AssertUnwindSafe(|| object.inspect().properties())) {
            Ok(properties) => properties,
            Err(payload) => {
                self.fail(DecomposeError::Inspection {
                    type_name: type_name.to_string(),
                    reason: panic_message(payload.as_ref()),
                });
                return Decomposed::Ref(id);
            }
        };

        let mut fields = Vec::new();
        for property in properties {
            if property.transient {
                continue;
            }
            match property.value {
                Ok(field) => {
                    if is_eligible(&field) {
                        fields.push((property.name, field));
                    }
                }
                Err(reason) => self.fail(DecomposeError::Property {
                    type_name: type_name.to_string(),
                    property: property.name,
                    reason,
                }),
            }
        }
        if let Some(Node::Record { fields: record, .. }) = self.nodes.get_mut(id.index()) {
            for (key, _) in &fields {
                record.insert(key.clone(), Decomposed::Null);
            }
        }
        self.schedule_fields(id, fields);
        Decomposed::Ref(id)
    }

    fn fail(&mut self, error: DecomposeError) {
        warn!("Decomposition skipped a value: {}", error);
        self.failures.push(error);
    }
}

/// Objects that opt out of serialization are dropped when reached through a property
fn is_eligible(value: &Value) -> bool {
    match value {
        Value::Object(object) => object.inspect().is_serializable(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeValue, Property, Shared, TextBuffer};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Object graph node whose `next` link can point anywhere, itself included
    struct GraphNode {
        id: i64,
        next: Mutex<Option<Arc<GraphNode>>>,
    }

    impl GraphNode {
        fn new(id: i64) -> Arc<Self> {
            Arc::new(Self {
                id,
                next: Mutex::new(None),
            })
        }

        fn link(&self, next: &Arc<GraphNode>) {
            *crate::lock(&self.next) = Some(next.clone());
        }
    }

    impl Inspect for GraphNode {
        fn type_name(&self) -> &'static str {
            "GraphNode"
        }

        fn properties(&self) -> Vec<Property> {
            let next = crate::lock(&self.next)
                .clone()
                .map(Value::object)
                .unwrap_or(Value::Null);
            vec![Property::new("id", self.id), Property::new("next", next)]
        }
    }

    struct Fragile;

    impl Inspect for Fragile {
        fn type_name(&self) -> &'static str {
            "Fragile"
        }

        fn properties(&self) -> Vec<Property> {
            vec![
                Property::new("ok", 1),
                Property::failed("broken", "getter failed"),
                Property::transient("cache", "skip me"),
                Property::new("hidden", Value::object(Arc::new(Secret))),
                Property::new("after", 2),
            ]
        }
    }

    struct Secret;

    impl Inspect for Secret {
        fn properties(&self) -> Vec<Property> {
            vec![Property::new("password", "hunter2")]
        }

        fn is_serializable(&self) -> bool {
            false
        }
    }

    struct Exploding;

    impl Inspect for Exploding {
        fn type_name(&self) -> &'static str {
            "Exploding"
        }

        fn properties(&self) -> Vec<Property> {
            panic!("cannot enumerate")
        }
    }

    struct Url(String);

    impl Inspect for Url {
        fn properties(&self) -> Vec<Property> {
            Vec::new()
        }

        fn as_text(&self) -> Option<String> {
            Some(self.0.clone())
        }
    }

    fn fields(graph: &DecomposedGraph, id: &Decomposed) -> BTreeMap<String, Decomposed> {
        match id {
            Decomposed::Ref(id) => match graph.node(*id) {
                Some(Node::Record { fields, .. }) | Some(Node::Map { entries: fields }) => {
                    fields.clone()
                }
                other => panic!("expected keyed node, got {:?}", other),
            },
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_identity_steps() {
        let decomposer = ReflectiveDecomposer::new();
        assert_eq!(decomposer.decompose(&Value::Null).root(), &Decomposed::Null);
        assert_eq!(decomposer.decompose(&Value::from(5)).root(), &Decomposed::Int(5));
        assert_eq!(
            decomposer.decompose(&Value::from("s")).root(),
            &Decomposed::Str("s".to_string())
        );
        assert_eq!(
            decomposer.decompose(&TextBuffer::new("buf").into()).root(),
            &Decomposed::Str("buf".to_string())
        );
        assert_eq!(
            decomposer.decompose(&Value::type_of::<String>()).root(),
            &Decomposed::Str("alloc::string::String".to_string())
        );
        assert_eq!(
            decomposer
                .decompose(&Value::object(Arc::new(Url("https://x".to_string()))))
                .root(),
            &Decomposed::Str("https://x".to_string())
        );
    }

    #[test]
    fn test_self_referential_object_terminates_quickly() {
        let node = GraphNode::new(1);
        node.link(&node);

        let start = Instant::now();
        let graph = ReflectiveDecomposer::new().decompose(&Value::object(node.clone()));
        assert!(start.elapsed() < Duration::from_secs(1));

        let root = graph.root().clone();
        let record = fields(&graph, &root);
        assert_eq!(record.get("next"), Some(&root));
        assert_eq!(record.get("id"), Some(&Decomposed::Int(1)));
        assert_eq!(graph.nodes().len(), 1);

        // Break the cycle so the test does not leak
        *crate::lock(&node.next) = None;
    }

    #[test]
    fn test_mutual_cycle_resolves_to_equal_content() {
        let a = GraphNode::new(1);
        let b = GraphNode::new(2);
        a.link(&b);
        b.link(&a);

        let graph = ReflectiveDecomposer::new().decompose(&Value::object(a.clone()));
        let root = graph.root().clone();
        let b_ref = fields(&graph, &root)["next"].clone();
        let back = fields(&graph, &b_ref)["next"].clone();
        assert_eq!(back, root);
        assert!(graph.same_value(&root, &graph, &back));

        *crate::lock(&a.next) = None;
    }

    #[test]
    fn test_large_ring_under_budget() {
        let nodes: Vec<Arc<GraphNode>> = (0..99).map(GraphNode::new).collect();
        for pair in nodes.windows(2) {
            pair[0].link(&pair[1]);
        }
        nodes[98].link(&nodes[0]);

        let start = Instant::now();
        let graph = ReflectiveDecomposer::new().decompose(&Value::object(nodes[0].clone()));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(graph.nodes().len(), 99);

        *crate::lock(&nodes[98].next) = None;
    }

    #[test]
    fn test_deeply_nested_lists_do_not_exhaust_the_stack() {
        const DEPTH: usize = 100_000;
        let lists: Vec<Shared<Vec<Value>>> = (0..DEPTH).map(|_| Shared::new(Vec::new())).collect();
        for pair in lists.windows(2) {
            pair[0].write().push(Value::List(pair[1].clone()));
        }
        lists[DEPTH - 1].write().push(Value::from("bottom"));

        let graph = ReflectiveDecomposer::new().decompose(&Value::List(lists[0].clone()));
        assert_eq!(graph.nodes().len(), DEPTH);
        match graph.nodes().last() {
            Some(Node::List { items }) => {
                assert_eq!(items, &vec![Decomposed::Str("bottom".to_string())])
            }
            other => panic!("expected list, got {:?}", other),
        }
        assert!(graph.failures().is_empty());

        // Unlink so dropping the chain stays shallow
        for list in &lists {
            list.write().clear();
        }
    }

    #[test]
    fn test_nested_attribute_holders_are_filled_in() {
        let inner = AttributeValue::new(Value::list([7]));
        let outer = AttributeValue::new(Value::Attribute(Box::new(inner))).locked();
        let graph = ReflectiveDecomposer::new().decompose(&outer.into());
        match graph.root() {
            Decomposed::Attribute(attribute) => {
                assert!(attribute.locked);
                match &attribute.value {
                    Decomposed::Attribute(nested) => {
                        assert!(!nested.locked);
                        assert_eq!(nested.value, Decomposed::Ref(NodeId::new(0)));
                    }
                    other => panic!("expected attribute, got {:?}", other),
                }
            }
            other => panic!("expected attribute, got {:?}", other),
        }
        assert_eq!(
            graph.node(NodeId::new(0)),
            Some(&Node::List {
                items: vec![Decomposed::Int(7)]
            })
        );
    }

    #[test]
    fn test_self_containing_list() {
        let list = Shared::new(Vec::new());
        list.write().push(Value::from(1));
        list.write().push(Value::List(list.clone()));

        let graph = ReflectiveDecomposer::new().decompose(&Value::List(list.clone()));
        match graph.root_node() {
            Some(Node::List { items }) => {
                assert_eq!(items[0], Decomposed::Int(1));
                assert_eq!(&items[1], graph.root());
            }
            other => panic!("expected list, got {:?}", other),
        }
        list.write().clear();
    }

    #[test]
    fn test_distinct_equal_inputs_do_not_collapse() {
        let shared_a = Value::list([1, 2]);
        let shared_b = Value::list([1, 2]);
        let outer = Value::list([shared_a.clone(), shared_b, shared_a]);

        let graph = ReflectiveDecomposer::new().decompose(&outer);
        match graph.root_node() {
            Some(Node::List { items }) => {
                assert_ne!(items[0], items[1]);
                assert_eq!(items[0], items[2]);
                assert!(graph.same_value(&items[0], &graph, &items[1]));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_separate_calls_are_independent() {
        let decomposer = ReflectiveDecomposer::new();
        let input = Value::map([("k", Value::list(["v"]))]);
        let first = decomposer.decompose(&input);
        let mut second = decomposer.decompose(&Value::map([("k", Value::list(["v"]))]));
        assert!(first.same_content(&second));

        // Mutating one result leaves the other untouched
        if let Some(Node::Map { entries }) = second.nodes_mut().get_mut(0) {
            entries.clear();
        }
        assert!(!first.same_content(&second));
        assert_eq!(first.nodes().len(), 2);
    }

    #[test]
    fn test_property_failures_are_isolated() {
        let graph = ReflectiveDecomposer::new().decompose(&Value::object(Arc::new(Fragile)));
        let record = fields(&graph, graph.root());
        assert_eq!(record.get("ok"), Some(&Decomposed::Int(1)));
        assert_eq!(record.get("after"), Some(&Decomposed::Int(2)));
        assert!(!record.contains_key("broken"));
        assert!(!record.contains_key("cache"));
        assert!(!record.contains_key("hidden"));
        assert_eq!(
            graph.failures(),
            &[DecomposeError::Property {
                type_name: "Fragile".to_string(),
                property: "broken".to_string(),
                reason: "getter failed".to_string(),
            }]
        );
    }

    #[test]
    fn test_panicking_properties_leave_empty_record() {
        let value = Value::list([Value::object(Arc::new(Exploding)), Value::from(3)]);
        let graph = ReflectiveDecomposer::new().decompose(&value);
        assert_eq!(graph.failures().len(), 1);
        assert!(matches!(
            &graph.failures()[0],
            DecomposeError::Inspection { type_name, .. } if type_name == "Exploding"
        ));
        match graph.root_node() {
            Some(Node::List { items }) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1], Decomposed::Int(3));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_attribute_holder_is_rewrapped() {
        let holder = AttributeValue::new(Value::list([1])).locked();
        let graph = ReflectiveDecomposer::new().decompose(&holder.into());
        match graph.root() {
            Decomposed::Attribute(attribute) => {
                assert!(attribute.locked);
                assert!(!attribute.serializable);
                assert!(matches!(attribute.value, Decomposed::Ref(_)));
            }
            other => panic!("expected attribute, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_step_takes_precedence() {
        let decomposer = ReflectiveDecomposer::new()
            .with_step::<GraphNode, _>(|node| Value::map([("node", node.id)]));
        assert!(decomposer.has_step_for::<GraphNode>());

        let node = GraphNode::new(7);
        let graph = decomposer.decompose(&Value::object(node));
        let record = fields(&graph, graph.root());
        assert_eq!(record.get("node"), Some(&Decomposed::Int(7)));
    }

    #[test]
    fn test_custom_step_reaching_itself_falls_back_to_generic() {
        let decomposer = ReflectiveDecomposer::new().with_step::<GraphNode, _>(|node| {
            let again = crate::lock(&node.next).clone().map(Value::object);
            Value::list([Value::from(node.id), Value::from(again)])
        });

        let node = GraphNode::new(3);
        node.link(&node);
        let graph = decomposer.decompose(&Value::object(node.clone()));
        match graph.root_node() {
            Some(Node::List { items }) => {
                assert_eq!(items[0], Decomposed::Int(3));
                let inner = fields(&graph, &items[1]);
                assert_eq!(inner.get("id"), Some(&Decomposed::Int(3)));
            }
            other => panic!("expected list, got {:?}", other),
        }
        *crate::lock(&node.next) = None;
    }
}
