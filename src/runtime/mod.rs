//! Runtime wiring engine.
//!
//! The browser side of a compiled component, modelled over the arena DOM in
//! [`dom`]. A [`Runtime`] owns the document, the component registry, the
//! single-threaded [`scheduler::Scheduler`] and the injected
//! [`RuntimeServices`] (style sheet cache, template fragment cache and wiring
//! plan cache).
//!
//! Element lifecycle: `Unconnected → Connecting → Connected → Disconnected`.
//! On connection the template fragment is cloned into the mount root, styles
//! are attached, route and query parameters are interpolated into text nodes,
//! the connected callback runs and wiring is queued as a microtask so DOM
//! changes made by the callback are visible to selector lookups.

pub mod dom;
pub mod params;
pub mod scheduler;
pub mod styles;
pub mod template;
pub mod wiring;

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::annotations::AnnotationMetadata;
use crate::codegen::GeneratedModule;
use crate::error::RuntimeError;
use crate::route::RouteDescriptor;

pub use dom::{Binding, Dom, ListenerId, NodeId, NodeKind, Selector};
pub use params::{ParamSet, Params};
use scheduler::Scheduler;
use styles::StyleSheetCache;
use template::TemplateCache;
use wiring::{TimingDecision, TimingWrapper, WiringEntry, WiringPlanCache};

lazy_static! {
    static ref TAG_NAME_RE: Regex = Regex::new(r"^[a-z][a-z0-9._]*-[a-z0-9._-]*$").unwrap();
}

/// Custom-element names must start with a lowercase letter and contain a hyphen.
pub fn is_valid_tag(tag: &str) -> bool {
    TAG_NAME_RE.is_match(tag)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unconnected,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: String,
    pub target: NodeId,
    pub current_target: NodeId,
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUTHORING SURFACES
// ═══════════════════════════════════════════════════════════════════════════════

/// What a component callback can see and touch.
pub struct ElementContext<'a> {
    pub dom: &'a mut Dom,
    pub element: NodeId,
    /// Shadow root when the component uses one, else the element itself.
    pub mount_root: NodeId,
    /// Parameters captured by the unit's route pattern.
    pub route_params: &'a Params,
    pub query_params: &'a Params,
    /// Route parameters with query parameters merged over them.
    pub params: &'a Params,
    pub now_ms: u64,
}

/// Behavior of one live element.
pub trait ElementBehavior {
    fn connected(&mut self, _ctx: &mut ElementContext<'_>) {}

    fn disconnected(&mut self, _ctx: &mut ElementContext<'_>) {}

    fn attribute_changed(
        &mut self,
        _ctx: &mut ElementContext<'_>,
        _name: &str,
        _old: Option<&str>,
        _new: Option<&str>,
    ) {
    }

    fn adopted(&mut self, _ctx: &mut ElementContext<'_>) {}

    /// Whether `call` knows `method`. Wiring skips methods that are missing.
    fn has_method(&self, _method: &str) -> bool {
        true
    }

    fn call(
        &mut self,
        method: &str,
        ctx: &mut ElementContext<'_>,
        event: Option<&Event>,
    ) -> Result<(), RuntimeError>;
}

/// Class-like authoring surface: constructs one behavior per element.
pub trait ComponentConstructor {
    fn construct(&self) -> Box<dyn ElementBehavior>;
}

/// Static data bound to a registration by the generated module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentMeta {
    pub tag: String,
    pub template: String,
    pub styles: Option<String>,
    pub global_styles: Option<String>,
    pub shadow: bool,
    pub route: Option<RouteDescriptor>,
    /// Source unit the registration was generated from; hot updates target it.
    pub source_id: Option<String>,
    /// Static annotation table emitted by the compiler.
    pub annotations: Vec<AnnotationMetadata>,
    pub observed_attributes: Vec<String>,
}

impl ComponentMeta {
    pub fn new(tag: impl Into<String>) -> Self {
        ComponentMeta {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Metadata carried by a compiled module.
    pub fn from_module(module: &GeneratedModule, source_id: &str) -> Self {
        ComponentMeta {
            tag: module.tag.clone().unwrap_or_default(),
            template: module.template_text.clone(),
            styles: module.scoped_css.clone(),
            global_styles: module.global_css.clone(),
            shadow: false,
            route: module.route.clone(),
            source_id: Some(source_id.to_string()),
            annotations: module.annotation_table.clone(),
            observed_attributes: Vec::new(),
        }
    }
}

pub type MethodFn = Rc<dyn Fn(&mut ElementContext<'_>, Option<&Event>)>;
pub type LifecycleHook = Rc<dyn Fn(&mut ElementContext<'_>)>;
pub type AttributeHook = Rc<dyn Fn(&mut ElementContext<'_>, &str, Option<&str>, Option<&str>)>;

/// Plain configuration-object authoring surface.
#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub meta: ComponentMeta,
    pub methods: BTreeMap<String, MethodFn>,
    pub connected: Option<LifecycleHook>,
    pub disconnected: Option<LifecycleHook>,
    pub attribute_changed: Option<AttributeHook>,
}

impl ComponentOptions {
    pub fn new(meta: ComponentMeta) -> Self {
        ComponentOptions {
            meta,
            ..Default::default()
        }
    }

    pub fn method(
        mut self,
        name: &str,
        f: impl Fn(&mut ElementContext<'_>, Option<&Event>) + 'static,
    ) -> Self {
        self.methods.insert(name.to_string(), Rc::new(f));
        self
    }

    pub fn on_connected(mut self, f: impl Fn(&mut ElementContext<'_>) + 'static) -> Self {
        self.connected = Some(Rc::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl Fn(&mut ElementContext<'_>) + 'static) -> Self {
        self.disconnected = Some(Rc::new(f));
        self
    }

    pub fn on_attribute_changed(
        mut self,
        f: impl Fn(&mut ElementContext<'_>, &str, Option<&str>, Option<&str>) + 'static,
    ) -> Self {
        self.attribute_changed = Some(Rc::new(f));
        self
    }
}

struct OptionsBehavior {
    options: Rc<ComponentOptions>,
}

impl ElementBehavior for OptionsBehavior {
    fn connected(&mut self, ctx: &mut ElementContext<'_>) {
        if let Some(hook) = &self.options.connected {
            hook(ctx);
        }
    }

    fn disconnected(&mut self, ctx: &mut ElementContext<'_>) {
        if let Some(hook) = &self.options.disconnected {
            hook(ctx);
        }
    }

    fn attribute_changed(
        &mut self,
        ctx: &mut ElementContext<'_>,
        name: &str,
        old: Option<&str>,
        new: Option<&str>,
    ) {
        if let Some(hook) = &self.options.attribute_changed {
            hook(ctx, name, old, new);
        }
    }

    fn has_method(&self, method: &str) -> bool {
        self.options.methods.contains_key(method)
    }

    fn call(
        &mut self,
        method: &str,
        ctx: &mut ElementContext<'_>,
        event: Option<&Event>,
    ) -> Result<(), RuntimeError> {
        let f = self
            .options
            .methods
            .get(method)
            .ok_or_else(|| RuntimeError::UnknownMethod(method.to_string()))?;
        f(ctx, event);
        Ok(())
    }
}

/// A component registration. The runtime branches on the variant once, when
/// the class is defined.
pub enum Registration {
    Options(ComponentOptions),
    Constructor(Rc<dyn ComponentConstructor>, ComponentMeta),
}

enum ClassFactory {
    Options(Rc<ComponentOptions>),
    Constructor(Rc<dyn ComponentConstructor>),
}

impl ClassFactory {
    fn instantiate(&self) -> Box<dyn ElementBehavior> {
        match self {
            ClassFactory::Options(options) => Box::new(OptionsBehavior {
                options: Rc::clone(options),
            }),
            ClassFactory::Constructor(ctor) => ctor.construct(),
        }
    }
}

impl Registration {
    fn into_parts(self) -> (ComponentMeta, ClassFactory) {
        match self {
            Registration::Options(options) => {
                let meta = options.meta.clone();
                (meta, ClassFactory::Options(Rc::new(options)))
            }
            Registration::Constructor(ctor, meta) => (meta, ClassFactory::Constructor(ctor)),
        }
    }
}

struct ComponentClass {
    meta: ComponentMeta,
    factory: ClassFactory,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICES
// ═══════════════════════════════════════════════════════════════════════════════

/// Caches shared by every element of a runtime. Constructed by the embedder
/// and handed to [`Runtime::new`]; they live as long as the runtime.
#[derive(Debug, Default)]
pub struct RuntimeServices {
    pub styles: StyleSheetCache,
    pub templates: TemplateCache,
    pub plans: WiringPlanCache,
}

impl RuntimeServices {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeCounters {
    pub plan_discoveries: usize,
    pub template_parses: usize,
    pub style_sheets_constructed: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

struct Instance {
    element: NodeId,
    class: ClassId,
    behavior: Box<dyn ElementBehavior>,
    state: Lifecycle,
    mount_root: NodeId,
    mounted: bool,
    wired: bool,
    params: ParamSet,
    listeners: Vec<(NodeId, ListenerId)>,
    timing: HashMap<String, TimingWrapper>,
    scoped_sheet: Option<String>,
}

enum Task {
    Wire(InstanceId),
    /// A timing wrapper's delayed call.
    Fire {
        instance: InstanceId,
        method: String,
        event: Option<Event>,
    },
}

fn with_context<R>(
    dom: &mut Dom,
    now_ms: u64,
    instance: &mut Instance,
    f: impl FnOnce(&mut Box<dyn ElementBehavior>, &mut ElementContext<'_>) -> R,
) -> R {
    let Instance {
        behavior,
        params,
        element,
        mount_root,
        ..
    } = instance;
    let mut ctx = ElementContext {
        dom,
        element: *element,
        mount_root: *mount_root,
        route_params: &params.route,
        query_params: &params.query,
        params: &params.merged,
        now_ms,
    };
    f(behavior, &mut ctx)
}

pub struct Runtime {
    dom: Dom,
    document: NodeId,
    services: RuntimeServices,
    scheduler: Scheduler<Task>,
    classes: HashMap<ClassId, ComponentClass>,
    registry: HashMap<String, ClassId>,
    instances: BTreeMap<InstanceId, Instance>,
    by_element: HashMap<NodeId, InstanceId>,
    location: String,
    next_id: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeServices::new())
    }
}

impl Runtime {
    pub fn new(services: RuntimeServices) -> Self {
        let mut dom = Dom::new();
        let document = dom.create_document();
        Runtime {
            dom,
            document,
            services,
            scheduler: Scheduler::new(),
            classes: HashMap::new(),
            registry: HashMap::new(),
            instances: BTreeMap::new(),
            by_element: HashMap::new(),
            location: "/".to_string(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    /// Direct DOM access. Changes made here bypass lifecycle callbacks.
    pub fn dom_mut(&mut self) -> &mut Dom {
        &mut self.dom
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    pub fn counters(&self) -> RuntimeCounters {
        RuntimeCounters {
            plan_discoveries: self.services.plans.discoveries(),
            template_parses: self.services.templates.parses(),
            style_sheets_constructed: self.services.styles.constructions(),
        }
    }

    /// Current path and query, used for parameter interpolation.
    pub fn set_location(&mut self, location: &str) {
        self.location = location.to_string();
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Registry
    // ───────────────────────────────────────────────────────────────────────────

    /// Register a component class for its tag. A tag may be registered again
    /// only from the same source unit (hot reload); that creates a new class
    /// with its own wiring plan, used by elements created from then on.
    pub fn define(&mut self, registration: Registration) -> Result<ClassId, RuntimeError> {
        let (meta, factory) = registration.into_parts();
        if !is_valid_tag(&meta.tag) {
            return Err(RuntimeError::InvalidTag(meta.tag));
        }
        if let Some(existing) = self.registry.get(&meta.tag) {
            let same_source = self
                .classes
                .get(existing)
                .and_then(|class| class.meta.source_id.as_ref())
                .is_some_and(|source| meta.source_id.as_ref() == Some(source));
            if !same_source {
                return Err(RuntimeError::AlreadyDefined(meta.tag));
            }
            log::debug!("[sfc] re-registering <{}>", meta.tag);
        }

        let id = ClassId(self.next_id());
        if let Some(css) = meta.global_styles.as_deref() {
            self.services.styles.attach(&mut self.dom, self.document, css);
        }
        self.registry.insert(meta.tag.clone(), id);
        self.classes.insert(id, ComponentClass { meta, factory });

        // Upgrade elements already in the document.
        self.connect_subtree(self.document);
        Ok(id)
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        self.registry.contains_key(tag)
    }

    pub fn class_of(&self, tag: &str) -> Option<ClassId> {
        self.registry.get(tag).copied()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Tree operations with lifecycle
    // ───────────────────────────────────────────────────────────────────────────

    /// Create an element; defined tags get their behavior right away.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let element = self.dom.create_element(tag);
        self.ensure_instance(element);
        element
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let inserted = match self.dom.kind(child) {
            NodeKind::Fragment => self.dom.children(child).to_vec(),
            _ => vec![child],
        };
        let was_connected: Vec<bool> = inserted.iter().map(|&n| self.dom.is_connected(n)).collect();
        self.dom.append_child(parent, child);

        let parent_connected = self.dom.is_connected(parent);
        for (node, was) in inserted.into_iter().zip(was_connected) {
            if was && !parent_connected {
                self.disconnect_subtree(node);
            } else if parent_connected {
                self.connect_subtree(node);
            }
        }
    }

    pub fn remove(&mut self, node: NodeId) {
        let was_connected = self.dom.is_connected(node);
        self.dom.detach(node);
        if was_connected {
            self.disconnect_subtree(node);
        }
    }

    pub fn set_attribute(&mut self, element: NodeId, name: &str, value: &str) {
        let old = self.dom.set_attribute(element, name, value);
        self.attribute_changed(element, name, old, Some(value.to_string()));
    }

    pub fn remove_attribute(&mut self, element: NodeId, name: &str) {
        if let Some(old) = self.dom.remove_attribute(element, name) {
            self.attribute_changed(element, name, Some(old), None);
        }
    }

    fn attribute_changed(&mut self, element: NodeId, name: &str, old: Option<String>, new: Option<String>) {
        let Some(id) = self.by_element.get(&element) else {
            return;
        };
        let Some(instance) = self.instances.get_mut(id) else {
            return;
        };
        let name = name.to_ascii_lowercase();
        let observed = self
            .classes
            .get(&instance.class)
            .is_some_and(|class| class.meta.observed_attributes.iter().any(|a| a.eq_ignore_ascii_case(&name)));
        if !observed {
            return;
        }
        let now = self.scheduler.now_ms();
        with_context(&mut self.dom, now, instance, |behavior, ctx| {
            behavior.attribute_changed(ctx, &name, old.as_deref(), new.as_deref())
        });
    }

    /// Invoke the adopted callback of a component element.
    pub fn adopt(&mut self, element: NodeId) -> Result<(), RuntimeError> {
        let id = *self.by_element.get(&element).ok_or(RuntimeError::NotAComponent)?;
        let instance = self.instances.get_mut(&id).ok_or(RuntimeError::NotAComponent)?;
        let now = self.scheduler.now_ms();
        with_context(&mut self.dom, now, instance, |behavior, ctx| behavior.adopted(ctx));
        Ok(())
    }

    pub fn lifecycle(&self, element: NodeId) -> Option<Lifecycle> {
        let id = self.by_element.get(&element)?;
        self.instances.get(id).map(|i| i.state)
    }

    pub fn mount_root(&self, element: NodeId) -> Option<NodeId> {
        let id = self.by_element.get(&element)?;
        self.instances.get(id).map(|i| i.mount_root)
    }

    /// Merged parameters of a component element.
    pub fn params(&self, element: NodeId) -> Option<&Params> {
        self.param_set(element).map(|set| &set.merged)
    }

    pub fn route_params(&self, element: NodeId) -> Option<&Params> {
        self.param_set(element).map(|set| &set.route)
    }

    pub fn query_params(&self, element: NodeId) -> Option<&Params> {
        self.param_set(element).map(|set| &set.query)
    }

    pub fn param_set(&self, element: NodeId) -> Option<&ParamSet> {
        let id = self.by_element.get(&element)?;
        self.instances.get(id).map(|i| &i.params)
    }

    fn ensure_instance(&mut self, element: NodeId) -> Option<InstanceId> {
        if let Some(&id) = self.by_element.get(&element) {
            return Some(id);
        }
        let tag = self.dom.tag_name(element)?;
        let class_id = *self.registry.get(tag)?;
        let behavior = self.classes.get(&class_id)?.factory.instantiate();
        let id = InstanceId(self.next_id());
        self.instances.insert(
            id,
            Instance {
                element,
                class: class_id,
                behavior,
                state: Lifecycle::Unconnected,
                mount_root: element,
                mounted: false,
                wired: false,
                params: ParamSet::default(),
                listeners: Vec::new(),
                timing: HashMap::new(),
                scoped_sheet: None,
            },
        );
        self.by_element.insert(element, id);
        Some(id)
    }

    /// Nodes of the composed tree under (and including) `root`, in tree order.
    /// Content mounted while walking is visited too.
    fn connect_subtree(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if self.dom.is_element(node) {
                if let Some(id) = self.ensure_instance(node) {
                    self.connect(id);
                }
            }
            let mut next: Vec<NodeId> = self.dom.shadow_root(node).into_iter().collect();
            next.extend_from_slice(self.dom.children(node));
            stack.extend(next.into_iter().rev());
        }
    }

    fn disconnect_subtree(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if let Some(&id) = self.by_element.get(&node) {
                self.disconnect(id);
            }
            let mut next: Vec<NodeId> = self.dom.shadow_root(node).into_iter().collect();
            next.extend_from_slice(self.dom.children(node));
            stack.extend(next.into_iter().rev());
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Connection
    // ───────────────────────────────────────────────────────────────────────────

    fn connect(&mut self, id: InstanceId) {
        let fresh = match self.instances.get(&id) {
            Some(instance) if matches!(instance.state, Lifecycle::Connecting | Lifecycle::Connected) => return,
            Some(instance) => !instance.mounted,
            None => return,
        };
        self.run_connection(id, fresh);
    }

    /// Mount (when `fresh_content`), attach styles, interpolate parameters,
    /// run the connected callback and queue wiring. A remount replaces the
    /// mount root's content; the first mount appends to it.
    fn run_connection(&mut self, id: InstanceId, fresh_content: bool) {
        let Runtime {
            dom,
            document,
            services,
            scheduler,
            classes,
            instances,
            location,
            ..
        } = self;
        let Some(instance) = instances.get_mut(&id) else {
            return;
        };
        let Some(class) = classes.get(&instance.class) else {
            return;
        };
        let meta = &class.meta;
        instance.state = Lifecycle::Connecting;

        if fresh_content {
            if meta.shadow {
                instance.mount_root = dom.attach_shadow(instance.element);
            }
            if instance.mounted {
                dom.clear_children(instance.mount_root);
                if let Some(old) = instance.scoped_sheet.take() {
                    dom.remove_sheet(instance.mount_root, &old);
                }
            }
            let fragment = services.templates.fragment(&meta.template);
            fragment.instantiate(dom, instance.mount_root);
            instance.mounted = true;
        }

        if let Some(css) = meta.styles.as_deref() {
            instance.scoped_sheet = services.styles.attach(dom, instance.mount_root, css);
        }
        if let Some(css) = meta.global_styles.as_deref() {
            services.styles.attach(dom, *document, css);
            // Document styles do not reach into a shadow tree.
            if instance.mount_root != instance.element {
                services.styles.attach(dom, instance.mount_root, css);
            }
        }

        instance.params = params::compute_params(meta.route.as_ref().map(|r| r.path.as_str()), location);
        params::interpolate(dom, instance.mount_root, &instance.params.merged);

        let now = scheduler.now_ms();
        with_context(dom, now, instance, |behavior, ctx| behavior.connected(ctx));
        instance.state = Lifecycle::Connected;
        log::debug!("[sfc] <{}> connected", meta.tag);
        scheduler.queue_microtask(Task::Wire(id));
    }

    fn disconnect(&mut self, id: InstanceId) {
        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };
        if !matches!(instance.state, Lifecycle::Connecting | Lifecycle::Connected) {
            return;
        }
        instance.state = Lifecycle::Disconnected;
        for (node, listener) in instance.listeners.drain(..) {
            self.dom.remove_listener(node, listener);
        }
        instance.wired = false;
        let now = self.scheduler.now_ms();
        with_context(&mut self.dom, now, instance, |behavior, ctx| behavior.disconnected(ctx));
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Wiring
    // ───────────────────────────────────────────────────────────────────────────

    fn wire(&mut self, id: InstanceId) {
        let Runtime {
            dom,
            services,
            classes,
            instances,
            ..
        } = self;
        let Some(instance) = instances.get_mut(&id) else {
            return;
        };
        if instance.state != Lifecycle::Connected || instance.wired {
            return;
        }
        let Some(class) = classes.get(&instance.class) else {
            return;
        };
        let plan = services.plans.plan_for(instance.class, &class.meta.annotations);

        for entry in &plan.entries {
            let method_name = match entry {
                WiringEntry::Event { method_name, .. } | WiringEntry::Timing { method_name, .. } => method_name,
            };
            if !instance.behavior.has_method(method_name) {
                log::warn!("[sfc] <{}>: no method `{}` to wire", class.meta.tag, method_name);
                continue;
            }
            match entry {
                WiringEntry::Timing { kind, delay_ms, .. } => {
                    instance
                        .timing
                        .entry(method_name.clone())
                        .or_insert_with(|| TimingWrapper::new(*kind, *delay_ms));
                }
                WiringEntry::Event {
                    event_type,
                    selector,
                    ..
                } => {
                    let targets = match selector {
                        Some(selector) => match dom.query_selector_all(instance.mount_root, selector) {
                            Ok(targets) => targets,
                            Err(e) => {
                                log::warn!("[sfc] <{}>: cannot wire `{}`: {}", class.meta.tag, method_name, e);
                                continue;
                            }
                        },
                        None => vec![instance.element],
                    };
                    for target in targets {
                        let listener = dom.add_listener(
                            target,
                            event_type,
                            Binding {
                                instance: id,
                                method: method_name.clone(),
                            },
                        );
                        instance.listeners.push((target, listener));
                    }
                }
            }
        }
        instance.wired = true;
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Events and timing
    // ───────────────────────────────────────────────────────────────────────────

    /// Dispatch a bubbling event at `target`. Returns the number of listeners
    /// invoked. Microtasks queued by handlers run before returning.
    pub fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> usize {
        let mut calls = Vec::new();
        for node in self.dom.event_path(target) {
            for binding in self.dom.bindings_for(node, event_type) {
                calls.push((node, binding));
            }
        }

        for (current_target, binding) in &calls {
            let event = Event {
                event_type: event_type.to_string(),
                target,
                current_target: *current_target,
            };
            if let Err(e) = self.invoke(binding.instance, &binding.method, Some(event)) {
                log::warn!("[sfc] {} handler `{}` failed: {}", event_type, binding.method, e);
            }
        }
        self.run_microtasks();
        calls.len()
    }

    /// Call a component method through its timing wrapper, if any.
    pub fn call_method(&mut self, element: NodeId, method: &str) -> Result<(), RuntimeError> {
        let id = *self.by_element.get(&element).ok_or(RuntimeError::NotAComponent)?;
        self.invoke(id, method, None)
    }

    fn invoke(&mut self, id: InstanceId, method: &str, event: Option<Event>) -> Result<(), RuntimeError> {
        let now = self.scheduler.now_ms();
        let instance = self.instances.get_mut(&id).ok_or(RuntimeError::NotAComponent)?;
        let Some(wrapper) = instance.timing.get_mut(method) else {
            return self.call_now(id, method, event.as_ref());
        };
        match wrapper.decide(now) {
            TimingDecision::Run => self.call_now(id, method, event.as_ref()),
            TimingDecision::Skip => Ok(()),
            TimingDecision::Schedule { cancel, delay_ms } => {
                if let Some(timer) = cancel {
                    self.scheduler.clear_timeout(timer);
                }
                let timer = self.scheduler.set_timeout(
                    delay_ms,
                    Task::Fire {
                        instance: id,
                        method: method.to_string(),
                        event,
                    },
                );
                wrapper.scheduled(timer);
                Ok(())
            }
        }
    }

    fn call_now(&mut self, id: InstanceId, method: &str, event: Option<&Event>) -> Result<(), RuntimeError> {
        let now = self.scheduler.now_ms();
        let instance = self.instances.get_mut(&id).ok_or(RuntimeError::NotAComponent)?;
        with_context(&mut self.dom, now, instance, |behavior, ctx| behavior.call(method, ctx, event))
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Wire(id) => self.wire(id),
            Task::Fire {
                instance,
                method,
                event,
            } => {
                let now = self.scheduler.now_ms();
                if let Some(wrapper) = self
                    .instances
                    .get_mut(&instance)
                    .and_then(|i| i.timing.get_mut(&method))
                {
                    wrapper.fired(now);
                }
                if let Err(e) = self.call_now(instance, &method, event.as_ref()) {
                    log::warn!("[sfc] delayed call of `{}` failed: {}", method, e);
                }
            }
        }
    }

    /// Drain the microtask queue. Returns the number of tasks run.
    pub fn run_microtasks(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.scheduler.pop_microtask() {
            self.run_task(task);
            ran += 1;
        }
        ran
    }

    /// Advance the virtual clock by `ms`, firing due timers in order.
    pub fn advance_time(&mut self, ms: u64) {
        let deadline = self.scheduler.now_ms() + ms;
        self.run_microtasks();
        while let Some(task) = self.scheduler.pop_due(deadline) {
            self.run_task(task);
            self.run_microtasks();
        }
        self.scheduler.set_now(deadline);
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Hot update
    // ───────────────────────────────────────────────────────────────────────────

    /// Replace template and styles for every class generated from `source_id`
    /// and re-run connection for its connected instances. Listeners are
    /// removed before the content is replaced and wiring is queued again, so
    /// nothing is registered twice. Returns the number of instances updated.
    pub fn hot_update(
        &mut self,
        source_id: &str,
        template: &str,
        styles: Option<&str>,
        global_styles: Option<&str>,
    ) -> usize {
        let mut class_ids = Vec::new();
        for (id, class) in self.classes.iter_mut() {
            if class.meta.source_id.as_deref() == Some(source_id) {
                class.meta.template = template.to_string();
                class.meta.styles = styles.map(str::to_string);
                class.meta.global_styles = global_styles.map(str::to_string);
                class_ids.push(*id);
            }
        }

        let targets: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, i)| i.state == Lifecycle::Connected && class_ids.contains(&i.class))
            .map(|(id, _)| *id)
            .collect();

        for id in &targets {
            if let Some(instance) = self.instances.get_mut(id) {
                for (node, listener) in instance.listeners.drain(..) {
                    self.dom.remove_listener(node, listener);
                }
                instance.wired = false;
            }
            self.run_connection(*id, true);
        }
        log::info!("[sfc] hot update of {}: {} instance(s)", source_id, targets.len());
        targets.len()
    }
}
