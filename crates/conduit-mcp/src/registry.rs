//! Tool, resource, and prompt registry.
//!
//! Three maps behind a read-mostly lock discipline: many concurrent readers,
//! exclusive writers during registration. Registration is idempotent per key
//! (re-registering replaces). Resource URIs containing `{var}` placeholders
//! register as templates; static URIs always win over templates when a read
//! request matches both.
//!
//! Resource subscriptions live here too, keyed `(uri, session)` so neither
//! the registry nor the session owns the other; session teardown sweeps its
//! pairs out.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::handler::{PromptHandler, ResourceHandler, ToolHandler};
use crate::protocol::content::{
    PromptArgument, PromptInfo, ResourceInfo, ResourceTemplateInfo, ToolInfo,
};

/// A registered tool.
pub struct Tool {
    pub info: ToolInfo,
    pub supports_progress: bool,
    pub supports_cancellation: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Describe a tool with its JSON-Schema input contract.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            info: ToolInfo {
                name: name.into(),
                description: description.into(),
                input_schema,
                annotations: None,
            },
            supports_progress: false,
            supports_cancellation: false,
            handler,
        }
    }

    /// Mark the tool as emitting progress notifications.
    #[must_use]
    pub fn with_progress(mut self) -> Self {
        self.supports_progress = true;
        self
    }

    /// Mark the tool as observing cancellation.
    #[must_use]
    pub fn with_cancellation(mut self) -> Self {
        self.supports_cancellation = true;
        self
    }

    /// Attach client-facing annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: serde_json::Value) -> Self {
        self.info.annotations = Some(annotations);
        self
    }
}

/// A registered resource; templated iff the URI contains `{`.
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub handler: Arc<dyn ResourceHandler>,
}

impl Resource {
    /// Describe a resource (or template, when `uri` carries placeholders).
    #[must_use]
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn ResourceHandler>,
    ) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            handler,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Whether this registers as a template.
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.uri.contains('{')
    }
}

/// A registered prompt.
pub struct Prompt {
    pub info: PromptInfo,
    pub handler: Arc<dyn PromptHandler>,
}

impl Prompt {
    /// Describe a prompt and its arguments.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        arguments: Vec<PromptArgument>,
        handler: Arc<dyn PromptHandler>,
    ) -> Self {
        Self {
            info: PromptInfo { name: name.into(), description, arguments },
            handler,
        }
    }
}

/// Which category of the registry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Tools,
    Resources,
    Prompts,
}

impl RegistryChange {
    /// The matching `listChanged` notification method.
    #[must_use]
    pub fn notification_method(self) -> &'static str {
        match self {
            Self::Tools => "notifications/tools/list_changed",
            Self::Resources => "notifications/resources/list_changed",
            Self::Prompts => "notifications/prompts/list_changed",
        }
    }
}

/// A successful resource lookup.
pub struct ResolvedResource {
    pub uri: String,
    pub params: HashMap<String, String>,
    pub handler: Arc<dyn ResourceHandler>,
}

struct TemplateEntry {
    info: ResourceTemplateInfo,
    template: UriTemplate,
    handler: Arc<dyn ResourceHandler>,
}

/// The registry proper.
#[derive(Default)]
pub struct Registry {
    tools: RwLock<BTreeMap<String, Arc<Tool>>>,
    resources: RwLock<BTreeMap<String, Arc<Resource>>>,
    templates: RwLock<BTreeMap<String, Arc<TemplateEntry>>>,
    prompts: RwLock<BTreeMap<String, Arc<Prompt>>>,
    subscriptions: RwLock<HashSet<(String, String)>>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a tool. Returns `true` when a prior entry was
    /// replaced.
    pub fn register_tool(&self, tool: Tool) -> bool {
        let name = tool.info.name.clone();
        write(&self.tools).insert(name, Arc::new(tool)).is_some()
    }

    /// Remove a tool.
    pub fn remove_tool(&self, name: &str) -> bool {
        write(&self.tools).remove(name).is_some()
    }

    /// Look up a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<Tool>> {
        read(&self.tools).get(name).cloned()
    }

    /// Every tool descriptor, name-ordered.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        read(&self.tools).values().map(|t| t.info.clone()).collect()
    }

    /// Register (or replace) a resource; URIs with `{var}` placeholders
    /// land in the template table.
    pub fn register_resource(&self, resource: Resource) -> bool {
        if resource.is_template() {
            let template = UriTemplate::parse(&resource.uri);
            let entry = TemplateEntry {
                info: ResourceTemplateInfo {
                    uri_template: resource.uri.clone(),
                    name: resource.name,
                    description: resource.description,
                    mime_type: resource.mime_type,
                },
                template,
                handler: resource.handler,
            };
            write(&self.templates)
                .insert(resource.uri, Arc::new(entry))
                .is_some()
        } else {
            let uri = resource.uri.clone();
            write(&self.resources).insert(uri, Arc::new(resource)).is_some()
        }
    }

    /// Remove a resource or template by its registered URI.
    pub fn remove_resource(&self, uri: &str) -> bool {
        write(&self.resources).remove(uri).is_some()
            || write(&self.templates).remove(uri).is_some()
    }

    /// Static resource descriptors, URI-ordered.
    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        read(&self.resources)
            .values()
            .map(|r| ResourceInfo {
                uri: r.uri.clone(),
                name: r.name.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            })
            .collect()
    }

    /// Template descriptors, URI-ordered.
    pub fn list_templates(&self) -> Vec<ResourceTemplateInfo> {
        read(&self.templates).values().map(|t| t.info.clone()).collect()
    }

    /// Resolve a read request: static URIs first, then the most specific
    /// matching template (most literal segments, then fewest variables).
    pub fn resolve_resource(&self, uri: &str) -> Option<ResolvedResource> {
        if let Some(resource) = read(&self.resources).get(uri) {
            return Some(ResolvedResource {
                uri: uri.to_owned(),
                params: HashMap::new(),
                handler: Arc::clone(&resource.handler),
            });
        }

        let templates = read(&self.templates);
        let mut best: Option<(&Arc<TemplateEntry>, HashMap<String, String>)> = None;
        for entry in templates.values() {
            if let Some(params) = entry.template.match_uri(uri) {
                let better = match &best {
                    None => true,
                    Some((current, _)) => {
                        entry.template.specificity() > current.template.specificity()
                    }
                };
                if better {
                    best = Some((entry, params));
                }
            }
        }
        best.map(|(entry, params)| ResolvedResource {
            uri: uri.to_owned(),
            params,
            handler: Arc::clone(&entry.handler),
        })
    }

    /// Register (or replace) a prompt.
    pub fn register_prompt(&self, prompt: Prompt) -> bool {
        let name = prompt.info.name.clone();
        write(&self.prompts).insert(name, Arc::new(prompt)).is_some()
    }

    /// Remove a prompt.
    pub fn remove_prompt(&self, name: &str) -> bool {
        write(&self.prompts).remove(name).is_some()
    }

    /// Look up a prompt by name.
    pub fn get_prompt(&self, name: &str) -> Option<Arc<Prompt>> {
        read(&self.prompts).get(name).cloned()
    }

    /// Every prompt descriptor, name-ordered.
    pub fn list_prompts(&self) -> Vec<PromptInfo> {
        read(&self.prompts).values().map(|p| p.info.clone()).collect()
    }

    /// Subscribe a session to updates for `uri`. Returns `false` when the
    /// subscription already existed.
    pub fn subscribe(&self, uri: &str, session_id: &str) -> bool {
        write(&self.subscriptions).insert((uri.to_owned(), session_id.to_owned()))
    }

    /// Drop one subscription.
    pub fn unsubscribe(&self, uri: &str, session_id: &str) -> bool {
        write(&self.subscriptions).remove(&(uri.to_owned(), session_id.to_owned()))
    }

    /// Sessions subscribed to `uri`.
    pub fn subscribers(&self, uri: &str) -> Vec<String> {
        read(&self.subscriptions)
            .iter()
            .filter(|(u, _)| u == uri)
            .map(|(_, session)| session.clone())
            .collect()
    }

    /// Sweep a closed session's subscriptions.
    pub fn drop_session(&self, session_id: &str) {
        write(&self.subscriptions).retain(|(_, s)| s != session_id);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tools", &read(&self.tools).len())
            .field("resources", &read(&self.resources).len())
            .field("templates", &read(&self.templates).len())
            .field("prompts", &read(&self.prompts).len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A parsed `{var}` URI template.
struct UriTemplate {
    segments: Vec<TemplateSegment>,
}

enum TemplateSegment {
    Literal(String),
    /// `prefix{var}suffix` within one `/`-delimited segment.
    Capture {
        prefix: String,
        var: String,
        suffix: String,
    },
}

impl UriTemplate {
    fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .map(|segment| {
                let (Some(open), Some(close)) = (segment.find('{'), segment.rfind('}')) else {
                    return TemplateSegment::Literal(segment.to_owned());
                };
                if close <= open {
                    return TemplateSegment::Literal(segment.to_owned());
                }
                TemplateSegment::Capture {
                    prefix: segment[..open].to_owned(),
                    var: segment[open + 1..close].to_owned(),
                    suffix: segment[close + 1..].to_owned(),
                }
            })
            .collect();
        Self { segments }
    }

    /// Match a concrete URI, producing the captured parameters.
    fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = uri.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                TemplateSegment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                TemplateSegment::Capture { prefix, var, suffix } => {
                    let captured = part
                        .strip_prefix(prefix.as_str())?
                        .strip_suffix(suffix.as_str())?;
                    if captured.is_empty() {
                        return None;
                    }
                    params.insert(var.clone(), captured.to_owned());
                }
            }
        }
        Some(params)
    }

    /// Ranking key: more literal segments beat fewer; fewer captures break
    /// ties.
    fn specificity(&self) -> (usize, isize) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, TemplateSegment::Literal(_)))
            .count();
        let captures = (self.segments.len() - literals) as isize;
        (literals, -captures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::McpResult;
    use crate::handler::RequestContext;
    use crate::protocol::content::ResourceContents;

    struct EchoResource;

    #[async_trait::async_trait]
    impl ResourceHandler for EchoResource {
        async fn read(
            &self,
            uri: &str,
            _params: &HashMap<String, String>,
            _cx: &RequestContext,
        ) -> McpResult<Vec<ResourceContents>> {
            Ok(vec![ResourceContents::text(uri, "text/plain", "echo")])
        }
    }

    fn resource(uri: &str) -> Resource {
        Resource::new(uri, uri, Arc::new(EchoResource))
    }

    #[test]
    fn test_template_matching_captures_vars() {
        let template = UriTemplate::parse("file://notes/{id}");
        let params = template.match_uri("file://notes/42").unwrap();
        assert_eq!(params["id"], "42");
        assert!(template.match_uri("file://notes/42/extra").is_none());
        assert!(template.match_uri("file://other/42").is_none());
    }

    #[test]
    fn test_template_prefix_suffix_within_segment() {
        let template = UriTemplate::parse("db://table/row-{id}.json");
        let params = template.match_uri("db://table/row-17.json").unwrap();
        assert_eq!(params["id"], "17");
        assert!(template.match_uri("db://table/row-.json").is_none());
    }

    #[test]
    fn test_template_multiple_vars() {
        let template = UriTemplate::parse("repo://{owner}/{name}/readme");
        let params = template.match_uri("repo://alice/demo/readme").unwrap();
        assert_eq!(params["owner"], "alice");
        assert_eq!(params["name"], "demo");
    }

    #[test]
    fn test_static_wins_over_template() {
        let registry = Registry::new();
        registry.register_resource(resource("notes://{id}"));
        registry.register_resource(resource("notes://pinned"));

        let hit = registry.resolve_resource("notes://pinned").unwrap();
        assert!(hit.params.is_empty());

        let hit = registry.resolve_resource("notes://42").unwrap();
        assert_eq!(hit.params["id"], "42");
    }

    #[test]
    fn test_most_specific_template_wins() {
        let registry = Registry::new();
        registry.register_resource(resource("api://{section}/{id}"));
        registry.register_resource(resource("api://users/{id}"));

        let hit = registry.resolve_resource("api://users/9").unwrap();
        assert_eq!(hit.params.len(), 1);
        assert_eq!(hit.params["id"], "9");
    }

    #[test]
    fn test_resource_not_found() {
        let registry = Registry::new();
        registry.register_resource(resource("mem://only"));
        assert!(registry.resolve_resource("mem://missing").is_none());
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = Registry::new();
        assert!(!registry.register_resource(resource("mem://a")));
        assert!(registry.register_resource(resource("mem://a")));
        assert_eq!(registry.list_resources().len(), 1);
    }

    #[test]
    fn test_subscriptions_keyed_by_uri_and_session() {
        let registry = Registry::new();
        assert!(registry.subscribe("mem://a", "s1"));
        assert!(!registry.subscribe("mem://a", "s1"));
        assert!(registry.subscribe("mem://a", "s2"));
        assert!(registry.subscribe("mem://b", "s1"));

        let mut subs = registry.subscribers("mem://a");
        subs.sort();
        assert_eq!(subs, vec!["s1", "s2"]);

        registry.drop_session("s1");
        assert_eq!(registry.subscribers("mem://a"), vec!["s2"]);
        assert!(registry.subscribers("mem://b").is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let registry = Registry::new();
        registry.subscribe("mem://a", "s1");
        assert!(registry.unsubscribe("mem://a", "s1"));
        assert!(!registry.unsubscribe("mem://a", "s1"));
        assert!(registry.subscribers("mem://a").is_empty());
    }
}
