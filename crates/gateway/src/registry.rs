//! Capability registry
//!
//! Holds every tool, prompt and resource published on the aggregate endpoint
//! together with where calls to it go. Backend capabilities are republished
//! as `{backend}_{original}`; a fixed built-in status tool, prompt and
//! resource are always present.
//!
//! The registry is mutated only while backends are being connected and is
//! shared read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::mcp::router::{publish_name, tag_description, UriTemplate};
use crate::mcp::schema::{prompt_arguments, translate, ValidatorShape};
use crate::mcp::types::*;
use crate::mcp::{McpClientError, McpResult, McpSession};
use crate::moderation::ModerationGate;
use crate::orchestrator::ConnectionReport;

/// Name shared by the built-in status tool and prompt
pub const STATUS_NAME: &str = "gateway_status";

/// Address of the built-in status resource
pub const STATUS_URI: &str = "gateway://status";

const BUILT_IN_BACKEND: &str = "gateway";

/// Kind of a published capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Tool => write!(f, "tool"),
            CapabilityKind::Prompt => write!(f, "prompt"),
            CapabilityKind::Resource => write!(f, "resource"),
        }
    }
}

/// What the registry knows about one published capability
#[derive(Debug, Clone)]
pub struct CapabilityRecord {
    pub backend: String,
    pub original: String,
    pub published: String,
    pub kind: CapabilityKind,
    pub schema: ValidatorShape,
}

/// Outcome of listing one capability kind on a backend
#[derive(Debug)]
pub enum Enumeration<T> {
    Present(Vec<T>),
    /// Not advertised, or the backend answered method-not-found
    Absent,
    Failed(McpClientError),
}

/// List one capability kind, turning "not supported" into [`Enumeration::Absent`]
pub async fn enumerate<T>(
    advertised: bool,
    list: impl Future<Output = McpResult<Vec<T>>>,
) -> Enumeration<T> {
    if !advertised {
        return Enumeration::Absent;
    }

    match list.await {
        Ok(items) => Enumeration::Present(items),
        Err(e) if e.is_method_not_found() => Enumeration::Absent,
        Err(e) => Enumeration::Failed(e),
    }
}

/// Per-backend result of [`CapabilityRegistry::register_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSummary {
    pub backend: String,
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
    /// Kinds the backend does not offer
    pub absent: Vec<CapabilityKind>,
    /// Kinds whose listing failed and were skipped
    pub failed: Vec<CapabilityKind>,
    /// Capabilities rejected because their published identifier was taken
    pub collisions: usize,
}

#[derive(Clone)]
enum Target {
    BuiltIn,
    Backend(Arc<McpSession>),
}

struct ToolEntry {
    record: CapabilityRecord,
    definition: Tool,
    target: Target,
}

struct PromptEntry {
    record: CapabilityRecord,
    definition: Prompt,
    target: Target,
}

enum ResourceAddress {
    Static(Resource),
    Template {
        template: UriTemplate,
        definition: ResourceTemplate,
    },
}

struct ResourceEntry {
    record: CapabilityRecord,
    address: ResourceAddress,
    target: Target,
}

/// Everything published on the aggregate endpoint
pub struct CapabilityRegistry {
    gate: ModerationGate,
    tools: Vec<ToolEntry>,
    tool_index: HashMap<String, usize>,
    prompts: Vec<PromptEntry>,
    prompt_index: HashMap<String, usize>,
    resources: Vec<ResourceEntry>,
    resource_names: HashMap<String, usize>,
    resource_uris: HashMap<String, usize>,
    status: Option<ConnectionReport>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("tools", &self.tools.len())
            .field("prompts", &self.prompts.len())
            .field("resources", &self.resources.len())
            .field("gate", &self.gate)
            .finish()
    }
}

impl CapabilityRegistry {
    /// Create a registry holding only the built-in status capabilities
    pub fn new(gate: ModerationGate) -> Self {
        let mut registry = Self {
            gate,
            tools: Vec::new(),
            tool_index: HashMap::new(),
            prompts: Vec::new(),
            prompt_index: HashMap::new(),
            resources: Vec::new(),
            resource_names: HashMap::new(),
            resource_uris: HashMap::new(),
            status: None,
        };
        registry.register_built_ins();
        registry
    }

    fn register_built_ins(&mut self) {
        let record = |kind| CapabilityRecord {
            backend: BUILT_IN_BACKEND.to_string(),
            original: "status".to_string(),
            published: STATUS_NAME.to_string(),
            kind,
            schema: ValidatorShape::default(),
        };

        self.insert_tool(ToolEntry {
            record: record(CapabilityKind::Tool),
            definition: Tool {
                name: STATUS_NAME.to_string(),
                description: Some(
                    "Report which backends are connected, what each contributes, \
                     and whether moderation is enabled"
                        .to_string(),
                ),
                input_schema: ValidatorShape::default().to_json_schema(),
            },
            target: Target::BuiltIn,
        });

        self.insert_prompt(PromptEntry {
            record: record(CapabilityKind::Prompt),
            definition: Prompt {
                name: STATUS_NAME.to_string(),
                description: Some("Summarize the gateway's backend connection status".to_string()),
                arguments: Some(Vec::new()),
            },
            target: Target::BuiltIn,
        });

        self.insert_resource(ResourceEntry {
            record: record(CapabilityKind::Resource),
            address: ResourceAddress::Static(Resource {
                uri: STATUS_URI.to_string(),
                name: STATUS_NAME.to_string(),
                description: Some("Gateway connection and moderation status".to_string()),
                mime_type: Some("application/json".to_string()),
            }),
            target: Target::BuiltIn,
        });
    }

    pub fn gate(&self) -> &ModerationGate {
        &self.gate
    }

    /// Attach the connection report served by the built-in status capabilities
    pub fn set_status(&mut self, report: ConnectionReport) {
        self.status = Some(report);
    }

    pub fn status(&self) -> Option<&ConnectionReport> {
        self.status.as_ref()
    }

    /// Discover and republish everything `session` offers.
    ///
    /// Tools, prompts and resources are listed independently; a kind that is
    /// absent or fails to list is skipped without affecting the others.
    pub async fn register_all(
        &mut self,
        backend: &str,
        session: Arc<McpSession>,
    ) -> RegistrationSummary {
        let mut summary = RegistrationSummary {
            backend: backend.to_string(),
            ..Default::default()
        };
        let capabilities = session.capabilities().clone();
        let target = Target::Backend(session.clone());

        // Tools
        match enumerate(capabilities.tools.is_some(), session.list_tools()).await {
            Enumeration::Present(tools) => {
                for tool in tools {
                    if self.add_tool(backend, tool, target.clone()) {
                        summary.tools += 1;
                    } else {
                        summary.collisions += 1;
                    }
                }
            }
            Enumeration::Absent => summary.absent.push(CapabilityKind::Tool),
            Enumeration::Failed(e) => {
                self.log_enumeration_failure(backend, CapabilityKind::Tool, e);
                summary.failed.push(CapabilityKind::Tool);
            }
        }

        // Prompts
        match enumerate(capabilities.prompts.is_some(), session.list_prompts()).await {
            Enumeration::Present(prompts) => {
                for prompt in prompts {
                    if self.add_prompt(backend, prompt, target.clone()) {
                        summary.prompts += 1;
                    } else {
                        summary.collisions += 1;
                    }
                }
            }
            Enumeration::Absent => summary.absent.push(CapabilityKind::Prompt),
            Enumeration::Failed(e) => {
                self.log_enumeration_failure(backend, CapabilityKind::Prompt, e);
                summary.failed.push(CapabilityKind::Prompt);
            }
        }

        // Resources and resource templates
        let advertised = capabilities.resources.is_some();
        let resources = enumerate(advertised, session.list_resources()).await;
        let templates = enumerate(advertised, session.list_resource_templates()).await;

        match (resources, templates) {
            (Enumeration::Absent, Enumeration::Absent) => {
                summary.absent.push(CapabilityKind::Resource);
            }
            (Enumeration::Failed(e), Enumeration::Failed(_) | Enumeration::Absent) => {
                self.log_enumeration_failure(backend, CapabilityKind::Resource, e);
                summary.failed.push(CapabilityKind::Resource);
            }
            (resources, templates) => {
                match resources {
                    Enumeration::Present(resources) => {
                        for resource in resources {
                            if self.add_resource(backend, resource, target.clone()) {
                                summary.resources += 1;
                            } else {
                                summary.collisions += 1;
                            }
                        }
                    }
                    Enumeration::Failed(e) => {
                        self.log_enumeration_failure(backend, CapabilityKind::Resource, e);
                        summary.failed.push(CapabilityKind::Resource);
                    }
                    Enumeration::Absent => {}
                }
                match templates {
                    Enumeration::Present(templates) => {
                        for template in templates {
                            if self.add_resource_template(backend, template, target.clone()) {
                                summary.resources += 1;
                            } else {
                                summary.collisions += 1;
                            }
                        }
                    }
                    Enumeration::Failed(e) => {
                        self.log_enumeration_failure(backend, CapabilityKind::Resource, e);
                        if !summary.failed.contains(&CapabilityKind::Resource) {
                            summary.failed.push(CapabilityKind::Resource);
                        }
                    }
                    Enumeration::Absent => {}
                }
            }
        }

        tracing::info!(
            backend = %backend,
            tools = summary.tools,
            prompts = summary.prompts,
            resources = summary.resources,
            collisions = summary.collisions,
            "Registered backend capabilities"
        );

        summary
    }

    fn log_enumeration_failure(&self, backend: &str, kind: CapabilityKind, source: McpClientError) {
        let err = GatewayError::Enumeration {
            backend: backend.to_string(),
            kind,
            source,
        };
        tracing::warn!(backend = %backend, kind = %kind, error = %err, "Skipping capability kind");
    }

    fn log_collision(backend: &str, kind: CapabilityKind, published: &str) {
        tracing::warn!(
            backend = %backend,
            kind = %kind,
            published = %published,
            "Published identifier already taken, keeping the first registration"
        );
    }

    fn insert_tool(&mut self, entry: ToolEntry) -> bool {
        if self.tool_index.contains_key(&entry.record.published) {
            Self::log_collision(&entry.record.backend, CapabilityKind::Tool, &entry.record.published);
            return false;
        }
        self.tool_index
            .insert(entry.record.published.clone(), self.tools.len());
        self.tools.push(entry);
        true
    }

    fn insert_prompt(&mut self, entry: PromptEntry) -> bool {
        if self.prompt_index.contains_key(&entry.record.published) {
            Self::log_collision(&entry.record.backend, CapabilityKind::Prompt, &entry.record.published);
            return false;
        }
        self.prompt_index
            .insert(entry.record.published.clone(), self.prompts.len());
        self.prompts.push(entry);
        true
    }

    fn insert_resource(&mut self, entry: ResourceEntry) -> bool {
        let uri = match &entry.address {
            ResourceAddress::Static(resource) => resource.uri.clone(),
            ResourceAddress::Template { template, .. } => template.as_str().to_string(),
        };

        if self.resource_names.contains_key(&entry.record.published)
            || self.resource_uris.contains_key(&uri)
        {
            Self::log_collision(&entry.record.backend, CapabilityKind::Resource, &entry.record.published);
            return false;
        }

        let index = self.resources.len();
        self.resource_names
            .insert(entry.record.published.clone(), index);
        self.resource_uris.insert(uri, index);
        self.resources.push(entry);
        true
    }

    fn add_tool(&mut self, backend: &str, tool: Tool, target: Target) -> bool {
        let published = publish_name(backend, &tool.name);
        let schema = translate(&tool.input_schema);

        let definition = Tool {
            name: published.clone(),
            description: Some(tag_description(backend, tool.description.as_deref())),
            input_schema: schema.to_json_schema(),
        };

        self.insert_tool(ToolEntry {
            record: CapabilityRecord {
                backend: backend.to_string(),
                original: tool.name,
                published,
                kind: CapabilityKind::Tool,
                schema,
            },
            definition,
            target,
        })
    }

    fn add_prompt(&mut self, backend: &str, prompt: Prompt, target: Target) -> bool {
        let published = publish_name(backend, &prompt.name);
        let schema = prompt_arguments(prompt.arguments.as_deref().unwrap_or_default());

        let definition = Prompt {
            name: published.clone(),
            description: Some(tag_description(backend, prompt.description.as_deref())),
            arguments: prompt.arguments,
        };

        self.insert_prompt(PromptEntry {
            record: CapabilityRecord {
                backend: backend.to_string(),
                original: prompt.name,
                published,
                kind: CapabilityKind::Prompt,
                schema,
            },
            definition,
            target,
        })
    }

    fn add_resource(&mut self, backend: &str, resource: Resource, target: Target) -> bool {
        // A "static" resource whose address is parameterized is a template
        if UriTemplate::is_template(&resource.uri) {
            return self.add_resource_template(
                backend,
                ResourceTemplate {
                    uri_template: resource.uri,
                    name: resource.name,
                    description: resource.description,
                    mime_type: resource.mime_type,
                },
                target,
            );
        }

        let published = publish_name(backend, &resource.name);
        let record = CapabilityRecord {
            backend: backend.to_string(),
            original: resource.name.clone(),
            published: published.clone(),
            kind: CapabilityKind::Resource,
            schema: ValidatorShape::default(),
        };

        self.insert_resource(ResourceEntry {
            record,
            address: ResourceAddress::Static(Resource {
                uri: resource.uri,
                name: published,
                description: Some(tag_description(backend, resource.description.as_deref())),
                mime_type: resource.mime_type,
            }),
            target,
        })
    }

    fn add_resource_template(
        &mut self,
        backend: &str,
        template: ResourceTemplate,
        target: Target,
    ) -> bool {
        let published = publish_name(backend, &template.name);
        let record = CapabilityRecord {
            backend: backend.to_string(),
            original: template.name.clone(),
            published: published.clone(),
            kind: CapabilityKind::Resource,
            schema: ValidatorShape::default(),
        };

        let parsed = UriTemplate::parse(&template.uri_template);
        tracing::debug!(
            backend = %backend,
            template = %template.uri_template,
            variables = ?parsed.variables(),
            "Registering resource template"
        );

        self.insert_resource(ResourceEntry {
            record,
            address: ResourceAddress::Template {
                template: parsed,
                definition: ResourceTemplate {
                    uri_template: template.uri_template,
                    name: published,
                    description: Some(tag_description(backend, template.description.as_deref())),
                    mime_type: template.mime_type,
                },
            },
            target,
        })
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Record for a published tool, prompt or resource name
    pub fn record(&self, kind: CapabilityKind, published: &str) -> Option<&CapabilityRecord> {
        match kind {
            CapabilityKind::Tool => self
                .tool_index
                .get(published)
                .and_then(|i| self.tools.get(*i))
                .map(|e| &e.record),
            CapabilityKind::Prompt => self
                .prompt_index
                .get(published)
                .and_then(|i| self.prompts.get(*i))
                .map(|e| &e.record),
            CapabilityKind::Resource => self
                .resource_names
                .get(published)
                .and_then(|i| self.resources.get(*i))
                .map(|e| &e.record),
        }
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.prompts.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .filter_map(|e| match &e.address {
                ResourceAddress::Static(resource) => Some(resource.clone()),
                ResourceAddress::Template { .. } => None,
            })
            .collect()
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.resources
            .iter()
            .filter_map(|e| match &e.address {
                ResourceAddress::Static(_) => None,
                ResourceAddress::Template { definition, .. } => Some(definition.clone()),
            })
            .collect()
    }

    /// Exact static address first, then the first template that matches
    fn find_resource(&self, uri: &str) -> Option<&ResourceEntry> {
        if let Some(entry) = self
            .resource_uris
            .get(uri)
            .and_then(|i| self.resources.get(*i))
            .filter(|e| matches!(e.address, ResourceAddress::Static(_)))
        {
            return Some(entry);
        }

        self.resources.iter().find(|e| match &e.address {
            ResourceAddress::Template { template, .. } => template.matches(uri),
            ResourceAddress::Static(_) => false,
        })
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Invoke a published tool. Backend results, including backend errors,
    /// always pass through the moderation gate.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> GatewayResult<ToolCallResult> {
        let entry = self
            .tool_index
            .get(name)
            .and_then(|i| self.tools.get(*i))
            .ok_or_else(|| GatewayError::UnknownCapability {
                kind: CapabilityKind::Tool,
                name: name.to_string(),
            })?;

        entry.record.schema.validate(arguments.as_ref())?;

        let session = match &entry.target {
            Target::BuiltIn => return Ok(ToolCallResult::text(self.status_text())),
            Target::Backend(session) => session,
        };

        let result = match session.call_tool(&entry.record.original, arguments).await {
            Ok(result) => result,
            Err(source) => {
                let err = GatewayError::Invocation {
                    backend: entry.record.backend.clone(),
                    kind: CapabilityKind::Tool,
                    name: entry.record.original.clone(),
                    source,
                };
                tracing::warn!(tool = %entry.record.published, error = %err, "Backend tool call failed");
                ToolCallResult::error_text(err.to_string())
            }
        };

        Ok(self
            .gate
            .moderate(&entry.record.backend, &entry.record.published, result)
            .await?)
    }

    /// Render a published prompt. Never moderated.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> GatewayResult<PromptGetResult> {
        let entry = self
            .prompt_index
            .get(name)
            .and_then(|i| self.prompts.get(*i))
            .ok_or_else(|| GatewayError::UnknownCapability {
                kind: CapabilityKind::Prompt,
                name: name.to_string(),
            })?;

        entry.record.schema.validate(arguments.as_ref())?;

        let session = match &entry.target {
            Target::BuiltIn => {
                return Ok(PromptGetResult {
                    description: Some("Gateway status".to_string()),
                    messages: vec![PromptMessage::new(
                        "user",
                        Content::text(format!(
                            "Here is the current status of the MCP gateway. Summarize which \
                             backends are available and whether moderation is active.\n\n{}",
                            self.status_text()
                        )),
                    )],
                    ..Default::default()
                });
            }
            Target::Backend(session) => session,
        };

        match session.get_prompt(&entry.record.original, arguments).await {
            Ok(result) => Ok(result),
            Err(source) => {
                let err = GatewayError::Invocation {
                    backend: entry.record.backend.clone(),
                    kind: CapabilityKind::Prompt,
                    name: entry.record.original.clone(),
                    source,
                };
                tracing::warn!(prompt = %entry.record.published, error = %err, "Backend prompt failed");
                Ok(PromptGetResult {
                    description: Some(err.to_string()),
                    messages: vec![PromptMessage::new("assistant", Content::text(err.to_string()))],
                    ..Default::default()
                })
            }
        }
    }

    /// Read a resource by address. Never moderated.
    pub async fn read_resource(&self, uri: &str) -> GatewayResult<ResourceReadResult> {
        let entry = self
            .find_resource(uri)
            .ok_or_else(|| GatewayError::UnknownCapability {
                kind: CapabilityKind::Resource,
                name: uri.to_string(),
            })?;

        let session = match &entry.target {
            Target::BuiltIn => {
                return Ok(ResourceReadResult {
                    contents: vec![ResourceContent {
                        uri: STATUS_URI.to_string(),
                        mime_type: Some("application/json".to_string()),
                        text: Some(self.status_text()),
                        ..Default::default()
                    }],
                    ..Default::default()
                });
            }
            Target::Backend(session) => session,
        };

        match session.read_resource(uri).await {
            Ok(result) => Ok(result),
            Err(source) => {
                let err = GatewayError::Invocation {
                    backend: entry.record.backend.clone(),
                    kind: CapabilityKind::Resource,
                    name: uri.to_string(),
                    source,
                };
                tracing::warn!(resource = %entry.record.published, error = %err, "Backend resource read failed");
                Ok(ResourceReadResult {
                    contents: vec![ResourceContent {
                        uri: uri.to_string(),
                        mime_type: Some("text/plain".to_string()),
                        text: Some(err.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                })
            }
        }
    }

    /// Status report as pretty JSON text
    pub fn status_text(&self) -> String {
        let value = match &self.status {
            Some(report) => serde_json::to_value(report)
                .unwrap_or_else(|e| json!({ "error": e.to_string() })),
            None => json!({
                "state": "connecting",
                "moderationEnabled": self.gate.is_enabled(),
            }),
        };
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    }
}
