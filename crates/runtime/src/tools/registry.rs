//! Merged, name-keyed catalog over every tool source.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, info, trace, warn};

use super::{
    LocalTools, McpTools, RemoteTools, ToolCallRequest, ToolCallResult, ToolDeclaration, ToolError,
};

/// Where a tool lives.
#[derive(Debug, Clone)]
pub enum ToolSource {
    Local(LocalTools),
    Remote(RemoteTools),
    Mcp(McpTools),
}

/// Kind of a [`ToolSource`], ordered by precedence: when two sources
/// declare the same name, the smaller kind wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Local,
    Remote,
    Mcp,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
            Self::Mcp => f.write_str("mcp"),
        }
    }
}

impl ToolSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Local(_) => SourceKind::Local,
            Self::Remote(_) => SourceKind::Remote,
            Self::Mcp(_) => SourceKind::Mcp,
        }
    }

    pub fn declarations(&self) -> &[ToolDeclaration] {
        match self {
            Self::Local(tools) => tools.declarations(),
            Self::Remote(tools) => tools.declarations(),
            Self::Mcp(tools) => tools.declarations(),
        }
    }

    pub async fn call(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        match self {
            Self::Local(tools) => tools.call(name, args).await,
            Self::Remote(tools) => tools.call(name, args).await,
            Self::Mcp(tools) => tools.call(name, args).await,
        }
    }
}

impl From<LocalTools> for ToolSource {
    fn from(tools: LocalTools) -> Self {
        Self::Local(tools)
    }
}

impl From<RemoteTools> for ToolSource {
    fn from(tools: RemoteTools) -> Self {
        Self::Remote(tools)
    }
}

impl From<McpTools> for ToolSource {
    fn from(tools: McpTools) -> Self {
        Self::Mcp(tools)
    }
}

/// One catalog over local, remote and MCP tools.
///
/// Precedence is `Local > Remote > Mcp` regardless of registration order;
/// between two sources of the same kind the one registered first wins.
/// Registration happens once at startup, after which the registry is only
/// read and may be shared across concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    sources: Vec<ToolSource>,
    /// Winning source index for each tool name.
    index: HashMap<String, usize>,
    /// Names in advertised order.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a source's tools into the catalog.
    pub fn register(&mut self, source: impl Into<ToolSource>) {
        let source = source.into();
        let kind = source.kind();

        for declaration in source.declarations() {
            if let Some(&existing) = self.index.get(declaration.name()) {
                let existing = self.sources[existing].kind();
                if kind < existing {
                    warn!(tool = declaration.name(), winner = %kind, shadowed = %existing, "tool name collision");
                } else {
                    warn!(tool = declaration.name(), winner = %existing, shadowed = %kind, "tool name collision");
                }
            }
        }

        info!(
            source = %kind,
            tools = source.declarations().len(),
            "registered tool source"
        );
        self.sources.push(source);
        self.rebuild();
    }

    pub fn with_source(mut self, source: impl Into<ToolSource>) -> Self {
        self.register(source);
        self
    }

    fn rebuild(&mut self) {
        let mut by_precedence: Vec<usize> = (0..self.sources.len()).collect();
        by_precedence.sort_by_key(|&i| self.sources[i].kind());

        self.index.clear();
        self.order.clear();
        for i in by_precedence {
            for declaration in self.sources[i].declarations() {
                if !self.index.contains_key(declaration.name()) {
                    self.index.insert(declaration.name().to_string(), i);
                    self.order.push(declaration.name().to_string());
                }
            }
        }
    }

    /// Every registered source in registration order, shadowed ones included.
    pub fn sources(&self) -> &[ToolSource] {
        &self.sources
    }

    /// The source that would handle `name`.
    pub fn resolve(&self, name: &str) -> Option<&ToolSource> {
        self.index.get(name).map(|&i| &self.sources[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every reachable declaration, highest-precedence sources first.
    pub fn declarations(&self) -> Vec<&ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| {
                let source = self.resolve(name)?;
                source.declarations().iter().find(|d| d.name() == name)
            })
            .collect()
    }

    /// Run one requested call. Never fails: unknown tools and handler
    /// errors come back as error results.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResult {
        let Some(source) = self.resolve(&request.name) else {
            warn!(tool = %request.name, id = %request.id, "unknown tool requested");
            return ToolCallResult::error(
                request,
                format!("{} is not a valid function", request.name),
            );
        };

        if let Err(e) = check_required(source, request) {
            warn!(tool = %request.name, id = %request.id, error = %e, "rejecting tool call");
            return ToolCallResult::error(request, e.to_string());
        }

        debug!(
            tool = %request.name,
            id = %request.id,
            source = %source.kind(),
            args = %serde_json::Value::Object(request.args.clone()),
            "invoking tool"
        );

        match source.call(&request.name, &request.args).await {
            Ok(output) => {
                trace!(tool = %request.name, id = %request.id, %output, "tool returned");
                ToolCallResult::success(request, output)
            }
            Err(e) => {
                warn!(tool = %request.name, id = %request.id, error = %e, "tool failed");
                ToolCallResult::error(request, e.to_string())
            }
        }
    }

    /// Convenience over [`dispatch`](Self::dispatch) for a bare name and
    /// arguments.
    pub async fn call(&self, name: &str, args: Map<String, Value>) -> ToolCallResult {
        self.dispatch(&ToolCallRequest::new(name, args)).await
    }
}

/// Every argument the declaration marks as required must be present.
fn check_required(source: &ToolSource, request: &ToolCallRequest) -> Result<(), ToolError> {
    let Some(declaration) = source
        .declarations()
        .iter()
        .find(|d| d.name() == request.name)
    else {
        return Ok(());
    };
    match declaration
        .required()
        .iter()
        .find(|arg| !request.args.contains_key(arg.as_str()))
    {
        Some(missing) => Err(ToolError::InvalidInput(format!(
            "missing required argument `{missing}`"
        ))),
        None => Ok(()),
    }
}
