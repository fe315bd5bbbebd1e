//! Aggregate endpoint routing helpers
//!
//! Published identifiers, frontend method classification and resource URI
//! template matching.
//!
//! # Namespacing
//!
//! Tools, prompts and resources are published as `{backend}_{original}`
//! (e.g. `filesystem_read_file`). Resources keep their original URI and are
//! routed by it.

/// Separator between backend name and original identifier
pub const SEPARATOR: char = '_';

/// Published identifier for a backend capability
pub fn publish_name(backend: &str, original: &str) -> String {
    format!("{}{}{}", backend, SEPARATOR, original)
}

/// Description annotated with the backend it came from
pub fn tag_description(backend: &str, description: Option<&str>) -> String {
    match description {
        Some(desc) if !desc.trim().is_empty() => format!("[{}] {}", backend, desc),
        _ => format!("[{}]", backend),
    }
}

/// Frontend JSON-RPC methods the gateway understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpMethod {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
    PromptsList,
    PromptsGet,
    ResourcesList,
    ResourceTemplatesList,
    ResourcesRead,
    Unknown,
}

impl McpMethod {
    pub fn from_method(method: &str) -> Self {
        match method {
            "initialize" => McpMethod::Initialize,
            "ping" => McpMethod::Ping,
            "tools/list" => McpMethod::ToolsList,
            "tools/call" => McpMethod::ToolsCall,
            "prompts/list" => McpMethod::PromptsList,
            "prompts/get" => McpMethod::PromptsGet,
            "resources/list" => McpMethod::ResourcesList,
            "resources/templates/list" => McpMethod::ResourceTemplatesList,
            "resources/read" => McpMethod::ResourcesRead,
            _ => McpMethod::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    /// `{name}` matches one path segment; `{+name}` and `{#name}` may span `/`
    Variable { name: String, reserved: bool },
}

/// A parsed RFC 6570 level 1/2 URI template, used for matching only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    parts: Vec<TemplatePart>,
}

impl UriTemplate {
    /// Does this address contain a parameterized segment?
    pub fn is_template(uri: &str) -> bool {
        uri.find('{')
            .is_some_and(|open| uri[open..].contains('}'))
    }

    pub fn parse(raw: &str) -> Self {
        let mut parts = Vec::new();
        let mut rest = raw;

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            if open > 0 {
                parts.push(TemplatePart::Literal(rest[..open].to_string()));
            }
            let expr = &rest[open + 1..close];
            let (reserved, name) = match expr.chars().next() {
                Some('+') | Some('#') => (true, &expr[1..]),
                _ => (false, expr),
            };
            parts.push(TemplatePart::Variable {
                name: name.to_string(),
                reserved,
            });
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }

        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Variable names in template order
    pub fn variables(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                TemplatePart::Variable { name, .. } => Some(name.as_str()),
                TemplatePart::Literal(_) => None,
            })
            .collect()
    }

    /// Could `uri` have been produced by expanding this template?
    pub fn matches(&self, uri: &str) -> bool {
        match_parts(&self.parts, uri)
    }
}

/// Backtracking matcher: each variable takes a non-empty value and tries
/// every split point, so a literal repeated inside a value is not mistaken
/// for the delimiter. Plain variables stop at the first '/'.
fn match_parts(parts: &[TemplatePart], rest: &str) -> bool {
    let Some((part, tail)) = parts.split_first() else {
        return rest.is_empty();
    };

    match part {
        TemplatePart::Literal(literal) => match rest.strip_prefix(literal.as_str()) {
            Some(after) => match_parts(tail, after),
            None => false,
        },
        TemplatePart::Variable { reserved, .. } => {
            let limit = if *reserved {
                rest.len()
            } else {
                rest.find('/').unwrap_or(rest.len())
            };

            rest[..limit]
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .any(|end| match_parts(tail, &rest[end..]))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_name() {
        assert_eq!(publish_name("filesystem", "read_file"), "filesystem_read_file");
        assert_eq!(publish_name("git", "log"), "git_log");
    }

    #[test]
    fn test_tag_description() {
        assert_eq!(
            tag_description("github", Some("Create a new issue")),
            "[github] Create a new issue"
        );
        assert_eq!(tag_description("github", None), "[github]");
        assert_eq!(tag_description("github", Some("  ")), "[github]");
    }

    #[test]
    fn test_method_type() {
        assert_eq!(McpMethod::from_method("tools/list"), McpMethod::ToolsList);
        assert_eq!(McpMethod::from_method("tools/call"), McpMethod::ToolsCall);
        assert_eq!(
            McpMethod::from_method("resources/templates/list"),
            McpMethod::ResourceTemplatesList
        );
        assert_eq!(McpMethod::from_method("unknown/method"), McpMethod::Unknown);
    }

    #[test]
    fn test_is_template() {
        assert!(UriTemplate::is_template("file:///{path}"));
        assert!(!UriTemplate::is_template("file:///etc/hosts"));
        assert!(!UriTemplate::is_template("weird://{unclosed"));
    }

    #[test]
    fn test_template_variables() {
        let template = UriTemplate::parse("repo://{owner}/{repo}/blob/{+path}");
        assert_eq!(template.variables(), vec!["owner", "repo", "path"]);
        assert_eq!(template.as_str(), "repo://{owner}/{repo}/blob/{+path}");
    }

    #[test]
    fn test_template_matching() {
        let template = UriTemplate::parse("repo://{owner}/{repo}/blob/{+path}");
        assert!(template.matches("repo://rust-lang/rust/blob/src/lib.rs"));
        assert!(!template.matches("repo://rust-lang/rust/tree/src"));
        assert!(!template.matches("repo://rust-lang//blob/src"));

        let simple = UriTemplate::parse("users://{id}/profile");
        assert!(simple.matches("users://42/profile"));
        assert!(!simple.matches("users://42/7/profile"));
        assert!(!simple.matches("users:///profile"));

        let trailing = UriTemplate::parse("weather://{city}");
        assert!(trailing.matches("weather://paris"));
        assert!(!trailing.matches("weather://paris/today"));
        assert!(!trailing.matches("weather://"));
    }

    #[test]
    fn test_reserved_value_may_contain_following_literal() {
        let template = UriTemplate::parse("file://{+path}.txt");
        assert!(template.matches("file://a.txt"));
        assert!(template.matches("file://a.txt.txt"));
        assert!(template.matches("file://notes/a.txt/b.txt"));
        assert!(!template.matches("file://.txt"));
        assert!(!template.matches("file://a.txt.md"));

        let plain = UriTemplate::parse("file://{name}.txt");
        assert!(plain.matches("file://a.txt.txt"));
        assert!(!plain.matches("file://dir/a.txt"));
    }
}
