//! The input data model: a diagram is a finite, directed multigraph of nodes,
//! arrows and persons, exactly as authored. Nothing here is derived; see
//! [`crate::view`] for the indexed projection the scheduler actually runs on.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, Result};

/// Unique identifier of a node within a diagram.
pub type NodeId = String;

/// Unique identifier of a person (named LLM agent configuration).
pub type PersonId = String;

/// Identifies one execution of a diagram.
pub type ExecutionId = String;

/// The tag distinguishing a node's behavior and property schema.
///
/// `Generic` covers any type name not in the core's built-in set — the
/// engine still schedules it, it just cannot validate or run it without a
/// handler registered for that exact string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Condition,
    PersonJob,
    Endpoint,
    Db,
    Job,
    CodeJob,
    ApiJob,
    UserResponse,
    Notion,
    IntegratedApi,
    #[serde(untagged)]
    Generic(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Start => "start",
            NodeType::Condition => "condition",
            NodeType::PersonJob => "person_job",
            NodeType::Endpoint => "endpoint",
            NodeType::Db => "db",
            NodeType::Job => "job",
            NodeType::CodeJob => "code_job",
            NodeType::ApiJob => "api_job",
            NodeType::UserResponse => "user_response",
            NodeType::Notion => "notion",
            NodeType::IntegratedApi => "integrated_api",
            NodeType::Generic(s) => s.as_str(),
        }
    }

    pub fn is_person_job(&self) -> bool {
        matches!(self, NodeType::PersonJob)
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, NodeType::Condition)
    }

    pub fn is_start(&self) -> bool {
        matches!(self, NodeType::Start)
    }

    pub fn is_endpoint(&self) -> bool {
        matches!(self, NodeType::Endpoint)
    }
}

/// A node as authored: an id, a type tag, and a free-form property bag.
///
/// `max_iterations` defaults to 1; only `person_job` and other loop-capable
/// node types are expected to carry values greater than 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub person_id: Option<PersonId>,
}

impl Node {
    /// `max_iterations` read from `properties.max_iteration` (diagram authors
    /// use the singular form), falling back to `1`.
    pub fn max_iterations(&self) -> u32 {
        self.properties
            .get("max_iteration")
            .and_then(|v| v.as_u64())
            .map(|v| v.max(1) as u32)
            .unwrap_or(1)
    }
}

/// One endpoint of an arrow: `node_id[:handle]`, `handle` defaulting to `"default"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub node_id: NodeId,
    pub handle: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((node_id, handle)) => Endpoint {
                node_id: node_id.to_string(),
                handle: handle.to_string(),
            },
            None => Endpoint {
                node_id: raw.to_string(),
                handle: "default".to_string(),
            },
        }
    }
}

/// An arrow as authored, carrying optional branch/label/content-type metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arrow {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub branch: Option<bool>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Arrow {
    pub fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("default")
    }
}

/// A named LLM agent configuration referenced by `person_job` nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub service: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub api_key_id: Option<String>,
}

/// The diagram as authored: nodes, arrows, persons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagram {
    #[serde(default)]
    pub id: Option<String>,
    pub nodes: Vec<Node>,
    pub arrows: Vec<Arrow>,
    #[serde(default)]
    pub persons: Vec<Person>,
}

impl Diagram {
    /// Checks the structural invariants of §3: unique node ids, every arrow
    /// endpoint resolves, every person reference resolves.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.clone()) {
                return Err(CoreError::InvalidDiagram(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }

        for arrow in &self.arrows {
            let src = Endpoint::parse(&arrow.source);
            let dst = Endpoint::parse(&arrow.target);
            if !seen.contains(&src.node_id) {
                return Err(CoreError::InvalidDiagram(format!(
                    "arrow source references unknown node: {}",
                    src.node_id
                )));
            }
            if !seen.contains(&dst.node_id) {
                return Err(CoreError::InvalidDiagram(format!(
                    "arrow target references unknown node: {}",
                    dst.node_id
                )));
            }
        }

        let person_ids: HashSet<&str> = self.persons.iter().map(|p| p.id.as_str()).collect();
        for node in &self.nodes {
            if let Some(pid) = &node.person_id {
                if !person_ids.contains(pid.as_str()) {
                    return Err(CoreError::InvalidDiagram(format!(
                        "node {} references unknown person: {}",
                        node.id, pid
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn persons_by_id(&self) -> HashMap<&str, &Person> {
        self.persons.iter().map(|p| (p.id.as_str(), p)).collect()
    }
}
