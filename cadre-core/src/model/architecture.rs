//! Architecture document produced by the planning phase

use serde::{Deserialize, Serialize};

/// A system component with its responsibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub responsibility: String,
}

/// A technology selection with justification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnologyChoice {
    pub name: String,
    /// e.g. backend, database, messaging, frontend
    pub category: String,
    pub justification: String,
}

/// API or interface contract between two components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceContract {
    pub provider: String,
    pub consumer: String,
    /// e.g. REST API, message queue, event
    pub contract_type: String,
    pub description: String,
}

/// A single architecture decision record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub title: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub context: String,
    pub decision: String,
    pub consequences: String,
}

fn default_status() -> String {
    "accepted".to_string()
}

/// Structured architecture document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub system_overview: String,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub technology_stack: Vec<TechnologyChoice>,
    #[serde(default)]
    pub interface_contracts: Vec<InterfaceContract>,
    #[serde(default)]
    pub data_entities: String,
    #[serde(default)]
    pub deployment_topology: String,
    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
}

impl Architecture {
    /// Look up a component by normalized name
    pub fn component(&self, name: &str) -> Option<&Component> {
        let wanted = normalize(name);
        self.components.iter().find(|c| normalize(&c.name) == wanted)
    }

    /// Normalized component names, used for module-placement checks
    pub fn component_names(&self) -> Vec<String> {
        self.components.iter().map(|c| normalize(&c.name)).collect()
    }

    /// Whether the architecture declares a user-facing frontend component.
    ///
    /// The development crew skips frontend tasks when this is false.
    pub fn declares_frontend(&self) -> bool {
        self.components.iter().any(|c| {
            let name = normalize(&c.name);
            name.contains("frontend") || name.contains("ui") || name.contains("web_client")
        })
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Architecture {
        Architecture {
            system_overview: "three-tier service".into(),
            components: vec![
                Component {
                    name: "API Backend".into(),
                    responsibility: "serve requests".into(),
                },
                Component {
                    name: "storage".into(),
                    responsibility: "persist items".into(),
                },
            ],
            technology_stack: Vec::new(),
            interface_contracts: Vec::new(),
            data_entities: String::new(),
            deployment_topology: String::new(),
            decisions: Vec::new(),
        }
    }

    #[test]
    fn test_component_lookup_is_normalized() {
        let arch = sample();
        assert!(arch.component("api_backend").is_some());
        assert!(arch.component("API Backend").is_some());
        assert!(arch.component("missing").is_none());
    }

    #[test]
    fn test_frontend_detection() {
        let mut arch = sample();
        assert!(!arch.declares_frontend());
        arch.components.push(Component {
            name: "Frontend".into(),
            responsibility: "render UI".into(),
        });
        assert!(arch.declares_frontend());
    }

    #[test]
    fn test_decision_status_defaults() {
        let json = r#"{
            "title": "use sqlite",
            "context": "small footprint",
            "decision": "embed sqlite",
            "consequences": "single node"
        }"#;
        let record: DecisionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, "accepted");
    }
}
