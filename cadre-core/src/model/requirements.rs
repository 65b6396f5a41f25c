//! Requirements document produced by the planning phase

use serde::{Deserialize, Serialize};

/// MoSCoW priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Must,
    Should,
    Could,
    Wont,
}

/// A single testable acceptance criterion for a user story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    /// Criterion in Given/When/Then or checklist form
    pub description: String,
    /// Whether the criterion is verifiable
    #[serde(default = "default_true")]
    pub testable: bool,
}

fn default_true() -> bool {
    true
}

/// User story in "as a / I want / so that" form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStory {
    pub as_a: String,
    pub i_want: String,
    pub so_that: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub priority: Priority,
    /// Optional story identifier (e.g. US-1)
    #[serde(default)]
    pub id: String,
}

/// Non-functional requirement (performance, security, scalability, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonFunctionalRequirement {
    pub category: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub measurable: bool,
}

/// Structured requirements document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_users: Vec<String>,
    #[serde(default)]
    pub user_stories: Vec<UserStory>,
    #[serde(default)]
    pub non_functional_requirements: Vec<NonFunctionalRequirement>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Self-reported confidence that the requirements capture the request,
    /// in `0.0..=1.0`. Low confidence routes the flow to human clarification.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Requirements {
    /// Minimum number of user stories a complete document must carry
    pub const MIN_USER_STORIES: usize = 3;

    /// Whether the document has enough user stories to proceed
    pub fn has_minimum_stories(&self) -> bool {
        self.user_stories.len() >= Self::MIN_USER_STORIES
    }

    /// Whether the document should be clarified by a human before proceeding
    pub fn is_ambiguous(&self, confidence_threshold: f64) -> bool {
        self.confidence < confidence_threshold
    }

    /// Flat keyword text used by scope-control checks
    pub fn keyword_text(&self) -> String {
        let mut parts = vec![self.project_name.clone(), self.description.clone()];
        for story in &self.user_stories {
            parts.push(story.i_want.clone());
            parts.push(story.so_that.clone());
            for criterion in &story.acceptance_criteria {
                parts.push(criterion.description.clone());
            }
        }
        for nfr in &self.non_functional_requirements {
            parts.push(nfr.description.clone());
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(id: &str) -> UserStory {
        UserStory {
            as_a: "user".into(),
            i_want: format!("feature {id}"),
            so_that: "value".into(),
            acceptance_criteria: vec![AcceptanceCriterion {
                description: "it works".into(),
                testable: true,
            }],
            priority: Priority::Must,
            id: id.into(),
        }
    }

    fn minimal() -> Requirements {
        Requirements {
            project_name: "demo".into(),
            description: "a demo service".into(),
            target_users: vec!["developers".into()],
            user_stories: vec![story("US-1"), story("US-2"), story("US-3")],
            non_functional_requirements: Vec::new(),
            assumptions: Vec::new(),
            constraints: Vec::new(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_minimum_story_count() {
        let mut reqs = minimal();
        assert!(reqs.has_minimum_stories());
        reqs.user_stories.pop();
        assert!(!reqs.has_minimum_stories());
    }

    #[test]
    fn test_ambiguity_threshold() {
        let mut reqs = minimal();
        reqs.confidence = 0.65;
        assert!(reqs.is_ambiguous(0.7));
        reqs.confidence = 0.7;
        assert!(!reqs.is_ambiguous(0.7));
    }

    #[test]
    fn test_confidence_defaults_to_one() {
        let json = r#"{"project_name": "x", "user_stories": []}"#;
        let reqs: Requirements = serde_json::from_str(json).unwrap();
        assert_eq!(reqs.confidence, 1.0);
    }

    #[test]
    fn test_keyword_text_includes_stories() {
        let reqs = minimal();
        let text = reqs.keyword_text();
        assert!(text.contains("feature US-1"));
        assert!(text.contains("it works"));
    }

    #[test]
    fn test_priority_serde() {
        let json = serde_json::to_string(&Priority::Must).unwrap();
        assert_eq!(json, "\"must\"");
    }
}
