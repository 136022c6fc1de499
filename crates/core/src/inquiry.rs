//! "What can you do?" style questions, answered straight from the taxonomy.

use crate::taxonomy::Taxonomy;
use crate::text::{contains_phrase, humanize_key, join_with_and, normalize};

const INQUIRY_PHRASES: &[&str] = &[
    "what can you do",
    "what do you do",
    "what can you help",
    "how can you help",
    "what are your capabilities",
    "your capabilities",
    "list stages",
    "list the stages",
    "list agents",
    "list the agents",
    "what stages",
    "which stages",
    "what are the stages",
    "what agents",
    "which agents",
    "available agents",
    "available stages",
];

pub fn is_capability_inquiry(text: &str) -> bool {
    let normalized = normalize(text);
    INQUIRY_PHRASES.iter().any(|phrase| contains_phrase(&normalized, phrase))
}

pub fn describe_capabilities(taxonomy: &Taxonomy) -> String {
    let mut lines = vec![
        "I route Open Negotiation requests to the right workflow stage. The stages, in order:"
            .to_string(),
    ];
    for (index, stage) in taxonomy.stages().iter().enumerate() {
        lines.push(format!("{}. {}: {}", index + 1, stage.name, stage.description));
    }

    let mut parameters = Vec::new();
    for stage in taxonomy.stages() {
        for key in &stage.required_parameters {
            let label = humanize_key(key);
            if !parameters.contains(&label) {
                parameters.push(label);
            }
        }
    }
    if parameters.is_empty() {
        lines.push("Tell me which stage you need.".to_string());
    } else {
        lines.push(format!(
            "Tell me which stage you need, along with the {}.",
            join_with_and(&parameters)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{describe_capabilities, is_capability_inquiry};
    use crate::taxonomy::Taxonomy;

    #[test]
    fn recognises_capability_questions() {
        assert!(is_capability_inquiry("Hey, what can you do?"));
        assert!(is_capability_inquiry("which agents are available"));
        assert!(!is_capability_inquiry("send the emails for wave 2"));
    }

    #[test]
    fn description_lists_stages_in_order() {
        let text = describe_capabilities(&Taxonomy::open_negotiation());
        let validation = text.find("1. Document Validation").expect("first stage");
        let organization = text.find("4. File Organization").expect("last stage");
        assert!(validation < organization);
        assert!(text.ends_with("along with the client name and wave number."));
    }
}
