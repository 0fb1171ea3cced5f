//! Ballot choices list (`list/choices`): per-district, per-question choice
//! catalogue. Grounded in `config_validator/choices_list.py`.

use crate::error::invalid;
use common::errors::*;
use std::collections::{HashMap, HashSet};

/// `district -> question -> choice_id -> choice label`.
#[derive(Debug, Clone)]
pub struct ChoicesList {
    pub election: String,
    pub choices: HashMap<String, HashMap<String, HashMap<String, String>>>,
}

pub fn parse(json_text: &str) -> Result<ChoicesList> {
    let value = json::parse(json_text).map_err(|e| format_err!("Malformed choices list: {}", e))?;
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("/", "choices list must be a JSON object"))?;

    let election = obj
        .get("election")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("/election", "required string field missing"))?
        .to_string();

    let mut choices: HashMap<String, HashMap<String, HashMap<String, String>>> = HashMap::new();
    if let Some(districts) = obj.get("choices").and_then(|v| v.as_object()) {
        for (district, questions) in districts.iter() {
            let questions_obj = questions
                .as_object()
                .ok_or_else(|| invalid(&format!("/choices/{}", district), "expected an object"))?;
            let mut q_map = HashMap::new();
            for (question, choices_obj) in questions_obj.iter() {
                let choice_map = choices_obj.as_object().ok_or_else(|| {
                    invalid(&format!("/choices/{}/{}", district, question), "expected an object")
                })?;
                let mut c_map = HashMap::new();
                for (choice_id, label) in choice_map.iter() {
                    let label = label.as_str().ok_or_else(|| {
                        invalid(
                            &format!("/choices/{}/{}/{}", district, question, choice_id),
                            "expected a string",
                        )
                    })?;
                    c_map.insert(choice_id.clone(), label.to_string());
                }
                q_map.insert(question.clone(), c_map);
            }
            choices.insert(district.clone(), q_map);
        }
    }

    let list = ChoicesList { election, choices };
    validate(&list)?;
    Ok(list)
}

pub fn validate(list: &ChoicesList) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for questions in list.choices.values() {
        for choices in questions.values() {
            for choice_id in choices.keys() {
                if !seen.insert(choice_id.as_str()) {
                    return Err(invalid("/choices", format!("duplicate choice id: {:?}", choice_id)));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "election": "EP2023",
            "choices": {
                "0001": {
                    "EP2023.1": {
                        "EP2023.1.1": "Party One",
                        "EP2023.1.2": "Party Two"
                    }
                }
            }
        }"#
    }

    #[test]
    fn parses_valid_list() {
        let list = parse(sample()).unwrap();
        assert_eq!(list.election, "EP2023");
        assert_eq!(list.choices["0001"]["EP2023.1"]["EP2023.1.1"], "Party One");
    }

    #[test]
    fn rejects_duplicate_choice_ids_across_districts() {
        let dup = r#"{
            "election": "EP2023",
            "choices": {
                "0001": { "EP2023.1": { "EP2023.1.1": "Party One" } },
                "0002": { "EP2023.1": { "EP2023.1.1": "Party One Again" } }
            }
        }"#;
        assert!(parse(dup).is_err());
    }
}
