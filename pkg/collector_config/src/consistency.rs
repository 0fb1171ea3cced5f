//! Cross-file consistency checks that can't be expressed inside a single
//! list's own schema: the choices list must agree with the election config's
//! question identifiers, and with the districts list's district
//! identifiers.

use crate::choices::ChoicesList;
use crate::districts::DistrictsList;
use crate::election::ElectionConfig;
use crate::error::invalid;
use common::errors::*;
use std::collections::HashSet;

pub fn check_choices_against_election(choices: &ChoicesList, election: &ElectionConfig) -> Result<()> {
    if choices.election != election.identifier {
        return Err(invalid(
            "/election",
            format!(
                "choices list election {:?} does not match election config {:?}",
                choices.election, election.identifier
            ),
        ));
    }

    let questions: HashSet<&String> = election.questions.iter().collect();
    for (district, per_question) in choices.choices.iter() {
        for question in per_question.keys() {
            if !questions.contains(question) {
                return Err(invalid(
                    &format!("/choices/{}/{}", district, question),
                    format!("question {:?} is not declared in the election config", question),
                ));
            }
        }
    }
    Ok(())
}

pub fn check_choices_against_districts(choices: &ChoicesList, districts: &DistrictsList) -> Result<()> {
    if choices.election != districts.election {
        return Err(invalid(
            "/election",
            format!(
                "choices list election {:?} does not match districts list {:?}",
                choices.election, districts.election
            ),
        ));
    }
    for district in choices.choices.keys() {
        if !districts.districts.contains_key(district) {
            return Err(invalid(
                &format!("/choices/{}", district),
                format!("district {:?} is not declared in the districts list", district),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choices;
    use crate::districts;
    use crate::election;

    fn election_cfg() -> ElectionConfig {
        election::parse(
            r#"
identifier: EP2023
questions: ["EP2023.1"]
verification:
  count: 3
  minutes: 30
period:
  servicestart: "2023-01-01T00:00:00Z"
  electionstart: "2023-01-02T00:00:00Z"
  electionstop: "2023-01-09T20:00:00Z"
  servicestop: "2023-01-10T00:00:00Z"
voterlist:
  key: "base64-pubkey"
identity: commonname
vote:
  dummy:
    trusted: ["CN=Voter"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn rejects_unknown_question() {
        let choices = choices::parse(
            r#"{"election": "EP2023", "choices": {"0001": {"EP2023.99": {"c1": "X"}}}}"#,
        )
        .unwrap();
        assert!(check_choices_against_election(&choices, &election_cfg()).is_err());
    }

    #[test]
    fn rejects_unknown_district() {
        let choices = choices::parse(
            r#"{"election": "EP2023", "choices": {"9999": {"EP2023.1": {"c1": "X"}}}}"#,
        )
        .unwrap();
        let districts = districts::parse(r#"{"election": "EP2023", "districts": {"0001": {"name": "Tallinn", "parish": ["1"]}}}"#).unwrap();
        assert!(check_choices_against_districts(&choices, &districts).is_err());
    }
}
