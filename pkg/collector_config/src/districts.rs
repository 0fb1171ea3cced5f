//! Electoral districts list (`list/districts`): district/parish membership
//! and the region names (state/county/parish) used for voter statistics
//! breakdowns. Grounded in `config_validator/districts_list.py`.

use crate::error::invalid;
use common::errors::*;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct District {
    pub name: String,
    pub parish: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Region {
    pub state: Option<String>,
    pub county: Option<String>,
    pub parish: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DistrictsList {
    pub election: String,
    pub districts: HashMap<String, District>,
    pub regions: HashMap<String, Region>,
    pub counties: HashMap<String, Vec<String>>,
}

pub fn parse(json_text: &str) -> Result<DistrictsList> {
    let value = json::parse(json_text).map_err(|e| format_err!("Malformed districts list: {}", e))?;
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("/", "districts list must be a JSON object"))?;

    let election = obj
        .get("election")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("/election", "required string field missing"))?
        .to_string();

    let mut districts = HashMap::new();
    if let Some(districts_obj) = obj.get("districts").and_then(|v| v.as_object()) {
        for (id, d) in districts_obj.iter() {
            let d_obj = d.as_object().ok_or_else(|| invalid(&format!("/districts/{}", id), "expected an object"))?;
            let name = d_obj
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid(&format!("/districts/{}/name", id), "required string field missing"))?
                .to_string();
            let parish = d_obj
                .get("parish")
                .and_then(|v| v.as_array())
                .ok_or_else(|| invalid(&format!("/districts/{}/parish", id), "required array field missing"))?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid(&format!("/districts/{}/parish", id), "expected a list of strings"))?;
            districts.insert(id.clone(), District { name, parish });
        }
    }

    let mut regions = HashMap::new();
    if let Some(regions_obj) = obj.get("regions").and_then(|v| v.as_object()) {
        for (id, r) in regions_obj.iter() {
            let r_obj = r.as_object().ok_or_else(|| invalid(&format!("/regions/{}", id), "expected an object"))?;
            regions.insert(
                id.clone(),
                Region {
                    state: r_obj.get("state").and_then(|v| v.as_str()).map(str::to_string),
                    county: r_obj.get("county").and_then(|v| v.as_str()).map(str::to_string),
                    parish: r_obj.get("parish").and_then(|v| v.as_str()).map(str::to_string),
                },
            );
        }
    }

    let mut counties = HashMap::new();
    if let Some(counties_obj) = obj.get("counties").and_then(|v| v.as_object()) {
        for (id, list) in counties_obj.iter() {
            let list = list
                .as_array()
                .ok_or_else(|| invalid(&format!("/counties/{}", id), "expected an array"))?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid(&format!("/counties/{}", id), "expected a list of strings"))?;
            counties.insert(id.clone(), list);
        }
    }

    Ok(DistrictsList { election, districts, regions, counties })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_list() {
        let list = parse(
            r#"{
                "election": "EP2023",
                "districts": {
                    "0001": { "name": "Tallinn", "parish": ["0001", "0002"] }
                },
                "regions": {
                    "0001": { "county": "Harju" }
                },
                "counties": {
                    "Harju": ["0001", "0002"]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(list.districts["0001"].name, "Tallinn");
        assert_eq!(list.regions["0001"].county.as_deref(), Some("Harju"));
    }

    #[test]
    fn rejects_missing_parish() {
        let err = parse(
            r#"{"election": "EP2023", "districts": {"0001": {"name": "Tallinn"}}}"#,
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("parish"));
    }
}
