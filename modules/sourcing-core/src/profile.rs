// Reading associated companies out of an opaque profile payload.
//
// Profiles are collect-API JSON. The only structure relied on is the
// `experience` array, and only for choosing which companies to enrich.

use serde::{Deserialize, Serialize};

use crate::keys::CompanyKey;

/// A role on a profile, as far as company enrichment cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experience {
    pub company: CompanyKey,
    pub start_year: Option<i32>,
    /// `None` for a current role.
    pub end_year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawExperience {
    company_id: Option<serde_json::Value>,
    company_name: Option<String>,
    date_from_year: Option<i32>,
    date_to_year: Option<i32>,
}

/// Extract roles from `payload["experience"]`. Entries that name no company
/// or fail to parse are skipped.
pub fn experiences(payload: &serde_json::Value) -> Vec<Experience> {
    let Some(entries) = payload.get("experience").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| serde_json::from_value::<RawExperience>(entry.clone()).ok())
        .filter_map(|raw| {
            let company_id = match raw.company_id {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            let company =
                CompanyKey::from_id_or_name(company_id.as_deref(), raw.company_name.as_deref())?;
            Some(Experience {
                company,
                start_year: raw.date_from_year,
                end_year: raw.date_to_year,
            })
        })
        .collect()
}

/// Which of a profile's companies get enriched. Both knobs are tuning
/// parameters supplied by the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyFilter {
    /// Roles that ended before this year are skipped.
    pub cutoff_year: i32,
    pub max_companies: usize,
}

impl Default for CompanyFilter {
    fn default() -> Self {
        Self {
            cutoff_year: 2020,
            max_companies: 3,
        }
    }
}

impl CompanyFilter {
    /// Qualifying company keys in profile order, deduplicated and capped.
    pub fn select(&self, experiences: &[Experience]) -> Vec<CompanyKey> {
        let mut selected: Vec<CompanyKey> = Vec::new();
        for exp in experiences {
            if selected.len() >= self.max_companies {
                break;
            }
            let recent_enough = match exp.end_year {
                None => true,
                Some(end) => end >= self.cutoff_year,
            };
            if recent_enough && !selected.contains(&exp.company) {
                selected.push(exp.company.clone());
            }
        }
        selected
    }
}
