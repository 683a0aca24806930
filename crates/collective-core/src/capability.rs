//! Agent capabilities and requirement matching.
//!
//! A capability is a named skill with a proficiency and a set of domain
//! tags. Task requirements are free-form tags; a capability satisfies a
//! requirement when their names overlap by substring or one of the
//! capability's domain tags appears in the requirement.

use crate::types::Domain;
use serde::{Deserialize, Serialize};

/// A single skill held by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name (e.g., "tax_calculation", "logistics_analysis")
    pub name: String,

    /// Proficiency level from 0.0 (novice) to 1.0 (expert)
    pub proficiency: f64,

    /// Domains this capability applies to
    #[serde(default)]
    pub domains: Vec<Domain>,

    /// Relative cost of using this capability
    #[serde(default)]
    pub cost: f64,
}

impl Capability {
    /// Create a capability; proficiency is clamped to [0, 1].
    pub fn new(name: impl Into<String>, proficiency: f64) -> Self {
        Self {
            name: name.into(),
            proficiency: clamp_unit(proficiency),
            domains: Vec::new(),
            cost: 0.0,
        }
    }

    /// Set domain tags.
    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    /// Set cost.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost.max(0.0);
        self
    }

    /// Clamp fields into their valid ranges after deserialization.
    pub fn normalized(mut self) -> Self {
        self.proficiency = clamp_unit(self.proficiency);
        self.cost = self.cost.max(0.0);
        self
    }

    /// Whether this capability satisfies a requirement tag.
    pub fn matches(&self, requirement: &str) -> bool {
        let requirement = requirement.trim().to_lowercase();
        if requirement.is_empty() {
            return false;
        }

        let name = self.name.to_lowercase();
        if !name.is_empty() && (name.contains(&requirement) || requirement.contains(&name)) {
            return true;
        }

        self.domains.iter().any(|domain| {
            let domain = domain.to_lowercase();
            !domain.is_empty() && (requirement.contains(&domain) || domain.contains(&requirement))
        })
    }
}

/// Best proficiency among capabilities matching `requirement`, or 0.
pub fn best_match(capabilities: &[Capability], requirement: &str) -> f64 {
    capabilities
        .iter()
        .filter(|c| c.matches(requirement))
        .map(|c| c.proficiency)
        .fold(0.0, f64::max)
}

/// The domain named by a requirement tag: the text before the first `_`,
/// or the whole tag when it has none.
pub fn requirement_domain(requirement: &str) -> Option<Domain> {
    let requirement = requirement.trim();
    if requirement.is_empty() {
        return None;
    }
    let head = requirement.split('_').next().unwrap_or(requirement);
    let domain = if head.is_empty() { requirement } else { head };
    Some(domain.to_lowercase())
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proficiency_is_clamped() {
        assert_eq!(Capability::new("x", 1.7).proficiency, 1.0);
        assert_eq!(Capability::new("x", -0.2).proficiency, 0.0);
        assert_eq!(Capability::new("x", f64::NAN).proficiency, 0.0);
    }

    #[test]
    fn test_name_substring_match() {
        let cap = Capability::new("tax_calculation", 0.9);
        assert!(cap.matches("tax_calculation"));
        assert!(cap.matches("tax"));
        assert!(cap.matches("federal_tax_calculation_2024"));
        assert!(!cap.matches("logistics_optimization"));
        assert!(!cap.matches(""));
    }

    #[test]
    fn test_domain_tag_match() {
        let cap = Capability::new("logistics_analysis", 0.8).with_domains(vec!["logistics".into()]);
        assert!(cap.matches("logistics_optimization"));
        assert!(!cap.matches("payroll"));
    }

    #[test]
    fn test_best_match_picks_highest() {
        let caps = vec![
            Capability::new("data_analysis", 0.4),
            Capability::new("data", 0.9),
            Capability::new("legal_review", 1.0),
        ];
        assert_eq!(best_match(&caps, "data_analysis"), 0.9);
        assert_eq!(best_match(&caps, "unknown"), 0.0);
    }

    #[test]
    fn test_requirement_domain() {
        assert_eq!(
            requirement_domain("logistics_optimization"),
            Some("logistics".to_string())
        );
        assert_eq!(requirement_domain("Payroll"), Some("payroll".to_string()));
        assert_eq!(requirement_domain("_hidden"), Some("_hidden".to_string()));
        assert_eq!(requirement_domain("   "), None);
    }
}
