use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Category;

/// Substring vocabulary for the construction flag. Matched against lowercased
/// text without word boundaries.
pub const CONSTRUCTION_KEYWORDS: &[&str] = &[
    // infrastructure
    "infrastructure",
    "civil works",
    "civil engineering",
    // roads & transport
    "road",
    "highway",
    "motorway",
    "bridge",
    "tunnel",
    "airport",
    "runway",
    "footpath",
    "cycleway",
    "carpark",
    "car park",
    "street",
    // buildings
    "construction",
    "building",
    "hospital",
    "school",
    "university",
    "education facility",
    "health facility",
    "medical centre",
    "community centre",
    "library",
    // defence
    "defence",
    "defense",
    "military",
    "base",
    "barracks",
    // utilities
    "drainage",
    "stormwater",
    "sewer",
    "water treatment",
    "wastewater",
    "water supply",
    "sewerage",
    // landscaping & site
    "landscaping",
    "earthworks",
    "site works",
    "ground works",
    "civil construction",
    "retaining wall",
    "fencing",
    // structural
    "structural",
    "demolition",
    "renovation",
    "refurbishment",
    "fit-out",
    "fitout",
    "architectural",
    "maintenance",
    // council
    "park",
    "playground",
    "sports field",
    "oval",
    "pavilion",
    "toilet block",
    "depot",
    "waste facility",
];

/// Category decision list, most specific first. First match wins; reordering
/// rows changes outcomes for ambiguous text.
const CATEGORY_RULES: &[(&str, Category)] = &[
    (r"defence|defense|military|base|barracks", Category::Defence),
    (r"airport|runway|aviation", Category::AirportsAviation),
    (r"hospital|health|medical centre|clinic", Category::HospitalsHealthcare),
    (r"school|university|education|campus|college", Category::SchoolsEducation),
    (
        r"road|highway|motorway|street|pavement|footpath|cycleway",
        Category::RoadsHighways,
    ),
    (r"bridge|tunnel|overpass", Category::BridgesTunnels),
    (
        r"drainage|stormwater|sewer|wastewater|water treatment|sewerage",
        Category::DrainageWater,
    ),
    (
        r"landscaping|park|garden|ground works|playground|sports field",
        Category::LandscapingParks,
    ),
    (r"rail|train|metro|light rail", Category::Rail),
    (
        r"building|facility|construction|community centre|library",
        Category::BuildingsFacilities,
    ),
    (
        r"civil works|civil engineering|infrastructure",
        Category::CivilInfrastructure,
    ),
    (r"waste|depot|toilet block", Category::CouncilServices),
];

static COMPILED_RULES: LazyLock<Vec<(Regex, Category)>> = LazyLock::new(|| {
    CATEGORY_RULES
        .iter()
        .map(|(pattern, category)| {
            let regex = Regex::new(pattern).expect("category patterns are static and valid");
            (regex, *category)
        })
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_construction: bool,
    pub category: Category,
}

fn combined_text(title: &str, description: &str) -> String {
    format!("{title} {description}").to_lowercase()
}

pub fn is_construction_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONSTRUCTION_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

pub fn categorize(title: &str, description: &str) -> Category {
    let text = combined_text(title, description);
    COMPILED_RULES
        .iter()
        .find(|(regex, _)| regex.is_match(&text))
        .map(|(_, category)| *category)
        .unwrap_or_default()
}

/// Pure and deterministic: the same pair always yields the same result.
pub fn classify(title: &str, description: &str) -> Classification {
    Classification {
        is_construction: is_construction_text(&combined_text(title, description)),
        category: categorize(title, description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_keyword_matches_inside_longer_words() {
        let result = classify("Reconstruction of main hall", "");
        assert!(result.is_construction);
        assert_eq!(result.category, Category::BuildingsFacilities);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(classify("HIGHWAY UPGRADE", "").is_construction);
        assert_eq!(categorize("", "STORMWATER Renewal"), Category::DrainageWater);
    }

    #[test]
    fn unrelated_text_is_not_construction_and_defaults_category() {
        let result = classify("Provision of legal advice", "Panel arrangement for counsel");
        assert!(!result.is_construction);
        assert_eq!(result.category, Category::GeneralConstruction);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let samples = [
            ("Hospital car park extension", "Stage 2"),
            ("", ""),
            ("Light rail depot", "Signalling works"),
            ("Software licences", "Annual renewal"),
        ];
        for (title, description) in samples {
            let first = classify(title, description);
            for _ in 0..5 {
                assert_eq!(classify(title, description), first);
            }
        }
    }

    #[test]
    fn higher_priority_group_wins_on_dual_match() {
        let cases = [
            ("Hospital access road upgrade", Category::HospitalsHealthcare),
            ("Road works near the regional hospital", Category::HospitalsHealthcare),
            ("Military airfield runway", Category::Defence),
            ("School footpath renewal", Category::SchoolsEducation),
            ("Road bridge replacement", Category::RoadsHighways),
            ("Tunnel drainage rehabilitation", Category::BridgesTunnels),
            ("Park stormwater pit", Category::DrainageWater),
            ("Rail station library fitout", Category::Rail),
            ("Council depot building", Category::BuildingsFacilities),
            ("Infrastructure for waste transfer", Category::CivilInfrastructure),
        ];
        for (title, expected) in cases {
            assert_eq!(categorize(title, ""), expected, "title: {title}");
        }
    }

    #[test]
    fn description_participates_in_categorisation() {
        assert_eq!(
            categorize("Minor works package", "Toilet block replacement"),
            Category::CouncilServices
        );
    }

    #[test]
    fn every_rule_category_is_reachable() {
        for (pattern, category) in CATEGORY_RULES {
            let sample = pattern.split('|').next().unwrap();
            let found = categorize(sample, "");
            // An earlier row may claim the sample; it must never be a later one.
            let rank = |c: Category| Category::ALL.iter().position(|x| *x == c).unwrap();
            assert!(rank(found) <= rank(*category), "{sample} -> {found}");
        }
    }
}
