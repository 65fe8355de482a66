// /////////////////////////////////////////////////////////////////////////////
// Savings Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bank Name Normalization
//!
//! Two distinct normalizers operate on bank names, and they must stay
//! distinct because they serve different invariants:
//!
//! - [`FrnNameNormalizer`] prepares names for lookup against the FRN cache:
//!   uppercase, punctuation stripped, configured prefixes removed,
//!   configured suffixes stripped to a fixed point, abbreviations expanded.
//!   It also generates the 2×2×2 variation cross-product the cache loader
//!   inserts for every canonical institution name.
//! - [`DedupNameNormalizer`] produces the bank segment of the business key:
//!   uppercase, camelCase split, `&` → `AND`, corporate suffixes stripped
//!   to a fixed point. Two names that normalize differently here are
//!   different banks for FSCS purposes and must never share a dedup group.
//!
//! Both normalizers are idempotent: `normalize(normalize(x)) ==
//! normalize(x)`. Suffix stripping never empties a name — a bank literally
//! named `BANK` keeps its last token.
//!
//! All word lists come from configuration; nothing is hardcoded here.

/// Normalizer for FRN lookup-cache search names and per-product resolution.
#[derive(Debug, Clone)]
pub struct FrnNameNormalizer {
    prefixes: Vec<String>,
    suffixes: Vec<String>,
    abbreviations: Vec<(String, String)>,
}

impl FrnNameNormalizer {
    /// Builds a normalizer from configured word lists. Lists are uppercased
    /// once here so per-name work stays cheap.
    pub fn new(prefixes: Vec<String>, suffixes: Vec<String>, abbreviations: Vec<(String, String)>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(|p| p.to_uppercase()).collect(),
            suffixes: suffixes.into_iter().map(|s| s.to_uppercase()).collect(),
            abbreviations: abbreviations
                .into_iter()
                .map(|(k, v)| (k.to_uppercase(), v.to_uppercase()))
                .collect(),
        }
    }

    /// Full normalization: base form, prefix removal, suffix stripping to a
    /// fixed point, abbreviation expansion.
    pub fn normalize(&self, name: &str) -> String {
        let base = base_form(name);
        let without_prefix = self.strip_prefixes(&base);
        let without_suffix = self.strip_suffixes(&without_prefix);
        self.expand_abbreviations(&without_suffix)
    }

    /// The space-stripped form used for Levenshtein comparison during fuzzy
    /// matching.
    pub fn normalize_compact(&self, name: &str) -> String {
        self.normalize(name).split_whitespace().collect()
    }

    /// Generates the cross product of name variations for the lookup cache:
    /// `{with/without prefix removal} × {with/without suffix removal} ×
    /// {with/without abbreviation expansion}`, deduplicated in generation
    /// order.
    pub fn generate_variations(&self, canonical_name: &str) -> Vec<String> {
        let base = base_form(canonical_name);
        let mut variations = Vec::with_capacity(8);
        for strip_prefix in [false, true] {
            for strip_suffix in [false, true] {
                for expand in [false, true] {
                    let mut name = base.clone();
                    if strip_prefix {
                        name = self.strip_prefixes(&name);
                    }
                    if strip_suffix {
                        name = self.strip_suffixes(&name);
                    }
                    if expand {
                        name = self.expand_abbreviations(&name);
                    }
                    if !name.is_empty() && !variations.contains(&name) {
                        variations.push(name);
                    }
                }
            }
        }
        variations
    }

    fn strip_prefixes(&self, name: &str) -> String {
        let mut current = name.to_string();
        loop {
            let mut changed = false;
            for prefix in &self.prefixes {
                let candidate = format!("{} ", prefix);
                if let Some(rest) = current.strip_prefix(&candidate) {
                    if !rest.trim().is_empty() {
                        current = rest.trim().to_string();
                        changed = true;
                    }
                }
            }
            if !changed {
                return current;
            }
        }
    }

    fn strip_suffixes(&self, name: &str) -> String {
        strip_suffixes_fixed_point(name, &self.suffixes)
    }

    fn expand_abbreviations(&self, name: &str) -> String {
        name.split_whitespace()
            .map(|token| {
                self.abbreviations
                    .iter()
                    .find(|(abbrev, _)| abbrev == token)
                    .map(|(_, expansion)| expansion.as_str())
                    .unwrap_or(token)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Normalizer for the FSCS-safe bank segment of business keys.
#[derive(Debug, Clone)]
pub struct DedupNameNormalizer {
    corporate_suffixes: Vec<String>,
}

impl DedupNameNormalizer {
    pub fn new(corporate_suffixes: Vec<String>) -> Self {
        Self {
            corporate_suffixes: corporate_suffixes.into_iter().map(|s| s.to_uppercase()).collect(),
        }
    }

    /// Normalizes a bank name for business-key generation.
    pub fn normalize(&self, name: &str) -> String {
        let split = split_camel_case(name);
        let with_and = split.replace('&', " AND ");
        let base = base_form(&with_and);
        strip_suffixes_fixed_point(&base, &self.corporate_suffixes)
    }
}

/// Uppercases, maps every non-alphanumeric character to a space, and
/// collapses whitespace. The shared first step of both normalizers.
fn base_form(name: &str) -> String {
    name.to_uppercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Inserts a space at each lower→upper boundary so `GoldmanSachs` becomes
/// `Goldman Sachs` before uppercasing erases the boundary.
fn split_camel_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if prev_lower && c.is_uppercase() {
            result.push(' ');
        }
        prev_lower = c.is_lowercase();
        result.push(c);
    }
    result
}

/// Strips any configured suffix (single- or multi-word) from the end of the
/// name, repeating until nothing changes. Never strips the entire name.
fn strip_suffixes_fixed_point(name: &str, suffixes: &[String]) -> String {
    let mut current = name.to_string();
    loop {
        let mut changed = false;
        for suffix in suffixes {
            let trailing = format!(" {}", suffix);
            if let Some(rest) = current.strip_suffix(&trailing) {
                if !rest.trim().is_empty() {
                    current = rest.trim().to_string();
                    changed = true;
                }
            }
        }
        if !changed {
            return current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frn_normalizer() -> FrnNameNormalizer {
        FrnNameNormalizer::new(
            vec!["THE".into()],
            vec!["LIMITED".into(), "LTD".into(), "PLC".into(), "BANK".into(), "UK".into()],
            vec![("BS".into(), "BUILDING SOCIETY".into()), ("CO".into(), "COMPANY".into())],
        )
    }

    fn dedup_normalizer() -> DedupNameNormalizer {
        DedupNameNormalizer::new(vec![
            "LIMITED".into(),
            "LTD".into(),
            "PLC".into(),
            "BANK".into(),
            "BUILDING SOCIETY".into(),
            "BS".into(),
            "UK".into(),
        ])
    }

    #[test]
    fn frn_normalize_strips_punctuation_and_suffixes() {
        let n = frn_normalizer();
        assert_eq!(n.normalize("HSBC UK Bank plc"), "HSBC");
        assert_eq!(n.normalize("The Co-operative Bank"), "COMPANY OPERATIVE");
    }

    #[test]
    fn frn_normalize_expands_abbreviations() {
        let n = frn_normalizer();
        assert_eq!(n.normalize("Leeds BS"), "LEEDS BUILDING SOCIETY");
    }

    #[test]
    fn suffix_stripping_reaches_a_fixed_point() {
        let n = frn_normalizer();
        // Both UK and LIMITED strip, in either textual order.
        assert_eq!(n.normalize("Shawbrook Bank Limited"), "SHAWBROOK");
        assert_eq!(n.normalize("Paragon Bank UK"), "PARAGON");
    }

    #[test]
    fn suffix_stripping_never_empties_a_name() {
        let n = frn_normalizer();
        assert_eq!(n.normalize("Bank"), "BANK");
        let d = dedup_normalizer();
        assert_eq!(d.normalize("BS"), "BS");
    }

    #[test]
    fn compact_form_strips_spaces() {
        let n = frn_normalizer();
        assert_eq!(n.normalize_compact("Goldman Sachs International"), "GOLDMANSACHSINTERNATIONAL");
    }

    #[test]
    fn dedup_normalize_splits_camel_case_and_maps_ampersand() {
        let d = dedup_normalizer();
        assert_eq!(d.normalize("GoldmanSachs"), "GOLDMAN SACHS");
        assert_eq!(d.normalize("C&G Savings"), "C AND G SAVINGS");
    }

    #[test]
    fn dedup_normalize_distinguishes_fscs_entities() {
        let d = dedup_normalizer();
        let marcus = d.normalize("Marcus");
        let goldman = d.normalize("Goldman Sachs International Bank");
        assert_ne!(marcus, goldman);
    }

    #[test]
    fn variations_cover_the_cross_product() {
        let n = frn_normalizer();
        let variations = n.generate_variations("The Leeds BS Limited");
        // Unstripped, prefix-stripped, suffix-stripped, expanded forms all
        // present (deduplicated).
        assert!(variations.contains(&"THE LEEDS BS LIMITED".to_string()));
        assert!(variations.contains(&"LEEDS BS LIMITED".to_string()));
        assert!(variations.contains(&"LEEDS BS".to_string()));
        assert!(variations.contains(&"LEEDS BUILDING SOCIETY".to_string()));
        assert!(variations.len() <= 8);
    }

    proptest! {
        #[test]
        fn frn_normalization_is_idempotent(name in "[a-zA-Z0-9 &'.-]{0,40}") {
            let n = frn_normalizer();
            let once = n.normalize(&name);
            prop_assert_eq!(n.normalize(&once), once);
        }

        #[test]
        fn dedup_normalization_is_idempotent(name in "[a-zA-Z0-9 &'.-]{0,40}") {
            let d = dedup_normalizer();
            let once = d.normalize(&name);
            prop_assert_eq!(d.normalize(&once), once);
        }
    }
}
