//! Entity Resolver
//!
//! Finds references to known values (regions, constituencies, candidates, parties) in a
//! question. The index is built once from the catalog samples and aliases; lookups scan
//! word n-grams longest first, so "NOE NOUAMOU TIAPOUM SOUS PREFECTURES" wins over
//! "TIAPOUM" alone.
//!
//! Three match tiers, best first: [`MatchKind::Exact`], [`MatchKind::Component`],
//! [`MatchKind::Fuzzy`]. Several matches in the best tier make the entity ambiguous.

use super::types::{EntityMatch, MatchKind, ResolvedEntity};
use crate::catalog::{SchemaCatalog, SemanticType};
use crate::text;
use std::collections::HashMap;
use strsim::jaro_winkler;
use tracing::debug;

/// Longest n-gram looked up in the index
const MAX_NGRAM: usize = 8;

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.9;

const MIN_COMPONENT_LEN: usize = 3;
const MIN_FUZZY_LEN: usize = 4;

/// Administrative designators attached to constituency and region names
const DESIGNATORS: &[&str] = &[
    "COMMUNE", "COMMUNES", "SOUS", "PREFECTURE", "PREFECTURES", "ET", "DISTRICT", "AUTONOME",
];

/// Question vocabulary never treated as a name
const STOPWORDS: &[&str] = &[
    // French
    "LE", "LA", "LES", "DE", "DU", "DES", "D", "L", "A", "AU", "AUX", "EN", "ET", "OU", "UN",
    "UNE", "POUR", "PAR", "SUR", "DANS", "AVEC", "SANS", "QUI", "QUE", "QUEL", "QUELLE",
    "QUELS", "QUELLES", "QUOI", "COMBIEN", "NOMBRE", "TOTAL", "EST", "SONT", "ONT", "A",
    "ETE", "CE", "CETTE", "CES", "SES", "SON", "SA", "LEUR", "LEURS", "IL", "ELLE", "ILS",
    "DONNE", "DONNER", "MOI", "MONTRE", "AFFICHE", "LISTE", "TOUS", "TOUTES", "TOUT",
    "VOIX", "SCORE", "RESULTAT", "RESULTATS", "PARTICIPATION", "TAUX", "SIEGE", "SIEGES",
    "GAGNE", "GAGNANT", "ELU", "ELUS", "ELUE", "CANDIDAT", "CANDIDATS", "PARTI", "PARTIS",
    "REGION", "REGIONS", "CIRCONSCRIPTION", "CIRCONSCRIPTIONS", "COMMUNE", "COMMUNES",
    "COMPARE", "COMPARER", "ENTRE", "CONTRE", "ADVERSAIRES", "CLASSEMENT", "MEILLEURS",
    "GRAPHIQUE", "HISTOGRAMME", "CAMEMBERT", "REPARTITION", "INSCRITS", "VOTANTS",
    "NATIONAL", "NATIONALE", "PREMIER", "PREMIERS", "TOP", "BONJOUR", "MERCI",
    // English
    "THE", "OF", "IN", "AT", "FOR", "BY", "AND", "OR", "WHO", "WHAT", "WHICH", "HOW", "MANY",
    "MUCH", "IS", "ARE", "WAS", "WERE", "DID", "DOES", "SHOW", "ME", "LIST", "ALL", "VOTES",
    "RESULTS", "TURNOUT", "SEATS", "WON", "WINNER", "CANDIDATE", "CANDIDATES", "PARTY",
    "PARTIES", "CONSTITUENCY", "COMPARE", "BETWEEN", "VERSUS", "CHART", "GRAPH", "WITH",
];

/// Words that introduce a place name ("à Divo", "dans la région du Poro", "in Man")
const PLACE_CUES: &[&str] = &["à", "a", "dans", "in", "at"];

/// Nouns that introduce a place name on their own ("commune de Divo", "région Poro")
const PLACE_NOUNS: &[&str] = &[
    "REGION", "COMMUNE", "CIRCONSCRIPTION", "VILLE", "LOCALITE", "DISTRICT", "SOUS",
    "PREFECTURE", "DEPARTEMENT", "CONSTITUENCY", "TOWN", "CITY",
];

/// Articles between a cue and the name it introduces
const PLACE_ARTICLES: &[&str] = &["LE", "LA", "LES", "L", "DU", "DE", "DES", "D", "THE"];

/// Capitalised words after a cue that still mean the whole country
const NATIONAL_SCOPE: &[&str] = &[
    "COTE", "IVOIRE", "CI", "NATIONAL", "NATIONALE", "PAYS", "COUNTRY", "ENSEMBLE",
];

#[derive(Debug, Clone)]
struct IndexEntry {
    table: String,
    column: String,
    value: String,
    kind: MatchKind,
}

impl IndexEntry {
    fn to_match(&self, kind: MatchKind) -> EntityMatch {
        EntityMatch {
            table: self.table.clone(),
            column: self.column.clone(),
            value: self.value.clone(),
            kind,
        }
    }
}

pub struct EntityResolver {
    /// Normalized phrase -> values it designates
    index: HashMap<String, Vec<IndexEntry>>,
    /// Single-word keys eligible for fuzzy matching, in catalog order
    fuzzy_keys: Vec<String>,
    /// Normalized column synonym -> column name
    hints: HashMap<String, String>,
    threshold: f64,
}

impl EntityResolver {
    pub fn new(catalog: &SchemaCatalog) -> Self {
        Self::with_threshold(catalog, DEFAULT_FUZZY_THRESHOLD)
    }

    pub fn with_threshold(catalog: &SchemaCatalog, threshold: f64) -> Self {
        let mut index: HashMap<String, Vec<IndexEntry>> = HashMap::new();
        let mut fuzzy_keys: Vec<String> = Vec::new();
        let mut hints: HashMap<String, String> = HashMap::new();

        let mut add = |key: String, entry: IndexEntry, fuzzy_keys: &mut Vec<String>| {
            if key.is_empty() || STOPWORDS.contains(&key.as_str()) {
                return;
            }
            if !key.contains(' ') && key.len() >= MIN_FUZZY_LEN && !fuzzy_keys.contains(&key) {
                fuzzy_keys.push(key.clone());
            }
            let entries = index.entry(key).or_default();
            if !entries
                .iter()
                .any(|e| e.column == entry.column && e.value == entry.value && e.kind <= entry.kind)
            {
                entries.push(entry);
            }
        };

        for (table, column) in catalog.entity_columns() {
            for synonym in &column.synonyms {
                hints
                    .entry(text::normalize(synonym))
                    .or_insert_with(|| column.name.clone());
            }

            let entry = |value: &str, kind: MatchKind| IndexEntry {
                table: table.name.clone(),
                column: column.name.clone(),
                value: value.to_string(),
                kind,
            };

            for value in &column.samples {
                add(text::normalize(value), entry(value.as_str(), MatchKind::Exact), &mut fuzzy_keys);
                for component in components(column.semantic_type, value) {
                    add(component, entry(value.as_str(), MatchKind::Component), &mut fuzzy_keys);
                }
            }
            for (canonical, aliases) in &column.value_aliases {
                for alias in aliases {
                    add(text::normalize(alias), entry(canonical.as_str(), MatchKind::Exact), &mut fuzzy_keys);
                }
            }
        }

        debug!(
            "🔎 Entity index built: {} keys, {} fuzzy keys, {} column hints",
            index.len(),
            fuzzy_keys.len(),
            hints.len()
        );

        Self {
            index,
            fuzzy_keys,
            hints,
            threshold,
        }
    }

    /// Entities mentioned in the question, in order of appearance
    pub fn resolve(&self, question: &str) -> Vec<ResolvedEntity> {
        let words = text::words(question);
        let mut entities: Vec<ResolvedEntity> = Vec::new();

        let mut i = 0;
        while i < words.len() {
            let longest = MAX_NGRAM.min(words.len() - i);
            let mut consumed = 0;

            for len in (1..=longest).rev() {
                let phrase = words[i..i + len].join(" ");
                if let Some(entries) = self.index.get(&phrase) {
                    let matches: Vec<EntityMatch> =
                        entries.iter().map(|e| e.to_match(e.kind)).collect();
                    let hint = self.column_hint(&words[..i]);
                    push_entity(&mut entities, phrase, select_matches(matches, hint));
                    consumed = len;
                    break;
                }
            }

            if consumed == 0 {
                if let Some(matches) = self.fuzzy(&words[i]) {
                    let hint = self.column_hint(&words[..i]);
                    push_entity(&mut entities, words[i].clone(), select_matches(matches, hint));
                }
                consumed = 1;
            }

            i += consumed;
        }

        entities
    }

    /// Column named by the words right before a surface, skipping articles
    fn column_hint(&self, preceding: &[String]) -> Option<&str> {
        preceding
            .iter()
            .rev()
            .take(3)
            .find(|w| !matches!(w.as_str(), "DE" | "DU" | "D" | "LA" | "LE" | "L" | "DES" | "OF" | "THE"))
            .and_then(|w| self.hints.get(w))
            .map(String::as_str)
    }

    fn fuzzy(&self, word: &str) -> Option<Vec<EntityMatch>> {
        if word.len() < MIN_FUZZY_LEN
            || STOPWORDS.contains(&word)
            || self.hints.contains_key(word)
            || word.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }

        let mut matches: Vec<EntityMatch> = Vec::new();
        for key in &self.fuzzy_keys {
            if jaro_winkler(word, key) < self.threshold {
                continue;
            }
            if let Some(entries) = self.index.get(key) {
                matches.extend(entries.iter().map(|e| e.to_match(MatchKind::Fuzzy)));
            }
        }

        if matches.is_empty() {
            None
        } else {
            Some(matches)
        }
    }
}

/// A capitalised name introduced as a place that no resolved entity accounts for.
///
/// "Combien de voix à Abengourou ?" with no match for ABENGOUROU returns
/// `Some("Abengourou")`: answering it from a template would drop the place and
/// report the national figure instead.
pub fn unresolved_place(question: &str, entities: &[ResolvedEntity]) -> Option<String> {
    let covered: Vec<&str> = entities
        .iter()
        .flat_map(|e| e.surface.split(' '))
        .collect();
    let tokens: Vec<&str> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    for (i, token) in tokens.iter().enumerate() {
        let is_cue = PLACE_CUES.contains(&token.to_lowercase().as_str())
            || PLACE_NOUNS.contains(&text::normalize(token).as_str());
        if !is_cue {
            continue;
        }

        let name = tokens[i + 1..].iter().find(|t| {
            let word = text::normalize(t);
            !PLACE_ARTICLES.contains(&word.as_str()) && !PLACE_NOUNS.contains(&word.as_str())
        });
        let Some(name) = name else {
            continue;
        };

        let word = text::normalize(name);
        let capitalised = name.chars().next().is_some_and(char::is_uppercase);
        if capitalised
            && !covered.contains(&word.as_str())
            && !STOPWORDS.contains(&word.as_str())
            && !NATIONAL_SCOPE.contains(&word.as_str())
        {
            return Some(name.to_string());
        }
    }
    None
}

/// Pieces of a value that users name on their own
fn components(semantic_type: SemanticType, value: &str) -> Vec<String> {
    let mut out = Vec::new();
    match semantic_type {
        SemanticType::Locality => {
            for part in value.split(',') {
                let part = text::normalize(part);
                let is_designator = part.split(' ').all(|w| DESIGNATORS.contains(&w));
                if !is_designator && part.len() >= MIN_COMPONENT_LEN {
                    out.push(part);
                }
            }
        }
        SemanticType::Candidate | SemanticType::Region => {
            for word in text::words(value) {
                if word.len() >= MIN_COMPONENT_LEN && !DESIGNATORS.contains(&word.as_str()) {
                    out.push(word);
                }
            }
        }
        _ => {}
    }

    // A single-part value is already covered by its exact key
    let whole = text::normalize(value);
    out.retain(|c| c != &whole);
    out
}

/// Apply the column hint, then keep the best tier, deduplicated by (column, value)
fn select_matches(matches: Vec<EntityMatch>, hint: Option<&str>) -> Vec<EntityMatch> {
    let hinted: Vec<EntityMatch> = match hint {
        Some(column) if matches.iter().any(|m| m.column == column) => {
            matches.into_iter().filter(|m| m.column == column).collect()
        }
        _ => matches,
    };

    let best = match hinted.iter().map(|m| m.kind).min() {
        Some(kind) => kind,
        None => return Vec::new(),
    };

    let mut selected: Vec<EntityMatch> = Vec::new();
    for m in hinted.into_iter().filter(|m| m.kind == best) {
        if !selected.iter().any(|s| s.column == m.column && s.value == m.value) {
            selected.push(m);
        }
    }
    selected
}

fn push_entity(entities: &mut Vec<ResolvedEntity>, surface: String, matches: Vec<EntityMatch>) {
    if matches.is_empty() || entities.iter().any(|e| e.matches == matches) {
        return;
    }
    entities.push(ResolvedEntity { surface, matches });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_catalog;
    use pretty_assertions::assert_eq;

    fn resolver() -> EntityResolver {
        EntityResolver::new(&test_catalog())
    }

    fn values(entity: &ResolvedEntity) -> Vec<&str> {
        entity.matches.iter().map(|m| m.value.as_str()).collect()
    }

    #[test]
    fn test_tiapoum_is_ambiguous() {
        let entities = resolver().resolve("Combien de voix à Tiapoum ?");
        assert_eq!(entities.len(), 1);
        let tiapoum = &entities[0];
        assert!(tiapoum.is_ambiguous());
        assert_eq!(
            values(tiapoum),
            vec!["TIAPOUM, COMMUNE", "NOE, NOUAMOU, TIAPOUM, SOUS-PREFECTURES"]
        );
        assert!(tiapoum.matches.iter().all(|m| m.kind == MatchKind::Component));
    }

    #[test]
    fn test_full_value_beats_components() {
        let entities = resolver().resolve("Résultats de Tiapoum, commune");
        assert_eq!(entities.len(), 1);
        assert_eq!(values(&entities[0]), vec!["TIAPOUM, COMMUNE"]);
        assert_eq!(entities[0].matches[0].kind, MatchKind::Exact);
    }

    #[test]
    fn test_party_alias_resolves_to_canonical() {
        let entities = resolver().resolve("Combien de sièges pour le PDCI ?");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].resolved().map(|m| m.value.as_str()), Some("PDCI-RDA"));
        assert_eq!(entities[0].resolved().map(|m| m.column.as_str()), Some("parti_standardized"));
    }

    #[test]
    fn test_accents_and_case_are_ignored() {
        let entities = resolver().resolve("participation à bouaké");
        assert_eq!(entities[0].resolved().map(|m| m.value.as_str()), Some("BOUAKE, COMMUNE"));
    }

    #[test]
    fn test_column_hint_selects_constituency() {
        let entities = resolver().resolve("Qui a gagné dans la commune de San-Pedro ?");
        assert_eq!(entities.len(), 1);
        assert_eq!(values(&entities[0]), vec!["SAN-PEDRO, COMMUNE"]);

        let entities = resolver().resolve("Voix du RHDP dans la région de San-Pedro");
        let san_pedro = entities.iter().find(|e| e.surface == "SAN PEDRO").unwrap();
        assert_eq!(values(san_pedro), vec!["SAN-PEDRO"]);
        assert_eq!(san_pedro.matches[0].column, "region");
    }

    #[test]
    fn test_fuzzy_match_for_typos() {
        let entities = resolver().resolve("voix à Korogho");
        assert_eq!(entities.len(), 1);
        assert_eq!(values(&entities[0]), vec!["KORHOGO, COMMUNE"]);
        assert_eq!(entities[0].matches[0].kind, MatchKind::Fuzzy);
    }

    #[test]
    fn test_two_parties_yield_two_entities() {
        let entities = resolver().resolve("Compare le RHDP et le PDCI-RDA");
        let found: Vec<&str> = entities.iter().flat_map(values).collect();
        assert_eq!(found, vec!["RHDP", "PDCI-RDA"]);
    }

    #[test]
    fn test_no_entities_in_generic_question() {
        assert!(resolver().resolve("Quel est le taux de participation national ?").is_empty());
    }

    #[test]
    fn test_unknown_place_is_reported() {
        let r = resolver();
        for (q, place) in [
            ("Combien de voix pour le RHDP à Abengourou ?", "Abengourou"),
            ("Taux de participation à Abengourou", "Abengourou"),
            ("Qui a gagné dans la commune de Grand-Bassam ?", "Grand"),
            ("Turnout in Yamoussoukro", "Yamoussoukro"),
        ] {
            let entities = r.resolve(q);
            assert_eq!(unresolved_place(q, &entities).as_deref(), Some(place), "{}", q);
        }
    }

    #[test]
    fn test_known_places_and_national_scope_are_not_reported() {
        let r = resolver();
        for q in [
            "Qui a gagné à Cocody ?",
            "Combien de voix pour le RHDP dans la région du Poro ?",
            "Taux de participation à Bouaké",
            "Voix du FPI par région",
            "Top 5 des candidats dans chaque région",
            "How many seats in Côte d'Ivoire?",
            "Participation dans le pays",
        ] {
            let entities = r.resolve(q);
            assert_eq!(unresolved_place(q, &entities), None, "{}", q);
        }
    }

    #[test]
    fn test_live_values_extend_the_index() {
        let mut catalog = test_catalog();
        catalog.merge_values(
            "vw_results_clean",
            "circonscription",
            vec!["ABENGOUROU, COMMUNE ET SOUS-PREFECTURE".to_string()],
        );
        let q = "Combien de voix à Abengourou ?";
        let entities = EntityResolver::new(&catalog).resolve(q);
        assert_eq!(entities.len(), 1);
        assert_eq!(values(&entities[0]), vec!["ABENGOUROU, COMMUNE ET SOUS-PREFECTURE"]);
        assert_eq!(unresolved_place(q, &entities), None);
    }

    #[test]
    fn test_candidate_surname() {
        let entities = resolver().resolve("Score de Ouattara Salif");
        assert_eq!(entities.len(), 1);
        assert_eq!(values(&entities[0]), vec!["OUATTARA SALIF"]);
        assert_eq!(entities[0].matches[0].kind, MatchKind::Exact);

        let entities = resolver().resolve("Qui sont les adversaires de Traore ?");
        assert_eq!(values(&entities[0]), vec!["TRAORE ISSOUF"]);
    }
}
