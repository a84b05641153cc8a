//! Prompt construction for the language backend

use crate::catalog::SchemaCatalog;
use crate::pipeline::types::{ResolvedEntity, Topic};

/// Sentinel the model must answer when no SQL can answer the question
pub const UNANSWERABLE: &str = "UNANSWERABLE";

/// System and user prompts asking for a JSON domain verdict
pub fn classification_prompt(question: &str) -> (String, String) {
    let topics = Topic::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let system = format!(
        "You classify questions sent to an assistant that only knows the official results \
of the 2025 legislative elections in Cote d'Ivoire.\n\
Allowed topics: {topics}.\n\
A question is in domain only if it asks for data about one of these topics. General civics, \
history, institutions, opinions and predictions are out of domain.\n\
Answer with one JSON object and nothing else: \
{{\"in_domain\": true|false, \"topic\": \"<one allowed topic or null>\", \"reason\": \"<short reason>\"}}"
    );

    (system, format!("Question: {}", question.trim()))
}

/// System and user prompts asking for a single read-only SQL query
pub fn translation_prompt(
    question: &str,
    catalog: &SchemaCatalog,
    entities: &[ResolvedEntity],
    feedback: Option<&str>,
) -> (String, String) {
    let mut schema = String::new();
    for table in &catalog.tables {
        schema.push_str(&format!("- {}: {}\n", table.name, table.description));
        for column in &table.columns {
            schema.push_str(&format!(
                "    {} ({}): {}\n",
                column.name,
                column.semantic_type.label().to_lowercase(),
                column.description
            ));
        }
    }

    let system = format!(
        "You are a strict PostgreSQL generator for the 2025 legislative election results of Cote d'Ivoire.\n\
TABLES (use no other table or column):\n{schema}\n\
RULES:\n\
1. Answer with one SELECT statement only. No comments, no explanation, no semicolon.\n\
2. Totals use SUM() on the relevant column of vw_results_clean.\n\
3. Percentages (score, taux_participation) are read as published, never recomputed.\n\
4. Never filter on region when the user names a constituency, and vice versa.\n\
5. Use the exact values given under ENTITIES in WHERE clauses.\n\
6. Lists of rows end with LIMIT {limit}.\n\
7. Allowed functions: {functions}.\n\
8. If the question cannot be answered from these tables, answer {sentinel}.",
        schema = schema,
        limit = catalog.security.auto_limit,
        functions = catalog.security.allowed_functions.join(", "),
        sentinel = UNANSWERABLE,
    );

    let mut prompt = format!("Question: {}", question.trim());
    let known: Vec<String> = entities
        .iter()
        .flat_map(|e| e.matches.iter())
        .map(|m| format!("{} = '{}'", m.column, m.value.replace('\'', "''")))
        .collect();
    if !known.is_empty() {
        prompt.push_str("\nENTITIES: ");
        prompt.push_str(&known.join("; "));
    }
    if let Some(feedback) = feedback {
        prompt.push_str("\nPREVIOUS ATTEMPT FAILED:\n");
        prompt.push_str(feedback.trim());
        prompt.push_str("\nWrite a corrected query that avoids this error.");
    }

    (system, prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_catalog;
    use crate::pipeline::types::{EntityMatch, MatchKind};

    #[test]
    fn test_translation_prompt_lists_every_table_and_entity() {
        let catalog = test_catalog();
        let entities = vec![ResolvedEntity {
            surface: "N'Zi".to_string(),
            matches: vec![EntityMatch {
                table: "vw_results_clean".to_string(),
                column: "region".to_string(),
                value: "N'ZI".to_string(),
                kind: MatchKind::Exact,
            }],
        }];

        let (system, prompt) = translation_prompt("Voix du RHDP dans le N'Zi ?", &catalog, &entities, None);

        for table in &catalog.tables {
            assert!(system.contains(&table.name));
        }
        assert!(system.contains("LIMIT 50"));
        assert!(system.contains(UNANSWERABLE));
        assert!(prompt.contains("region = 'N''ZI'"));
        assert!(!prompt.contains("PREVIOUS ATTEMPT"));
    }

    #[test]
    fn test_translation_prompt_carries_feedback() {
        let catalog = test_catalog();
        let feedback = "SELECT votes FROM vw_results_clean\nError: column \"votes\" does not exist";
        let (_, prompt) = translation_prompt("Total des voix ?", &catalog, &[], Some(feedback));
        assert!(prompt.contains("PREVIOUS ATTEMPT FAILED"));
        assert!(prompt.contains("column \"votes\" does not exist"));
    }

    #[test]
    fn test_classification_prompt_names_closed_taxonomy() {
        let (system, prompt) = classification_prompt("  Qui a gagné à Cocody ? ");
        assert!(system.contains("seat_allocation"));
        assert!(system.contains("in_domain"));
        assert_eq!(prompt, "Question: Qui a gagné à Cocody ?");
    }
}
