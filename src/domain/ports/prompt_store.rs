//! Prompt templates.
//!
//! Templates are data, keyed by `(name, locale)`. Services fetch them through
//! the [`PromptStore`] trait so deployments can swap wording without touching
//! pipeline code; [`BuiltinPromptStore`] carries the defaults.

use std::collections::HashMap;

use crate::domain::error::SchedulerError;

/// Identifier of a prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateName {
    IntentDetection,
    KeywordExtraction,
    MemoryReranking,
    UnrelatedFilter,
    RedundantFilter,
    AnswerAbility,
    RewriteEnhancement,
    RecreateEnhancement,
    EnlargeRecall,
    MemoryAssembly,
}

/// Template locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    En,
}

/// Port over a prompt template store.
pub trait PromptStore: Send + Sync {
    /// Render a template, substituting `{name}` placeholders from `vars`.
    fn render(
        &self,
        name: TemplateName,
        locale: Locale,
        vars: &[(&str, String)],
    ) -> Result<String, SchedulerError>;
}

const INTENT_DETECTION_EN: &str = "\
You monitor a conversational agent's working memory. Given the recent user \
queries and the current working-memory texts, decide whether new evidence \
must be retrieved from long-term memory.

Recent queries:
{queries}

Current working memory:
{working_memory}

Answer with a JSON object:
{\"trigger_retrieval\": true|false, \"missing_evidences\": [\"<one search phrase per missing fact>\"]}
Set trigger_retrieval to false and missing_evidences to [] when the working \
memory already covers the queries.";

const KEYWORD_EXTRACTION_EN: &str = "\
Extract the salient keywords from the query below. Keep proper nouns and \
domain terms; drop stop words.

Query: {query}

Answer with a JSON object: {\"keywords\": [\"...\"]}";

const MEMORY_RERANKING_EN: &str = "\
Rank the memories below by how useful they are for answering the query. \
The most useful memory comes first.

Query:
{queries}

Current order:
{current_order}

Answer with a JSON object:
{\"new_order\": [<indices into the current order, best first>], \"reasoning\": \"<one sentence>\"}";

const UNRELATED_FILTER_EN: &str = "\
Decide for each memory whether it is related to any of the queries in the \
history below.

Query history:
{queries}

Memories:
{memories}

Answer with a JSON object: {\"keep\": [true|false, one per memory, in order]}";

const REDUNDANT_FILTER_EN: &str = "\
Decide for each memory whether it repeats information already present in an \
earlier memory of the list, given the query history.

Query history:
{queries}

Memories:
{memories}

Answer with a JSON object: {\"keep\": [true|false, one per memory, in order]}";

const ANSWER_ABILITY_EN: &str = "\
Judge whether the memories below contain enough information to answer the \
query.

Query: {query}

Memories:
{memory_list}

Answer with a JSON object: {\"result\": true|false, \"reason\": \"<one sentence>\"}";

const REWRITE_ENHANCEMENT_EN: &str = "\
Rewrite each memory below so it directly serves the query history, keeping \
all factual content. Return one line per memory in the form `[index] new \
text`, preserving the given indices.

Query history:
{query_history}

Memories:
{memories}";

const RECREATE_ENHANCEMENT_EN: &str = "\
Distill the memories below into self-contained statements that serve the \
query history. Return a bullet list, one statement per line, starting each \
line with `- `.

Query history:
{query_history}

Memories:
{memories}";

const ENLARGE_RECALL_EN: &str = "\
The memories below were retrieved for the query but may be incomplete. If a \
follow-up retrieval would help, produce a short search hint.

Query: {query}

Memories:
{memories_inline}

Answer with a JSON object: {\"hint\": \"<search phrase or empty>\", \"trigger_recall\": true|false}";

const MEMORY_ASSEMBLY_EN: &str = "\
The following facts about the user are currently relevant:
{memory_text}";

/// Built-in English templates.
#[derive(Debug, Default, Clone)]
pub struct BuiltinPromptStore;

impl BuiltinPromptStore {
    pub fn new() -> Self {
        Self
    }

    fn template(name: TemplateName, locale: Locale) -> &'static str {
        match (name, locale) {
            (TemplateName::IntentDetection, Locale::En) => INTENT_DETECTION_EN,
            (TemplateName::KeywordExtraction, Locale::En) => KEYWORD_EXTRACTION_EN,
            (TemplateName::MemoryReranking, Locale::En) => MEMORY_RERANKING_EN,
            (TemplateName::UnrelatedFilter, Locale::En) => UNRELATED_FILTER_EN,
            (TemplateName::RedundantFilter, Locale::En) => REDUNDANT_FILTER_EN,
            (TemplateName::AnswerAbility, Locale::En) => ANSWER_ABILITY_EN,
            (TemplateName::RewriteEnhancement, Locale::En) => REWRITE_ENHANCEMENT_EN,
            (TemplateName::RecreateEnhancement, Locale::En) => RECREATE_ENHANCEMENT_EN,
            (TemplateName::EnlargeRecall, Locale::En) => ENLARGE_RECALL_EN,
            (TemplateName::MemoryAssembly, Locale::En) => MEMORY_ASSEMBLY_EN,
        }
    }
}

impl PromptStore for BuiltinPromptStore {
    fn render(
        &self,
        name: TemplateName,
        locale: Locale,
        vars: &[(&str, String)],
    ) -> Result<String, SchedulerError> {
        let template = Self::template(name, locale);
        let vars: HashMap<&str, &String> = vars.iter().map(|(k, v)| (*k, v)).collect();
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let tail = &rest[open + 1..];
            match tail.find('}') {
                Some(close) if tail[..close].chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && close > 0 => {
                    let key = &tail[..close];
                    if let Some(value) = vars.get(key) {
                        rendered.push_str(value);
                    } else {
                        // Unbound placeholders (e.g. JSON braces in the answer
                        // shape) pass through verbatim.
                        rendered.push('{');
                        rendered.push_str(key);
                        rendered.push('}');
                    }
                    rest = &tail[close + 1..];
                }
                _ => {
                    rendered.push('{');
                    rest = tail;
                }
            }
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}
