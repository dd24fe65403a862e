//! Prompted operations
//!
//! Every model call in the pipeline has the same shape: fixed instructions as
//! the system message, a filled-in template as the user message, and a parser
//! that turns the reply into a typed value. `PromptedOperation` captures that
//! shape once and `PromptCatalog` holds the five configured instances.

use crate::config::SchemaDescription;
use crate::error::Result;
use crate::llm::{ChatMessage, TextGenerator};
use crate::sql_validator::strip_code_fences;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-z_]+)\}").unwrap();
}

/// Reply of the intent gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentVerdict {
    Valid,
    Invalid,
    /// Anything other than the two expected words. Treated as a rejection.
    Unrecognized(String),
}

/// Reply of the DDL gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlVerdict {
    Ok,
    Error,
    /// Anything other than the two expected words. Treated as blocked.
    Unrecognized(String),
}

/// Lowercase the reply and drop wrapping whitespace, quotes and a final period.
/// No substring matching: "Valid, probably" stays unrecognized.
fn normalize_keyword(reply: &str) -> String {
    reply
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .trim_end_matches('.')
        .to_lowercase()
}

/// The keyword the reply consists of, or the one its first non-empty line
/// consists of when the model adds an explanation below it.
fn reply_keyword<'a>(reply: &str, keywords: &[&'a str]) -> Option<&'a str> {
    let whole = normalize_keyword(reply);
    let first_line = reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(normalize_keyword)
        .unwrap_or_default();
    keywords.iter().copied().find(|k| *k == whole || *k == first_line)
}

pub fn parse_intent(reply: &str) -> IntentVerdict {
    match reply_keyword(reply, &["valid", "invalid"]) {
        Some("valid") => IntentVerdict::Valid,
        Some(_) => IntentVerdict::Invalid,
        None => IntentVerdict::Unrecognized(reply.trim().to_string()),
    }
}

pub fn parse_ddl(reply: &str) -> DdlVerdict {
    match reply_keyword(reply, &["ok", "error"]) {
        Some("ok") => DdlVerdict::Ok,
        Some(_) => DdlVerdict::Error,
        None => DdlVerdict::Unrecognized(reply.trim().to_string()),
    }
}

fn parse_text(reply: &str) -> String {
    reply.trim().to_string()
}

/// Replace `{name}` placeholders in one pass; values are never re-scanned.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub struct PromptedOperation<T> {
    name: &'static str,
    instructions: String,
    template: &'static str,
    parse: fn(&str) -> T,
}

impl<T> PromptedOperation<T> {
    pub fn new(name: &'static str, instructions: String, template: &'static str, parse: fn(&str) -> T) -> Self {
        Self {
            name,
            instructions,
            template,
            parse,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn messages(&self, vars: &[(&str, &str)]) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.instructions.clone()),
            ChatMessage::user(render_template(self.template, vars)),
        ]
    }

    pub async fn invoke(&self, llm: &dyn TextGenerator, vars: &[(&str, &str)]) -> Result<T> {
        let reply = llm.complete(&self.messages(vars)).await?;
        debug!(operation = self.name, "model reply: {}", reply);
        Ok((self.parse)(&reply))
    }
}

const INTENT_INSTRUCTIONS: &str = "You are a Query Intent Assistant. You are given a user question and the database table schema. \
If the question can be answered using SQL on the given schema, respond exactly 'Valid'. \
If it cannot, respond exactly 'Invalid'. Respond with that single word and nothing else.";

const REGENERATE_INSTRUCTIONS: &str = "You are a SQL Verification Assistant. The SQL below failed when it was run against the database. \
Fix it using the schema and the database error so that it is a single valid SELECT statement. \
Never produce INSERT, UPDATE, DELETE, DROP, CREATE or ALTER statements. \
Return only the corrected SQL query and nothing else.";

fn generation_instructions(schema: &str) -> String {
    format!(
        r#"You are a proficient SQL Generation bot. Understand the background and table schemas and generate the correct SQL query for the asked question.

Background:
This data represents a supply-chain management system with the following entities:
- suppliers: companies supplying goods
- manufacturers: organizations that produce products
- warehouses: storage locations
- products: catalog of items with pricing and supply information
- inventory: current stock levels per warehouse/product
- customers: clients placing orders
- orders: customer orders with dates, status and total amounts
- order_items: line-items linking products to orders
- shipments: dispatch records tied to orders, with carrier and tracking number

{}

Task:
- Analyze the table descriptions above and the relationships between them.
- Generate a SQL query answering the User Question.

Note:
Multiple rows can share the same foreign key (e.g. one order with multiple items).
Use DISTINCT when listing shipments or products to avoid duplicates unless detailed rows are required.

Output format:
- Output only the SQL query and nothing else.
- Do not add any sentences before or after the SQL query."#,
        schema
    )
}

fn ddl_instructions(forbidden_tokens: &[String]) -> String {
    let tokens: Vec<String> = forbidden_tokens.iter().map(|t| format!("'{}'", t.to_uppercase())).collect();
    format!(
        "You are a DDL Validation Assistant. If the SQL contains DDL or data-modifying tokens like {}, respond 'ERROR', else respond 'OK'. \
Respond with that single word and nothing else.",
        tokens.join(",")
    )
}

fn summarize_instructions(schema: &str) -> String {
    format!(
        r#"You are an AI assistant who answers the User in natural language using the database result provided to you.

{}

Input:
- User Question: the question asked by the user
- SQL Query: the SQL query executed against the database
- Database result: the rows returned by the SQL query

Task:
- Understand the table schema and the SQL query used to answer the User Question.
- Analyze the database result.
- Answer the User's question using only that information.

Output format:
- Keep the answer well formatted in bulleted points.
- Keep the answer specific to the question, no additional information.
- Output only the answer.

Special instruction:
If the database result is empty, respond that you are unable to answer the question since you do not have enough data. DO NOT make up an answer."#,
        schema
    )
}

/// The five model roles of a pipeline run.
pub struct PromptCatalog {
    pub intent: PromptedOperation<IntentVerdict>,
    pub generate: PromptedOperation<String>,
    pub ddl_gate: PromptedOperation<DdlVerdict>,
    pub regenerate: PromptedOperation<String>,
    pub summarize: PromptedOperation<String>,
}

impl PromptCatalog {
    pub fn new(schema: &SchemaDescription, forbidden_tokens: &[String]) -> Self {
        Self {
            intent: PromptedOperation::new(
                "intent_check",
                INTENT_INSTRUCTIONS.to_string(),
                "Schema: {schema}\nUser Question: {query}",
                parse_intent,
            ),
            generate: PromptedOperation::new(
                "generate_sql",
                generation_instructions(schema.as_str()),
                "User Question: {query}",
                strip_code_fences,
            ),
            ddl_gate: PromptedOperation::new(
                "ddl_gate",
                ddl_instructions(forbidden_tokens),
                "SQL to validate: {sql}",
                parse_ddl,
            ),
            regenerate: PromptedOperation::new(
                "regenerate_sql",
                REGENERATE_INSTRUCTIONS.to_string(),
                "Original SQL: {sql}\nSchema:\n{schema}\nError: {error}",
                strip_code_fences,
            ),
            summarize: PromptedOperation::new(
                "summarize",
                summarize_instructions(schema.as_str()),
                "User Question: {query}\nSQL Query: {sql_query}\nDatabase result:\n{db_result}",
                parse_text,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FORBIDDEN_TOKENS;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Echo {
        reply: String,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl TextGenerator for Echo {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.reply.clone())
        }
    }

    fn catalog() -> PromptCatalog {
        let tokens: Vec<String> = DEFAULT_FORBIDDEN_TOKENS.iter().map(|t| t.to_string()).collect();
        PromptCatalog::new(&SchemaDescription::new("suppliers(supplier_id, country)"), &tokens)
    }

    #[test]
    fn test_intent_parsing_is_exact() {
        assert_eq!(parse_intent("Valid"), IntentVerdict::Valid);
        assert_eq!(parse_intent("  valid.\n"), IntentVerdict::Valid);
        assert_eq!(parse_intent("\"INVALID\""), IntentVerdict::Invalid);
        assert_eq!(
            parse_intent("Valid, I think"),
            IntentVerdict::Unrecognized("Valid, I think".to_string())
        );
        assert!(matches!(parse_intent("The query is valid"), IntentVerdict::Unrecognized(_)));
    }

    #[test]
    fn test_ddl_parsing_is_exact() {
        assert_eq!(parse_ddl("OK"), DdlVerdict::Ok);
        assert_eq!(parse_ddl("error"), DdlVerdict::Error);
        assert!(matches!(parse_ddl("ERROR: contains DELETE"), DdlVerdict::Unrecognized(_)));
        assert!(matches!(parse_ddl("okay"), DdlVerdict::Unrecognized(_)));
        assert!(matches!(parse_ddl("The query is OK"), DdlVerdict::Unrecognized(_)));
    }

    #[test]
    fn test_keyword_on_first_line_with_explanation() {
        assert_eq!(parse_ddl("OK\n\nThe query is safe"), DdlVerdict::Ok);
        assert_eq!(parse_ddl("\nERROR\nThe statement contains DELETE."), DdlVerdict::Error);
        assert_eq!(parse_intent("Valid.\nThe orders table has a status column."), IntentVerdict::Valid);
        assert!(matches!(parse_ddl("Looks fine\nOK"), DdlVerdict::Unrecognized(_)));
    }

    #[test]
    fn test_render_template_single_pass() {
        let rendered = render_template(
            "Original SQL: {sql}\nError: {error}\nKeep: {unknown}",
            &[("sql", "SELECT '{error}'"), ("error", "Unknown column")],
        );
        assert_eq!(rendered, "Original SQL: SELECT '{error}'\nError: Unknown column\nKeep: {unknown}");
    }

    #[test]
    fn test_schema_grounding() {
        let catalog = catalog();
        let gen = catalog.generate.messages(&[("query", "List all suppliers in Germany")]);
        assert!(gen[0].content.contains("suppliers(supplier_id, country)"));
        assert_eq!(gen[1].content, "User Question: List all suppliers in Germany");

        let ddl = catalog.ddl_gate.messages(&[("sql", "SELECT 1")]);
        assert!(ddl[0].content.contains("'DELETE'"));
        assert_eq!(ddl[1].content, "SQL to validate: SELECT 1");
    }

    #[tokio::test]
    async fn test_invoke_applies_parser() {
        let llm = Echo {
            reply: "```sql\nSELECT * FROM suppliers\n```".to_string(),
            seen: Mutex::new(Vec::new()),
        };
        let sql = catalog().generate.invoke(&llm, &[("query", "suppliers?")]).await.unwrap();
        assert_eq!(sql, "SELECT * FROM suppliers");
        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 2);
    }
}
