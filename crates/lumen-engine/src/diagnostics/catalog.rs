//! The error catalogue
//!
//! A process-wide, lazily initialised registry of diagnostic definitions.
//! Every core component reports through it: entries carry templated hints
//! and suggestions, and lookups work by exact code, by case-insensitive
//! message pattern (stage-filtered), or by stage.

use super::codes::{self, ErrorStage};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::RegexBuilder;
use rustc_hash::FxHashMap;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A hard error
    Error,
    /// A warning; compilation continues
    Warning,
    /// An informational note
    Note,
}

/// A catalogue entry: the static definition of one diagnostic
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Code, e.g. "E201"
    pub code: String,
    /// Owning stage
    pub stage: ErrorStage,
    /// Severity
    pub kind: ErrorKind,
    /// Short description of the error class
    pub description: String,
    /// Regex matched (case-insensitively) against reported messages
    pub pattern: String,
    /// Hint template; `{lexeme}`, `{expected}`, `{file}`, `{line}`,
    /// `{column}` are substituted at report time
    pub hint_template: Option<String>,
    /// Suggestion template, same substitutions
    pub suggestion_template: Option<String>,
}

/// A fully resolved diagnostic ready for rendering
#[derive(Debug, Clone, Default)]
pub struct Diagnostic {
    /// Catalogue code
    pub code: String,
    /// Kind string, e.g. "SemanticError"
    pub kind: String,
    /// Description / message
    pub description: String,
    /// Source file
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
    /// The problematic token
    pub token: Option<String>,
    /// Resolved hint
    pub hint: Option<String>,
    /// Resolved suggestion
    pub suggestion: Option<String>,
    /// Location of the construct that caused this (e.g. an unclosed opener)
    pub caused_by: Option<String>,
    /// Source context lines around the error
    pub context_lines: Vec<String>,
    /// Owning stage
    pub stage: ErrorStage,
}

/// Substitution context for hint/suggestion templates
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub lexeme: Option<&'a str>,
    pub expected: Option<&'a str>,
    pub file: &'a str,
    pub line: u32,
    pub column: u32,
}

fn substitute(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{lexeme}", ctx.lexeme.unwrap_or(""))
        .replace("{expected}", ctx.expected.unwrap_or(""))
        .replace("{file}", ctx.file)
        .replace("{line}", &ctx.line.to_string())
        .replace("{column}", &ctx.column.to_string())
}

struct PatternMatcher {
    regex: regex::Regex,
    code: String,
    stage: ErrorStage,
}

/// The catalogue proper
pub struct ErrorCatalog {
    entries: FxHashMap<String, CatalogEntry>,
    matchers: Vec<PatternMatcher>,
    by_stage: FxHashMap<ErrorStage, Vec<String>>,
}

impl ErrorCatalog {
    fn new() -> Self {
        let mut catalog = ErrorCatalog {
            entries: FxHashMap::default(),
            matchers: Vec::new(),
            by_stage: FxHashMap::default(),
        };
        catalog.seed();
        catalog
    }

    /// Add a definition. Returns false if the code is already present.
    pub fn add_entry(&mut self, entry: CatalogEntry) -> bool {
        if self.entries.contains_key(&entry.code) {
            return false;
        }
        codes::reserve_code(&entry.code);
        if let Ok(regex) = RegexBuilder::new(&entry.pattern)
            .case_insensitive(true)
            .build()
        {
            self.matchers.push(PatternMatcher {
                regex,
                code: entry.code.clone(),
                stage: entry.stage,
            });
        }
        self.by_stage
            .entry(entry.stage)
            .or_default()
            .push(entry.code.clone());
        self.entries.insert(entry.code.clone(), entry);
        true
    }

    /// Look up a definition by exact code
    pub fn lookup_by_code(&self, code: &str) -> Option<&CatalogEntry> {
        self.entries.get(code)
    }

    /// Look up a definition by matching a message against the registered
    /// patterns, restricted to one stage
    pub fn lookup_by_message(&self, message: &str, stage: ErrorStage) -> Option<&CatalogEntry> {
        self.matchers
            .iter()
            .find(|m| m.stage == stage && m.regex.is_match(message))
            .and_then(|m| self.entries.get(&m.code))
    }

    /// All definitions belonging to a stage
    pub fn entries_for_stage(&self, stage: ErrorStage) -> Vec<&CatalogEntry> {
        self.by_stage
            .get(&stage)
            .map(|code_list| {
                code_list
                    .iter()
                    .filter_map(|c| self.entries.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered definitions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalogue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a renderable diagnostic for a reported message.
    ///
    /// Classifies the message against the catalogue (allocating a fresh code
    /// when no pattern matches) and resolves hint/suggestion templates.
    pub fn report(
        &self,
        stage: ErrorStage,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        lexeme: Option<&str>,
        expected: Option<&str>,
    ) -> Diagnostic {
        let ctx = TemplateContext { lexeme, expected, file, line, column };
        match self.lookup_by_message(message, stage) {
            Some(entry) => Diagnostic {
                code: entry.code.clone(),
                kind: stage.kind_name().to_string(),
                description: message.to_string(),
                file: file.to_string(),
                line,
                column,
                token: lexeme.map(str::to_string),
                hint: entry.hint_template.as_deref().map(|t| substitute(t, &ctx)),
                suggestion: entry
                    .suggestion_template
                    .as_deref()
                    .map(|t| substitute(t, &ctx)),
                caused_by: None,
                context_lines: Vec::new(),
                stage,
            },
            None => Diagnostic {
                code: codes::generate_error_code(stage, message),
                kind: stage.kind_name().to_string(),
                description: message.to_string(),
                file: file.to_string(),
                line,
                column,
                token: lexeme.map(str::to_string),
                hint: None,
                suggestion: None,
                caused_by: None,
                context_lines: Vec::new(),
                stage,
            },
        }
    }

    fn seed(&mut self) {
        let defs: &[(&str, ErrorStage, &str, &str, Option<&str>, Option<&str>)] = &[
            // Lexical
            (
                "E001",
                ErrorStage::Lexical,
                "invalid character",
                r"invalid character",
                Some("remove or replace the character `{lexeme}`"),
                None,
            ),
            (
                "E002",
                ErrorStage::Lexical,
                "unterminated string literal",
                r"unterminated string",
                Some("close the string before the end of line {line}"),
                Some("add a closing quote"),
            ),
            // Syntax
            (
                "E100",
                ErrorStage::Syntax,
                "unexpected token",
                r"unexpected token",
                Some("did you mean `{expected}`?"),
                None,
            ),
            (
                "E101",
                ErrorStage::Syntax,
                "missing semicolon",
                r"missing .?;.?|expected .?;.?",
                None,
                Some("add `;` at the end of line {line}"),
            ),
            // Semantic
            (
                "E201",
                ErrorStage::Semantic,
                "undeclared identifier",
                r"undeclared (identifier|variable)",
                Some("`{lexeme}` is not declared in this scope"),
                Some("declare `{lexeme}` before use"),
            ),
            (
                "E202",
                ErrorStage::Semantic,
                "type mismatch",
                r"(cannot (initialise|assign)|type mismatch|return type mismatch)",
                Some("expected `{expected}`"),
                None,
            ),
            (
                "E203",
                ErrorStage::Semantic,
                "wrong argument count",
                r"wrong number of arguments",
                None,
                None,
            ),
            (
                "E210",
                ErrorStage::Semantic,
                "unhandled fallible expression",
                r"unhandled fallible expression",
                Some("the result of `{lexeme}` carries an error you must handle"),
                Some("handle the result with `?`, `? else`, or a match"),
            ),
            (
                "E211",
                ErrorStage::Semantic,
                "error type not propagatable",
                r"cannot be propagated by function",
                Some("add the error type to the function's declared error set"),
                None,
            ),
            (
                "E212",
                ErrorStage::Semantic,
                "non-exhaustive match",
                r"non-exhaustive match",
                Some("add arms for the missing variants or a generic `err` arm"),
                None,
            ),
            (
                "E213",
                ErrorStage::Semantic,
                "undeclared error production",
                r"is not declared by function",
                None,
                Some("declare the error type in the function signature"),
            ),
            (
                "E214",
                ErrorStage::Semantic,
                "declared error never produced",
                r"never produced by function",
                Some("remove the unused error type from the declaration"),
                None,
            ),
            (
                "E215",
                ErrorStage::Semantic,
                "break or continue outside loop",
                r"(break|continue) statement outside of loop",
                None,
                None,
            ),
            // Runtime
            (
                "E400",
                ErrorStage::Runtime,
                "division by zero",
                r"division by zero",
                None,
                None,
            ),
            (
                "E401",
                ErrorStage::Runtime,
                "index out of bounds",
                r"index out of (bounds|range)",
                None,
                None,
            ),
            (
                "E402",
                ErrorStage::Runtime,
                "null reference",
                r"null reference",
                None,
                None,
            ),
            (
                "E403",
                ErrorStage::Runtime,
                "stack underflow or overflow",
                r"stack (underflow|overflow)",
                None,
                None,
            ),
            // Bytecode
            (
                "E500",
                ErrorStage::Bytecode,
                "unsupported construct",
                r"unsupported (statement|expression)",
                None,
                None,
            ),
            (
                "E501",
                ErrorStage::Bytecode,
                "malformed generation sequence",
                r"(invalid opcode|malformed)",
                None,
                None,
            ),
            // Compilation
            (
                "E600",
                ErrorStage::Compilation,
                "compilation failed",
                r"compilation failed",
                None,
                None,
            ),
            (
                "E601",
                ErrorStage::Compilation,
                "missing function symbol",
                r"missing (function )?symbol",
                None,
                None,
            ),
            (
                "E602",
                ErrorStage::Compilation,
                "block already terminated",
                r"already terminated",
                None,
                None,
            ),
        ];
        for (code, stage, description, pattern, hint, suggestion) in defs {
            self.add_entry(CatalogEntry {
                code: code.to_string(),
                stage: *stage,
                kind: ErrorKind::Error,
                description: description.to_string(),
                pattern: pattern.to_string(),
                hint_template: hint.map(str::to_string),
                suggestion_template: suggestion.map(str::to_string),
            });
        }
    }
}

static CATALOG: Lazy<RwLock<ErrorCatalog>> = Lazy::new(|| RwLock::new(ErrorCatalog::new()));

/// Access the process-wide catalogue
pub fn global_catalog() -> &'static RwLock<ErrorCatalog> {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_lookup_by_code() {
        let catalog = global_catalog().read();
        let entry = catalog.lookup_by_code("E210").unwrap();
        assert_eq!(entry.stage, ErrorStage::Semantic);
        assert!(entry.description.contains("fallible"));
        assert!(catalog.lookup_by_code("E999").is_none());
    }

    #[test]
    fn test_lookup_by_message_is_stage_filtered() {
        let catalog = global_catalog().read();
        let hit = catalog
            .lookup_by_message("Unhandled Fallible Expression: call to `f`", ErrorStage::Semantic)
            .unwrap();
        assert_eq!(hit.code, "E210");
        // Same message in another stage does not match semantic patterns.
        assert!(catalog
            .lookup_by_message("unhandled fallible expression", ErrorStage::Runtime)
            .is_none());
    }

    #[test]
    fn test_report_resolves_templates() {
        let catalog = global_catalog().read();
        let diag = catalog.report(
            ErrorStage::Semantic,
            "undeclared identifier `foo`",
            "main.lm",
            7,
            3,
            Some("foo"),
            None,
        );
        assert_eq!(diag.code, "E201");
        assert_eq!(diag.kind, "SemanticError");
        assert_eq!(diag.hint.as_deref(), Some("`foo` is not declared in this scope"));
        assert_eq!(diag.suggestion.as_deref(), Some("declare `foo` before use"));
    }

    #[test]
    fn test_report_unmatched_message_gets_generated_code() {
        let catalog = global_catalog().read();
        let a = catalog.report(
            ErrorStage::Bytecode,
            "a very particular bytecode condition",
            "x.lm",
            1,
            1,
            None,
            None,
        );
        let b = catalog.report(
            ErrorStage::Bytecode,
            "a very particular bytecode condition",
            "x.lm",
            2,
            1,
            None,
            None,
        );
        assert_eq!(a.code, b.code);
        let number: u32 = a.code[1..].parse().unwrap();
        assert!(ErrorStage::Bytecode.contains(number));
    }

    #[test]
    fn test_entries_for_stage() {
        let catalog = global_catalog().read();
        let semantic = catalog.entries_for_stage(ErrorStage::Semantic);
        assert!(semantic.len() >= 5);
        assert!(semantic.iter().all(|e| e.stage == ErrorStage::Semantic));
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let mut catalog = ErrorCatalog::new();
        let dup = CatalogEntry {
            code: "E201".to_string(),
            stage: ErrorStage::Semantic,
            kind: ErrorKind::Error,
            description: "dup".to_string(),
            pattern: "dup".to_string(),
            hint_template: None,
            suggestion_template: None,
        };
        assert!(!catalog.add_entry(dup));
    }
}
