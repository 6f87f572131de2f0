//! Deterministic error-code assignment
//!
//! Codes are reserved by stage: E001-E099 lexical, E100-E199 syntax,
//! E200-E299 semantic, E400-E499 runtime, E500-E599 bytecode, E600-E699
//! compilation. A code for a (stage, message) pair is derived by hashing the
//! message into the stage's range and probing past collisions; the assignment
//! is memoised, so two identical calls always return the same code.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::{Hash, Hasher};

/// The processing stage a diagnostic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    /// Scanning (E001-E099)
    Lexical,
    /// Parsing (E100-E199)
    Syntax,
    /// Type checking and name resolution (E200-E299)
    Semantic,
    /// Errors raised by generated code (E400-E499)
    Runtime,
    /// Bytecode generation (E500-E599)
    Bytecode,
    /// LIR and JIT compilation (E600-E699)
    Compilation,
}

impl ErrorStage {
    /// First code number of this stage's range
    pub fn range_start(self) -> u32 {
        match self {
            ErrorStage::Lexical => 1,
            ErrorStage::Syntax => 100,
            ErrorStage::Semantic => 200,
            ErrorStage::Runtime => 400,
            ErrorStage::Bytecode => 500,
            ErrorStage::Compilation => 600,
        }
    }

    /// Last code number of this stage's range (inclusive)
    pub fn range_end(self) -> u32 {
        match self {
            ErrorStage::Lexical => 99,
            _ => self.range_start() + 99,
        }
    }

    /// Whether a numeric code falls inside this stage's range
    pub fn contains(self, code_number: u32) -> bool {
        (self.range_start()..=self.range_end()).contains(&code_number)
    }

    /// The user-facing kind string, e.g. "SemanticError"
    pub fn kind_name(self) -> &'static str {
        match self {
            ErrorStage::Lexical => "LexicalError",
            ErrorStage::Syntax => "SyntaxError",
            ErrorStage::Semantic => "SemanticError",
            ErrorStage::Runtime => "RuntimeError",
            ErrorStage::Bytecode => "BytecodeError",
            ErrorStage::Compilation => "CompilationError",
        }
    }
}

impl Default for ErrorStage {
    fn default() -> Self {
        ErrorStage::Semantic
    }
}

struct CodeRegistry {
    assigned: FxHashSet<String>,
    by_message: FxHashMap<(ErrorStage, String), String>,
}

static REGISTRY: Lazy<Mutex<CodeRegistry>> = Lazy::new(|| {
    Mutex::new(CodeRegistry {
        assigned: FxHashSet::default(),
        by_message: FxHashMap::default(),
    })
});

fn format_code(number: u32) -> String {
    format!("E{:03}", number)
}

fn message_hash(message: &str) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    message.hash(&mut hasher);
    hasher.finish()
}

/// Generate (or recall) the error code for a (stage, message) pair.
///
/// Identical calls return the same code; distinct messages get distinct
/// codes within the stage's range until the range is exhausted, after which
/// the stage's base code is reused.
pub fn generate_error_code(stage: ErrorStage, message: &str) -> String {
    let mut registry = REGISTRY.lock();
    if let Some(code) = registry.by_message.get(&(stage, message.to_string())) {
        return code.clone();
    }

    let start = stage.range_start();
    let span = stage.range_end() - start + 1;
    let preferred = start + (message_hash(message) % span as u64) as u32;

    let mut code = None;
    for probe in 0..span {
        let candidate = start + (preferred - start + probe) % span;
        let formatted = format_code(candidate);
        if !registry.assigned.contains(&formatted) {
            code = Some(formatted);
            break;
        }
    }
    let code = code.unwrap_or_else(|| format_code(start));

    registry.assigned.insert(code.clone());
    registry
        .by_message
        .insert((stage, message.to_string()), code.clone());
    code
}

/// Reserve a specific code so generation probes past it
pub fn reserve_code(code: &str) {
    REGISTRY.lock().assigned.insert(code.to_string());
}

/// Whether a code has been assigned or reserved
pub fn is_code_registered(code: &str) -> bool {
    REGISTRY.lock().assigned.contains(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        assert_eq!(ErrorStage::Lexical.range_start(), 1);
        assert_eq!(ErrorStage::Syntax.range_start(), 100);
        assert_eq!(ErrorStage::Semantic.range_start(), 200);
        assert_eq!(ErrorStage::Runtime.range_start(), 400);
        assert_eq!(ErrorStage::Bytecode.range_start(), 500);
        assert_eq!(ErrorStage::Compilation.range_start(), 600);
        assert!(ErrorStage::Semantic.contains(250));
        assert!(!ErrorStage::Semantic.contains(300));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generate_error_code(ErrorStage::Semantic, "some odd test-only message");
        let b = generate_error_code(ErrorStage::Semantic, "some odd test-only message");
        assert_eq!(a, b);
        assert!(a.starts_with('E'));
        let number: u32 = a[1..].parse().unwrap();
        assert!(ErrorStage::Semantic.contains(number));
    }

    #[test]
    fn test_distinct_messages_get_distinct_codes() {
        let a = generate_error_code(ErrorStage::Bytecode, "test message alpha");
        let b = generate_error_code(ErrorStage::Bytecode, "test message beta");
        assert_ne!(a, b);
        for code in [&a, &b] {
            let number: u32 = code[1..].parse().unwrap();
            assert!(ErrorStage::Bytecode.contains(number), "{} out of range", code);
        }
    }

    #[test]
    fn test_reserved_codes_are_skipped() {
        reserve_code("E650");
        assert!(is_code_registered("E650"));
        let code = generate_error_code(ErrorStage::Compilation, "collision probe message");
        assert_ne!(code, "");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorStage::Semantic.kind_name(), "SemanticError");
        assert_eq!(ErrorStage::Runtime.kind_name(), "RuntimeError");
    }
}
