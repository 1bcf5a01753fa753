//! Static pre-execution checks on submitted source and commands.
//!
//! Both guards are advisory text matching, not a sandboxing control: they
//! fail closed before anything runs, but the process boundary underneath
//! remains the actual isolation mechanism.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::EngineError;

lazy_static! {
    static ref PYTHON_IMPORT: Regex =
        Regex::new(r"(?m)^\s*(?:import|from)\s+([\w.]+)").unwrap();
    static ref GO_IMPORT_SINGLE: Regex =
        Regex::new(r#"import\s+(?:\w+\s+)?"([^"]+)""#).unwrap();
    static ref GO_IMPORT_BLOCK: Regex = Regex::new(r"(?s)import\s*\(([^)]*)\)").unwrap();
    static ref QUOTED: Regex = Regex::new(r#""([^"]+)""#).unwrap();
    static ref JS_REQUIRE: Regex =
        Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    static ref JS_IMPORT: Regex =
        Regex::new(r#"(?m)^\s*import\b[^;\n]*?['"]([^'"]+)['"]"#).unwrap();
}

/// Extract the modules a source file pulls in, per language. Languages the
/// scanner does not know yield no imports and therefore no restrictions.
pub fn scan_imports(language: &str, source: &str) -> Vec<String> {
    match language {
        "python" | "python3" => PYTHON_IMPORT
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .collect(),
        "go" | "golang" => {
            let mut imports: Vec<String> = GO_IMPORT_SINGLE
                .captures_iter(source)
                .map(|c| c[1].to_string())
                .collect();
            for block in GO_IMPORT_BLOCK.captures_iter(source) {
                imports.extend(QUOTED.captures_iter(&block[1]).map(|c| c[1].to_string()));
            }
            imports
        }
        "javascript" | "js" | "node" => {
            let mut imports: Vec<String> = JS_REQUIRE
                .captures_iter(source)
                .map(|c| c[1].to_string())
                .collect();
            imports.extend(JS_IMPORT.captures_iter(source).map(|c| c[1].to_string()));
            imports
        }
        _ => Vec::new(),
    }
}

/// Allow-list check over the imports of a submission. An empty allow-list
/// means the exercise places no restriction.
pub struct ImportGuard {
    allowed: Vec<String>,
}

impl ImportGuard {
    pub fn new(allowed: &[String]) -> Self {
        Self {
            allowed: allowed.to_vec(),
        }
    }

    pub fn check(&self, language: &str, source: &str) -> Result<(), EngineError> {
        if self.allowed.is_empty() {
            return Ok(());
        }
        let found: Vec<String> = scan_imports(language, source)
            .into_iter()
            .filter(|import| !self.is_allowed(language, import))
            .collect();
        if found.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ForbiddenImport { found })
        }
    }

    fn is_allowed(&self, language: &str, import: &str) -> bool {
        match language {
            // Python restrictions apply to the root module (`os.path` -> `os`).
            "python" | "python3" => {
                let root = import.split('.').next().unwrap_or(import);
                self.allowed.iter().any(|a| a == root)
            }
            // Go and JS packages match by prefix so sub-packages of an
            // allowed module stay usable.
            _ => self.allowed.iter().any(|a| import.starts_with(a.as_str())),
        }
    }
}

/// Binaries a terminal/sandbox command may start with.
const ALLOWED_COMMANDS: &[&str] = &[
    "docker", "kubectl", "ls", "cat", "echo", "pwd", "cd", "mkdir", "touch", "rm", "cp",
    "mv", "grep", "find", "ps", "top", "df", "free", "uname", "sleep",
];

lazy_static! {
    static ref DANGEROUS_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"rm\s+-rf\s+/").unwrap(),
        Regex::new(r"\bsudo\b").unwrap(),
        Regex::new(r"\bpasswd\b").unwrap(),
        Regex::new(r"\bshutdown\b").unwrap(),
        Regex::new(r"\breboot\b").unwrap(),
        Regex::new(r"kill\s+-9").unwrap(),
        Regex::new(r">\s*/etc").unwrap(),
        Regex::new(r"curl.*\|.*sh").unwrap(),
        Regex::new(r"wget.*\|.*sh").unwrap(),
        Regex::new(r"kubectl\s+delete\s+namespace\b").unwrap(),
        Regex::new(r"delete\s+.*--all\b").unwrap(),
    ];
}

/// Reject commands that start outside the allow-list or match a blocked
/// pattern. Runs before any execution is attempted.
pub fn check_command(command: &str) -> Result<(), EngineError> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidSubmission(
            "please enter a command".to_string(),
        ));
    }
    let Some(first) = trimmed.split_whitespace().next() else {
        return Err(EngineError::InvalidSubmission(
            "please enter a command".to_string(),
        ));
    };
    if !ALLOWED_COMMANDS.contains(&first) {
        return Err(EngineError::ForbiddenCommand(format!(
            "'{first}' is not available in this lab"
        )));
    }
    for pattern in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(trimmed) {
            return Err(EngineError::ForbiddenCommand(
                "command matches a blocked pattern".to_string(),
            ));
        }
    }
    Ok(())
}
