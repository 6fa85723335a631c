//! Template error types

use thiserror::Error;

/// Template rendering errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    /// Referenced variable doesn't exist
    #[error("undefined variable '{name}' at line {line}{}", did_you_mean(.suggestion))]
    UndefinedVariable {
        name: String,
        line: usize,
        suggestion: Option<String>,
    },

    /// Template syntax error
    #[error("syntax error at line {line}: {message}")]
    Syntax { message: String, line: usize },

    /// Any other rendering failure
    #[error("render failed: {message}")]
    Render { message: String },
}

impl TemplateError {
    /// Undefined variable, suggesting the closest known root
    pub fn undefined_variable(name: impl Into<String>, line: usize, known: &[&str]) -> Self {
        let name = name.into();
        let root = name.split('.').next().unwrap_or_default();
        let suggestion = if known.contains(&root) {
            None
        } else {
            suggest_correction(root, known)
        };
        Self::UndefinedVariable {
            name,
            line,
            suggestion,
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            line,
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }
}

/// Closest candidate within an edit distance of half the input length
pub fn suggest_correction(typo: &str, candidates: &[&str]) -> Option<String> {
    let max_distance = (typo.len() / 2).max(2);
    candidates
        .iter()
        .map(|c| (edit_distance(typo, c), *c))
        .filter(|(d, _)| *d <= max_distance)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_string())
}

/// Levenshtein distance over chars, single-row variant
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != *cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }

    row[b.len()]
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(", did you mean '{}'?", s))
        .unwrap_or_default()
}
