use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Type,
    Color,
    Desugar,
    Extract,
    Dispatch,
    Emit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<String>,
}

impl Diagnostic {
    pub fn error(stage: Stage, code: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            stage,
            code: code.to_string(),
            message: message.into(),
            module: None,
            ptr: None,
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_ptr(mut self, ptr: impl Into<String>) -> Self {
        self.ptr = Some(ptr.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(module) = &self.module {
            write!(f, " (module {module}")?;
            if let Some(ptr) = &self.ptr {
                write!(f, ", at {ptr}")?;
            }
            write!(f, ")")?;
        } else if let Some(ptr) = &self.ptr {
            write!(f, " (at {ptr})")?;
        }
        Ok(())
    }
}

/// Joins diagnostics into the single-line shape the CLI prints.
pub fn render(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
