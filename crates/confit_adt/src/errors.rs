//! Failure values.
//!
//! A `Bottom` is not an exception: it is a first-class value that participates
//! in unification. Its `ErrorCode` classifies how recoverable the failure is
//! and drives both merge behavior (fatal bottoms poison, incomplete bottoms
//! are retried) and validator policy.

use crate::span::Span;
use serde::{Deserialize, Serialize};

/// Classification of a failure value, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Structural conflict: incompatible scalars, an out-of-bound value, a
    /// disallowed field, a list arity mismatch. Unrecoverable for the
    /// affected vertex.
    Eval,
    /// A reference chain that re-entered a vertex under evaluation and never
    /// resolved through another path. Retryable during evaluation; fatal only
    /// under the disallow-cycles policy.
    Cycle,
    /// A value that is not yet concrete: an unresolved reference, an
    /// unresolved disjunction, a missing required field. May be resolved by
    /// further evaluation.
    Incomplete,
}

impl ErrorCode {
    /// Higher wins when two failures compete for the same slot.
    pub fn severity(self) -> u8 {
        match self {
            ErrorCode::Eval => 2,
            ErrorCode::Cycle => 1,
            ErrorCode::Incomplete => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Eval => "eval",
            ErrorCode::Cycle => "cycle",
            ErrorCode::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One positioned message inside a `Bottom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrReport {
    pub message: String,
    /// Dotted field path of the vertex the message applies to, when known.
    pub path: Option<String>,
    pub span: Option<Span>,
}

impl ErrReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            span: None,
        }
    }
}

impl std::fmt::Display for ErrReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            if !path.is_empty() {
                write!(f, "{path}: ")?;
            }
        }
        write!(f, "{}", self.message)?;
        if let Some(span) = &self.span {
            write!(f, " ({span})")?;
        }
        Ok(())
    }
}

/// The failure value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottom {
    pub code: ErrorCode,
    pub reports: Vec<ErrReport>,
}

impl Bottom {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            reports: vec![ErrReport::new(message)],
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Eval, message)
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cycle, message)
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Incomplete, message)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        if let Some(report) = self.reports.last_mut() {
            report.span = Some(span);
        }
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        for report in &mut self.reports {
            if report.path.is_none() {
                report.path = Some(path.clone());
            }
        }
        self
    }

    /// Retryable failures: a later evaluation pass may supersede them.
    pub fn is_incomplete(&self) -> bool {
        matches!(self.code, ErrorCode::Cycle | ErrorCode::Incomplete)
    }

    /// Downgrades a cycle to plain incompleteness, keeping its reports.
    pub fn demote_cycle(mut self) -> Self {
        if self.code == ErrorCode::Cycle {
            self.code = ErrorCode::Incomplete;
        }
        self
    }

    /// Combines two failures: the most severe code wins and reports are
    /// concatenated in encounter order.
    pub fn combine(mut self, other: Bottom) -> Bottom {
        if other.code.severity() > self.code.severity() {
            self.code = other.code;
        }
        for report in other.reports {
            if !self.reports.contains(&report) {
                self.reports.push(report);
            }
        }
        self
    }

    /// Combines an optional accumulator with a new failure.
    pub fn combine_opt(acc: Option<Bottom>, other: Bottom) -> Bottom {
        match acc {
            Some(acc) => acc.combine(other),
            None => other,
        }
    }
}

impl std::fmt::Display for Bottom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for report in &self.reports {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{report}")?;
            first = false;
        }
        Ok(())
    }
}
