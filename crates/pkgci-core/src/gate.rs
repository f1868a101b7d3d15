//! Overall pass/fail verdict for a matrix run.

use serde::{Deserialize, Serialize};

use crate::outcome::CellOutcome;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Matrix gate rules.
pub struct MatrixGate;

impl MatrixGate {
    /// Evaluate whether every cell passed.
    ///
    /// Gate rule:
    /// - At least one cell must have run
    /// - Every cell must have passed its tests with no cell error
    /// - Every configured coverage upload must have succeeded
    pub fn evaluate(cells: &[CellOutcome]) -> GateVerdict {
        let mut violations = Vec::new();

        if cells.is_empty() {
            violations.push("No matrix cells were executed".to_string());
        }

        for outcome in cells {
            for reason in outcome.failure_reasons() {
                violations.push(format!("Cell '{}': {}", outcome.cell.slug(), reason));
            }
        }

        let passed = violations.is_empty();
        let failed_cells = cells.iter().filter(|c| !c.passed()).count();
        let message = if passed {
            format!("All {} cells passed", cells.len())
        } else {
            format!(
                "Gate failed: {} of {} cells failed ({} violation(s))",
                failed_cells,
                cells.len(),
                violations.len()
            )
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
