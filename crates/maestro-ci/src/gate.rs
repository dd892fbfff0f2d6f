//! QA gate: turns raw check results into a promotion status and remediation hints.

use serde::{Deserialize, Serialize};

use maestro_core::{emit_gate_evaluated, QaStatus};

/// Raw results of the three external quality checks.
///
/// Return codes are kept as the text the checks reported; only `"0"`
/// (surrounding whitespace ignored) counts as success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaChecks {
    pub lint_rc: String,
    pub lint_out: String,
    pub types_rc: String,
    pub types_out: String,
    pub tests_rc: String,
    pub tests_out: String,
}

impl QaChecks {
    /// Checks with the given return codes and empty outputs.
    pub fn with_codes(lint_rc: &str, types_rc: &str, tests_rc: &str) -> Self {
        Self {
            lint_rc: lint_rc.to_string(),
            types_rc: types_rc.to_string(),
            tests_rc: tests_rc.to_string(),
            ..Self::default()
        }
    }
}

fn succeeded(rc: &str) -> bool {
    rc.trim() == "0"
}

/// `pass` when every check returned zero, `soft-fail` when only the tests
/// failed, `fail` otherwise.
pub fn determine_status(lint_rc: &str, types_rc: &str, tests_rc: &str) -> QaStatus {
    match (succeeded(lint_rc), succeeded(types_rc), succeeded(tests_rc)) {
        (true, true, true) => QaStatus::Pass,
        (true, true, false) => QaStatus::SoftFail,
        _ => QaStatus::Fail,
    }
}

/// One hint per failed check, each followed by the hints its output triggers.
struct HintRule {
    headline: &'static str,
    patterns: &'static [(&'static str, &'static str)],
}

const LINT_HINTS: HintRule = HintRule {
    headline: "Corrigir erros de linting",
    patterns: &[
        ("unused import", "Remover imports não utilizados"),
        ("line too long", "Quebrar linhas muito longas"),
    ],
};

const TYPE_HINTS: HintRule = HintRule {
    headline: "Corrigir erros de type checking",
    patterns: &[
        ("missing type annotation", "Adicionar anotações de tipo"),
        ("incompatible types", "Corrigir incompatibilidades de tipo"),
    ],
};

const TEST_HINTS: HintRule = HintRule {
    headline: "Corrigir testes falhando",
    patterns: &[
        ("assertion error", "Verificar asserções dos testes"),
        ("import error", "Verificar imports dos testes"),
    ],
};

impl HintRule {
    fn apply(&self, rc: &str, output: &str, actions: &mut Vec<String>) {
        if succeeded(rc) {
            return;
        }
        actions.push(self.headline.to_string());
        let output = output.to_lowercase();
        for (needle, hint) in self.patterns {
            if output.contains(needle) {
                actions.push((*hint).to_string());
            }
        }
    }
}

/// Ordered remediation hints: lint first, then types, then tests.
///
/// Output matching is case-insensitive. Hints for a check are only produced
/// when that check failed.
pub fn generate_next_actions(checks: &QaChecks) -> Vec<String> {
    let mut actions = Vec::new();
    LINT_HINTS.apply(&checks.lint_rc, &checks.lint_out, &mut actions);
    TYPE_HINTS.apply(&checks.types_rc, &checks.types_out, &mut actions);
    TEST_HINTS.apply(&checks.tests_rc, &checks.tests_out, &mut actions);
    actions
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub status: QaStatus,

    /// Whether promotion may proceed.
    pub passed: bool,

    pub next_actions: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// QA gate evaluation rules.
pub struct QaGate;

impl QaGate {
    /// Evaluate the checks for `task`. Total: never fails.
    pub fn evaluate(task: &str, checks: &QaChecks) -> GateVerdict {
        let status = determine_status(&checks.lint_rc, &checks.types_rc, &checks.tests_rc);
        let next_actions = generate_next_actions(checks);
        emit_gate_evaluated(task, status, next_actions.len());

        let message = if status.is_pass() {
            format!("QA passed for task {task}")
        } else {
            format!(
                "QA {status} for task {task}: {} action(s) required",
                next_actions.len()
            )
        };

        GateVerdict {
            status,
            passed: status.is_pass(),
            next_actions,
            message,
        }
    }
}
