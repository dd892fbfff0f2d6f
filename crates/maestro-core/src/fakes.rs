//! Scripted fakes for the tool execution seam (testing only)
//!
//! [`ScriptedToolRunner`] answers tool invocations from a script keyed by
//! command-line prefix and journals every call, so git and `gh` flows can be
//! exercised without touching a real repository or network.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::exec::{ToolError, ToolOutput, ToolRunner};

#[derive(Debug)]
struct Rule {
    prefix: String,
    responses: VecDeque<ToolOutput>,
}

/// Tool runner that replays scripted outputs.
///
/// A call `program arg1 arg2` is matched against the longest registered
/// prefix (whole words). A rule with several queued responses hands them out
/// in order and then keeps repeating the last one. Calls with no matching
/// rule succeed with empty output. Programs marked absent fail with
/// [`ToolError::NotFound`].
#[derive(Debug, Default)]
pub struct ScriptedToolRunner {
    absent: HashSet<String>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a program as not installed.
    pub fn absent(mut self, program: &str) -> Self {
        self.absent.insert(program.to_string());
        self
    }

    /// Always answer calls starting with `prefix` with `output`.
    pub fn respond(self, prefix: &str, output: ToolOutput) -> Self {
        self.respond_sequence(prefix, vec![output])
    }

    /// Answer successive calls starting with `prefix` with `outputs` in order.
    pub fn respond_sequence(self, prefix: &str, outputs: Vec<ToolOutput>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            responses: outputs.into(),
        });
        self
    }

    /// Every call made so far, as `program arg1 arg2 ...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any call started with `prefix`.
    pub fn called(&self, prefix: &str) -> bool {
        self.calls()
            .iter()
            .any(|call| matches_prefix(call, prefix))
    }

    /// Number of calls starting with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches_prefix(call, prefix))
            .count()
    }
}

fn matches_prefix(call: &str, prefix: &str) -> bool {
    call == prefix || call.starts_with(&format!("{prefix} "))
}

#[async_trait]
impl ToolRunner for ScriptedToolRunner {
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        _timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let mut parts = vec![program];
        parts.extend_from_slice(args);
        let call = parts.join(" ");
        self.calls.lock().unwrap().push(call.clone());

        if self.absent.contains(program) {
            return Err(ToolError::NotFound(program.to_string()));
        }

        let mut rules = self.rules.lock().unwrap();
        let best = rules
            .iter_mut()
            .filter(|rule| matches_prefix(&call, &rule.prefix))
            .max_by_key(|rule| rule.prefix.len());

        let output = match best {
            Some(rule) if rule.responses.len() > 1 => rule.responses.pop_front().unwrap(),
            Some(rule) => rule.responses.front().cloned().unwrap_or_default(),
            None => ToolOutput::default(),
        };
        Ok(output)
    }

    fn is_available(&self, program: &str) -> bool {
        !self.absent.contains(program)
    }
}
