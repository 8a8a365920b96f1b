//! `--test-model`: check that a model can drive the agent's tools.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{error, info, warn};

use crate::core::messages::model_recommendations;
use crate::io::agent::AgentRequest;
use crate::io::artifacts::{read_or_empty, remove_file};
use crate::session::{RunState, Session};

pub const MODEL_TEST_MARKER: &str = "MODEL TEST OK";

static PSEUDO_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)print|IO\.puts|System\.cmd|File\.write|defmodule")
        .expect("pseudo-code pattern is valid")
});

/// Ask `model` to write the marker file. `true` when it did.
pub fn test_model(session: &Session<'_>, state: &mut RunState, model: &str) -> Result<bool> {
    let paths = session.paths;
    let program = &session.settings.agent_program;
    info!("===== Testing model compatibility: {model} =====");
    info!("Running simple write test to verify model can use {program}'s tools...");

    remove_file(&paths.model_test_result)?;
    let prompt = session
        .prompts
        .model_test(&paths.relative(&paths.model_test_result))?;
    state.agent_calls += 1;
    let reply = session
        .agent
        .invoke(&AgentRequest::new(prompt).model(Some(model)));
    let passed = match reply {
        Ok(reply) if reply.success() => report(paths.model_test_result.as_path(), model)?,
        Ok(reply) => {
            error!("{program} test invocation failed with code {:?}", reply.exit_code);
            error!("Model {model} failed basic invocation test.");
            false
        }
        Err(err) => {
            remove_file(&paths.model_test_result)?;
            return Err(err);
        }
    };
    remove_file(&paths.model_test_result)?;
    Ok(passed)
}

fn report(result_path: &std::path::Path, model: &str) -> Result<bool> {
    let output = read_or_empty(result_path)?;
    if output.contains(MODEL_TEST_MARKER) {
        info!("Model {model} PASSED tool test.");
        info!("Test output: {}", output.trim());
        info!("Model is compatible for code editing. Ready to proceed.");
        info!("To run with this model: fix-die-repeat --model {model}");
        info!("Or set via env var: export FDR_MODEL={model}");
        return Ok(true);
    }

    let shown = if output.is_empty() { "(empty)" } else { output.as_str() };
    info!("Model {model} FAILED tool test.");
    info!("Test output: {shown}");
    if PSEUDO_CODE.is_match(&output) {
        warn!("WARNING: Model generated pseudo-code instead of using the agent's tools.");
        warn!("This model appears incompatible with the agent's tool-calling interface.");
    }
    info!("Model {model} is NOT suitable for code editing tasks.");
    info!("{}", model_recommendations());
    info!("To override: fix-die-repeat --model <model>");
    Ok(false)
}
