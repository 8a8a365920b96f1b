//! Prompt rendering for agent invocations.
//!
//! Templates are embedded at compile time and rendered with strict undefined
//! handling, so a missing variable is an error rather than an empty string.

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior, context};
use serde::Serialize;

use crate::core::types::ContextMode;

const TEMPLATES: &[(&str, &str)] = &[
    ("fix_checks", include_str!("prompts/fix_checks.md")),
    ("local_review", include_str!("prompts/local_review.md")),
    (
        "resolve_review_issues",
        include_str!("prompts/resolve_review_issues.md"),
    ),
    ("pr_threads_header", include_str!("prompts/pr_threads_header.md")),
    (
        "introspect_pr_review",
        include_str!("prompts/introspect_pr_review.md"),
    ),
    ("model_test", include_str!("prompts/model_test.md")),
    ("lang/python", include_str!("prompts/lang/python.md")),
    ("lang/rust", include_str!("prompts/lang/rust.md")),
    ("lang/javascript", include_str!("prompts/lang/javascript.md")),
    ("lang/elixir", include_str!("prompts/lang/elixir.md")),
    ("lang/csharp", include_str!("prompts/lang/csharp.md")),
];

/// Inputs for the check-fix prompt.
#[derive(Debug, Clone, Serialize)]
pub struct FixChecksPrompt<'a> {
    pub check_cmd: &'a str,
    pub oscillation_warning: Option<&'a str>,
    pub include_review_history: bool,
    pub include_build_history: bool,
    pub context_mode: &'a str,
    pub large_context_list: &'a str,
    pub large_file_warning: &'a str,
    pub languages: Vec<String>,
}

impl<'a> FixChecksPrompt<'a> {
    pub fn mode(mut self, mode: ContextMode) -> Self {
        self.context_mode = mode.as_str();
        self
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render prompt {name}"))?;
        Ok(rendered.trim().to_string())
    }

    pub fn fix_checks(&self, input: &FixChecksPrompt<'_>) -> Result<String> {
        self.render("fix_checks", minijinja::Value::from_serialize(input))
    }

    pub fn local_review(
        &self,
        review_prompt_prefix: &str,
        has_agents_file: bool,
        languages: &[String],
    ) -> Result<String> {
        self.render(
            "local_review",
            context! {
                review_prompt_prefix => review_prompt_prefix.trim(),
                has_agents_file => has_agents_file,
                languages => languages,
            },
        )
    }

    pub fn resolve_review_issues(&self, pr_mode: bool, has_recent_history: bool) -> Result<String> {
        self.render(
            "resolve_review_issues",
            context! { pr_mode => pr_mode, has_recent_history => has_recent_history },
        )
    }

    pub fn pr_threads_header(
        &self,
        unresolved_count: usize,
        pr_number: u64,
        pr_url: &str,
    ) -> Result<String> {
        self.render(
            "pr_threads_header",
            context! {
                unresolved_count => unresolved_count,
                pr_number => pr_number,
                pr_url => pr_url,
            },
        )
    }

    pub fn introspect_pr_review(
        &self,
        run_date: &str,
        project_name: &str,
        pr_number: u64,
        pr_url: &str,
        output_path: &str,
    ) -> Result<String> {
        self.render(
            "introspect_pr_review",
            context! {
                run_date => run_date,
                project_name => project_name,
                pr_number => pr_number,
                pr_url => pr_url,
                output_path => output_path,
            },
        )
    }

    pub fn model_test(&self, output_path: &str) -> Result<String> {
        self.render("model_test", context! { output_path => output_path })
    }
}
