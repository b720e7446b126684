//! Prompt texts rendered from `minijinja` templates.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::TaskType;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const COMPLETED_TEMPLATE: &str = include_str!("prompts/completed.md");
const ESCALATION_TEMPLATE: &str = include_str!("prompts/escalation.md");

/// Inputs for the feedback sent after a task finishes.
#[derive(Debug, Clone, Copy)]
pub struct CompletionFeedback<'a> {
    pub description: &'a str,
    pub output: &'a str,
    pub error: &'a str,
}

/// Inputs for the feedback sent after a task exhausts its retries.
#[derive(Debug, Clone, Copy)]
pub struct EscalationFeedback<'a> {
    pub description: &'a str,
    pub error: &'a str,
    pub retries: u32,
    pub code_context: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .context("load system template")?;
        env.add_template("plan", PLAN_TEMPLATE)
            .context("load plan template")?;
        env.add_template("completed", COMPLETED_TEMPLATE)
            .context("load completed template")?;
        env.add_template("escalation", ESCALATION_TEMPLATE)
            .context("load escalation template")?;
        Ok(Self { env })
    }

    pub fn system_instruction(&self) -> Result<String> {
        let kinds: Vec<&str> = TaskType::ALL.iter().map(|k| k.as_str()).collect();
        self.render("system", context! { task_types => kinds })
    }

    pub fn initial_plan(&self, goal: &str) -> Result<String> {
        self.render("plan", context! { goal => goal.trim() })
    }

    pub fn completion(&self, feedback: CompletionFeedback<'_>) -> Result<String> {
        self.render(
            "completed",
            context! {
                description => feedback.description,
                output => feedback.output.trim_end(),
                error => feedback.error.trim(),
            },
        )
    }

    pub fn escalation(&self, feedback: EscalationFeedback<'_>) -> Result<String> {
        self.render(
            "escalation",
            context! {
                description => feedback.description,
                error => feedback.error.trim(),
                retries => feedback.retries,
                code_context => feedback.code_context,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered.trim().to_string())
    }
}
