// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest fixing a cyclic dependency
    pub fn fix_cyclic_dependency(members: &[String]) -> Self {
        let mut path = members.to_vec();
        if let Some(first) = members.first() {
            path.push(first.clone());
        }

        Self {
            action: "Remove cyclic dependency".into(),
            steps: vec![
                format!("Detected cycle: {}", path.join(" → ")),
                "A dataset cannot read from anything that reads from it".into(),
                "Split the shared logic into a separate upstream dataset".into(),
            ],
            commands: vec![
                "# Visualize your pipeline:".into(),
                "liveflow graph --format mermaid".into(),
            ],
        }
    }

    /// Suggest declaring a reference that could not be resolved
    pub fn declare_missing_reference(dataset: &str, reference: &str) -> Self {
        Self {
            action: format!("Declare '{}'", reference),
            steps: vec![
                format!("Dataset '{}' reads from '{}'", dataset, reference),
                "Add it under 'datasets:' if the pipeline produces it".into(),
                "Add it under 'sources:' if it is ingested from outside the pipeline".into(),
            ],
            commands: vec![],
        }
    }

    /// Suggest relaxing a fail-policy expectation
    pub fn relax_expectation(dataset: &str, constraint: &str) -> Self {
        Self {
            action: format!("Handle rows violating '{}'", constraint),
            steps: vec![
                format!("Dataset '{}' was not committed; its offsets were kept", dataset),
                "Fix the offending upstream records and re-run, or".into(),
                "change 'on_violation' to 'drop' to filter them, or 'warn' to keep them".into(),
            ],
            commands: vec![
                "# Re-run only this dataset after fixing the data:".into(),
                format!("liveflow run --dataset {}", dataset),
            ],
        }
    }

    /// Suggest creating a pipeline file
    pub fn create_pipeline() -> Self {
        Self {
            action: "Create a pipeline definition".into(),
            steps: vec![
                "No liveflow.yaml found in current directory".into(),
                "Initialize a sample project or write the file manually".into(),
            ],
            commands: vec!["liveflow init".into()],
        }
    }

    /// Suggest releasing a stale run lock
    pub fn release_run_lock() -> Self {
        Self {
            action: "Wait for the active run".into(),
            steps: vec![
                "Only one run of a pipeline may hold its state at a time".into(),
                "The lock file records the owner's process id; locks of exited processes are reclaimed".into(),
                "If no run is active and the lock is still held, remove it by hand".into(),
            ],
            commands: vec![format!(
                "rm <storage>/{}",
                crate::errors::LOCK_FILE_NAME
            )],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_suggestion_closes_loop() {
        let s = RecoverySuggestion::fix_cyclic_dependency(&["a".into(), "b".into()]);
        assert!(s.steps[0].contains("a → b → a"));
    }

    #[test]
    fn test_display_includes_commands() {
        let rendered = RecoverySuggestion::create_pipeline().to_string();
        assert!(rendered.starts_with("→ Create a pipeline definition"));
        assert!(rendered.contains("liveflow init"));
    }
}
