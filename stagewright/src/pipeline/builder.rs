//! Pipeline builder with validation.

use std::collections::HashSet;

use super::stage::StageDescriptor;
use crate::errors::PipelineValidationError;

/// A validated, ordered list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageDescriptor>,
    artifact_stage: Option<String>,
}

impl Pipeline {
    /// Returns the pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in run order.
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Returns a stage by key.
    pub fn stage(&self, key: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// Returns the key of the stage whose result is the run's artifact.
    pub fn artifact_stage(&self) -> Option<&str> {
        self.artifact_stage.as_deref()
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDescriptor>,
    artifact_stage: Option<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            artifact_stage: None,
        }
    }

    /// Appends a stage. Stages run in the order they are added.
    #[must_use]
    pub fn stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    /// Names the stage whose result is the run's artifact.
    #[must_use]
    pub fn artifact_stage(mut self, key: impl Into<String>) -> Self {
        self.artifact_stage = Some(key.into());
        self
    }

    /// Validates and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty, a key is empty or repeated,
    /// or the artifact stage is unknown.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.key.trim().is_empty() {
                return Err(PipelineValidationError::new("Stage key cannot be empty")
                    .with_stages(vec![stage.label.clone()]));
            }
            if !seen.insert(stage.key.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' is declared more than once",
                    stage.key
                ))
                .with_stages(vec![stage.key.clone()]));
            }
        }

        if let Some(artifact) = &self.artifact_stage {
            if !seen.contains(artifact.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Artifact stage '{artifact}' is not declared"
                ))
                .with_stages(vec![artifact.clone()]));
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            artifact_stage: self.artifact_stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FnStageWork, RunContext};
    use serde_json::{json, Value};

    fn noop(key: &str) -> StageDescriptor {
        StageDescriptor::optional(
            key,
            key.to_uppercase(),
            FnStageWork::new(|_: RunContext| async { Ok::<Value, anyhow::Error>(json!(null)) }),
        )
    }

    #[test]
    fn test_builder_build_success() {
        let pipeline = PipelineBuilder::new("report")
            .stage(noop("collect"))
            .stage(noop("analyze"))
            .artifact_stage("analyze")
            .build()
            .unwrap();

        assert_eq!(pipeline.name(), "report");
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.stages()[0].key, "collect");
        assert_eq!(pipeline.artifact_stage(), Some("analyze"));
        assert!(pipeline.stage("analyze").is_some());
    }

    #[test]
    fn test_builder_empty_build() {
        let err = PipelineBuilder::new("empty").build().unwrap_err();
        assert!(err.message.contains("no stages"));
    }

    #[test]
    fn test_builder_duplicate_key() {
        let err = PipelineBuilder::new("p")
            .stage(noop("a"))
            .stage(noop("a"))
            .build()
            .unwrap_err();
        assert_eq!(err.stages, vec!["a".to_string()]);
    }

    #[test]
    fn test_builder_empty_key() {
        assert!(PipelineBuilder::new("p").stage(noop(" ")).build().is_err());
    }

    #[test]
    fn test_builder_unknown_artifact_stage() {
        let err = PipelineBuilder::new("p")
            .stage(noop("a"))
            .artifact_stage("b")
            .build()
            .unwrap_err();
        assert!(err.message.contains("'b'"));
    }
}
