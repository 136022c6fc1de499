//! Workflow taxonomy: the fixed, ordered set of Open Negotiation stages.
//!
//! Loaded once per process, validated at startup and shared read-only
//! (typically behind an `Arc`) by every conversation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::stage::{StageId, WorkflowStage};
use crate::errors::DomainError;

pub const CLIENT_NAME: &str = "client_name";
pub const WAVE_NUMBER: &str = "wave_number";

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("could not read taxonomy file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse taxonomy file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("taxonomy must define at least one stage")]
    Empty,
    #[error("stage id must not be blank (stage #{position})")]
    BlankStageId { position: usize },
    #[error("duplicate stage id `{0}`")]
    DuplicateStage(StageId),
    #[error("stage `{stage_id}` lists prerequisite `{prerequisite}` that does not precede it")]
    PrerequisiteOrder { stage_id: StageId, prerequisite: StageId },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Taxonomy {
    stages: Vec<WorkflowStage>,
    positions: HashMap<StageId, usize>,
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    #[serde(default, rename = "stage")]
    stages: Vec<WorkflowStage>,
}

impl Taxonomy {
    pub fn new(stages: Vec<WorkflowStage>) -> Result<Self, TaxonomyError> {
        if stages.is_empty() {
            return Err(TaxonomyError::Empty);
        }

        let mut positions = HashMap::with_capacity(stages.len());
        for (position, stage) in stages.iter().enumerate() {
            if stage.id.0.trim().is_empty() {
                return Err(TaxonomyError::BlankStageId { position });
            }
            if positions.insert(stage.id.clone(), position).is_some() {
                return Err(TaxonomyError::DuplicateStage(stage.id.clone()));
            }
        }

        let known = stages.iter().map(|stage| &stage.id).collect::<HashSet<_>>();
        for (position, stage) in stages.iter().enumerate() {
            for prerequisite in &stage.prerequisite_stage_ids {
                if !known.contains(prerequisite) {
                    return Err(DomainError::UnknownStage { stage_id: prerequisite.clone() }.into());
                }
                if positions.get(prerequisite).is_some_and(|index| *index >= position) {
                    return Err(TaxonomyError::PrerequisiteOrder {
                        stage_id: stage.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        let stages = stages
            .into_iter()
            .map(|mut stage| {
                stage.keywords =
                    stage.keywords.iter().map(|keyword| keyword.trim().to_lowercase()).collect();
                stage
            })
            .collect();

        Ok(Self { stages, positions })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, TaxonomyError> {
        let file = toml::from_str::<TaxonomyFile>(raw)?;
        Self::new(file.stages)
    }

    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| TaxonomyError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    /// Built-in Open Negotiation workflow.
    pub fn open_negotiation() -> Self {
        let required = || vec![CLIENT_NAME.to_string(), WAVE_NUMBER.to_string()];
        let stages = vec![
            WorkflowStage {
                id: StageId::new("document_validation"),
                name: "Document Validation".to_string(),
                description: "Quality-check the negotiation documents for a client wave before anything is generated.".to_string(),
                prerequisite_stage_ids: Vec::new(),
                keywords: keywords(&["validat", "quality check", "quality-check", "qc", "verify", "review the doc", "check the doc", "check documents"]),
                required_parameters: required(),
            },
            WorkflowStage {
                id: StageId::new("document_creation"),
                name: "Document Creation".to_string(),
                description: "Generate the negotiation documents (letters, offers, presentations) for a client wave.".to_string(),
                prerequisite_stage_ids: vec![StageId::new("document_validation")],
                keywords: keywords(&["create doc", "create the doc", "document creation", "generate", "draft", "ppt", "presentation", "offer letter", "prepare the doc", "write the doc"]),
                required_parameters: required(),
            },
            WorkflowStage {
                id: StageId::new("email_dispatch"),
                name: "Email Dispatch".to_string(),
                description: "Send the generated negotiation documents to the client's contacts by email.".to_string(),
                prerequisite_stage_ids: vec![StageId::new("document_creation")],
                keywords: keywords(&["email", "e-mail", "mail out", "send", "dispatch", "outreach"]),
                required_parameters: required(),
            },
            WorkflowStage {
                id: StageId::new("file_organization"),
                name: "File Organization".to_string(),
                description: "Rename, sort and archive the wave's files once emails have gone out.".to_string(),
                prerequisite_stage_ids: vec![StageId::new("email_dispatch")],
                keywords: keywords(&["organiz", "organis", "rename", "archive", "folder", "sort the file", "file management", "clean up the file"]),
                required_parameters: required(),
            },
        ];

        let positions =
            stages.iter().enumerate().map(|(index, stage)| (stage.id.clone(), index)).collect();
        Self { stages, positions }
    }

    pub fn stages(&self) -> &[WorkflowStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_valid(&self, stage_id: &StageId) -> bool {
        self.positions.contains_key(stage_id)
    }

    pub fn stage(&self, stage_id: &StageId) -> Result<&WorkflowStage, DomainError> {
        self.positions
            .get(stage_id)
            .map(|index| &self.stages[*index])
            .ok_or_else(|| DomainError::UnknownStage { stage_id: stage_id.clone() })
    }

    pub fn describe(&self, stage_id: &StageId) -> Result<&str, DomainError> {
        self.stage(stage_id).map(|stage| stage.description.as_str())
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id.clone()).collect()
    }

    /// Deduplicates `ids` and returns them in taxonomy order. Unknown ids are an error.
    pub fn in_order(&self, ids: &[StageId]) -> Result<Vec<StageId>, DomainError> {
        let mut indexes = Vec::with_capacity(ids.len());
        for id in ids {
            let index = *self
                .positions
                .get(id)
                .ok_or_else(|| DomainError::UnknownStage { stage_id: id.clone() })?;
            indexes.push(index);
        }
        indexes.sort_unstable();
        indexes.dedup();
        Ok(indexes.into_iter().map(|index| self.stages[index].id.clone()).collect())
    }

    /// First stage that is not completed and whose prerequisites all are.
    pub fn next_open_stage<F>(&self, is_completed: F) -> Option<&WorkflowStage>
    where
        F: Fn(&StageId) -> bool,
    {
        self.stages.iter().find(|stage| {
            !is_completed(&stage.id)
                && stage.prerequisite_stage_ids.iter().all(|prerequisite| is_completed(prerequisite))
        })
    }

    /// Stages not yet completed, in taxonomy order.
    pub fn remaining<F>(&self, is_completed: F) -> Vec<StageId>
    where
        F: Fn(&StageId) -> bool,
    {
        self.stages.iter().map(|stage| &stage.id).filter(|id| !is_completed(id)).cloned().collect()
    }
}

fn keywords(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}
