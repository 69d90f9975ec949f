//! Decide quais estágios rodam e quais podem ser pulados

use super::verifier::IntegrityVerifier;
use crate::model::{BackupArtifact, PipelineStage, RunContext};
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Ação planejada para um estágio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAction {
    Skip,
    Run,
}

impl fmt::Display for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageAction::Skip => write!(f, "pular"),
            StageAction::Run => write!(f, "executar"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub stage: PipelineStage,
    pub action: StageAction,
}

/// Plano ordenado com uma ação por estágio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<StagePlan>,
}

impl Plan {
    #[cfg(test)]
    pub(crate) fn from_steps(steps: Vec<StagePlan>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[StagePlan] {
        &self.steps
    }

    pub fn action_for(&self, stage: PipelineStage) -> StageAction {
        self.steps
            .iter()
            .find(|step| step.stage == stage)
            .map(|step| step.action)
            .unwrap_or(StageAction::Run)
    }

    pub fn runs(&self, stage: PipelineStage) -> bool {
        self.action_for(stage) == StageAction::Run
    }

    /// `true` se algum estágio que grava artefatos vai rodar
    pub fn produces_anything(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.stage.produces_artifact() && step.action == StageAction::Run)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            let marker = match step.action {
                StageAction::Run => "▶",
                StageAction::Skip => "⏭",
            };
            writeln!(f, "   {} {:<9} {}", marker, step.stage.to_string(), step.action)?;
        }
        Ok(())
    }
}

/// Regra "o artefato válido mais recente vence"
pub struct ResumabilityPlanner<'a> {
    verifier: &'a IntegrityVerifier,
}

impl<'a> ResumabilityPlanner<'a> {
    pub fn new(verifier: &'a IntegrityVerifier) -> Self {
        Self { verifier }
    }

    /// Examina os estágios produtores do último para o primeiro; o primeiro
    /// totalmente válido fixa a fronteira e tudo antes dele é pulado
    pub fn plan(&self, ctx: &mut RunContext) -> Plan {
        let producing: Vec<PipelineStage> = PipelineStage::ALL
            .iter()
            .copied()
            .filter(|stage| stage.produces_artifact())
            .collect();

        let mut frontier: Option<PipelineStage> = None;

        for &stage in producing.iter().rev() {
            let expected = ctx
                .layout
                .expected_artifacts(stage, ctx.mode, &ctx.sources);

            match self.verify_all(&expected) {
                Some(valid) => {
                    debug!(%stage, artifacts = valid.len(), "artefatos válidos encontrados");
                    ctx.record(stage, valid);
                    frontier = Some(stage);
                    break;
                }
                None => ctx.forget(stage),
            }
        }

        if let Some(frontier) = frontier {
            if frontier > PipelineStage::Capture {
                self.warn_staleness(ctx, frontier);
            }
        }

        let steps = PipelineStage::ALL
            .iter()
            .map(|&stage| {
                let skip = stage.produces_artifact()
                    && frontier.map(|f| stage <= f).unwrap_or(false);
                StagePlan {
                    stage,
                    action: if skip { StageAction::Skip } else { StageAction::Run },
                }
            })
            .collect();

        let plan = Plan { steps };
        info!(frontier = ?frontier, "plano de retomada calculado");
        plan
    }

    /// Todos válidos ou nada; o verificador decide se os inválidos são apagados
    fn verify_all(&self, expected: &[BackupArtifact]) -> Option<Vec<BackupArtifact>> {
        if expected.is_empty() {
            return None;
        }

        let mut valid = Vec::with_capacity(expected.len());
        let mut all_ok = true;
        for artifact in expected {
            if !artifact.path.exists() {
                all_ok = false;
                continue;
            }
            match self.verifier.verify(artifact) {
                Ok(verified) => valid.push(verified),
                Err(e) => {
                    debug!(error = %e, "artefato descartado");
                    all_ok = false;
                }
            }
        }

        all_ok.then_some(valid)
    }

    /// A captura pulada pode ser de uma geração anterior ao artefato que a substituiu
    fn warn_staleness(&self, ctx: &RunContext, frontier: PipelineStage) {
        let age = ctx
            .artifacts(frontier)
            .iter()
            .filter_map(|a| std::fs::metadata(&a.path).and_then(|m| m.modified()).ok())
            .filter_map(|modified| SystemTime::now().duration_since(modified).ok())
            .max()
            .unwrap_or(Duration::ZERO);

        warn!(
            %frontier,
            age_secs = age.as_secs(),
            "captura pulada com base em artefato já existente; confira se ele corresponde ao estado atual do disco"
        );
    }
}
