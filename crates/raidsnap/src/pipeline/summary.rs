//! Resultado de uma execução e resumo impresso ao final

use super::planner::StageAction;
use crate::model::{BackupArtifact, PipelineStage};
use crate::preflight::format_bytes;
use std::path::PathBuf;
use std::time::Duration;

/// Ação e duração de um estágio
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub action: StageAction,
    pub duration: Duration,
}

/// Relatório de uma execução concluída
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stages: Vec<StageReport>,

    /// Imagem final verificada
    pub packaged: Option<BackupArtifact>,

    /// Bytes gravados pela compressão, quando ela rodou
    pub compressed_bytes: Option<u64>,

    /// Intermediários removidos pela limpeza
    pub removed: Vec<PathBuf>,
}

impl RunReport {
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Nenhum estágio produtor rodou
    pub fn was_noop(&self) -> bool {
        !self
            .stages
            .iter()
            .any(|s| s.stage.produces_artifact() && s.action == StageAction::Run)
    }

    /// Imprime o resumo da execução
    pub fn print_summary(&self) {
        println!("\n📦 Resumo do Backup:");
        println!("─────────────────────────────────────");

        for stage in &self.stages {
            let marker = match stage.action {
                StageAction::Run => "✅",
                StageAction::Skip => "⏭ ",
            };
            println!(
                "{} {:<9} {:<8} {}",
                marker,
                stage.stage.to_string(),
                stage.action.to_string(),
                format_duration(stage.duration)
            );
        }

        println!("─────────────────────────────────────");

        if let Some(packaged) = &self.packaged {
            println!("Imagem:   {}", packaged.path.display());
            if let Some(size) = packaged.size_on_disk() {
                println!("Tamanho:  {}", format_bytes(size));
            }
        }
        if let Some(bytes) = self.compressed_bytes {
            println!("Gzip:     {}", format_bytes(bytes));
        }
        if !self.removed.is_empty() {
            println!("Limpeza:  {} intermediário(s) removido(s)", self.removed.len());
        }
        println!("Duração:  {}", format_duration(self.total_duration()));

        if self.was_noop() {
            println!("\nℹ️  Backup já estava completo; nada foi regravado");
        }
        println!("─────────────────────────────────────");
    }
}

/// `1h02m03s`, `4m05s`, `12.3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h02m03s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m05s");
        assert_eq!(format_duration(Duration::from_millis(12_300)), "12.3s");
    }

    #[test]
    fn test_noop_detection() {
        let report = RunReport {
            stages: vec![
                StageReport {
                    stage: PipelineStage::Capture,
                    action: StageAction::Skip,
                    duration: Duration::from_secs(1),
                },
                StageReport {
                    stage: PipelineStage::Verify,
                    action: StageAction::Run,
                    duration: Duration::from_secs(2),
                },
            ],
            ..RunReport::default()
        };
        assert!(report.was_noop());
        assert_eq!(report.total_duration(), Duration::from_secs(3));
    }
}
