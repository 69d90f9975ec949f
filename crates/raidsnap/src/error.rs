//! Taxonomia de erros da orquestração e códigos de saída correspondentes

use crate::model::PipelineStage;
use std::path::PathBuf;
use thiserror::Error;

/// Erros que encerram (ou podem encerrar) uma execução de backup
#[derive(Debug, Error)]
pub enum BackupError {
    /// Pré-condição falhou antes de qualquer escrita
    #[error("pré-condição não satisfeita: {0}")]
    Precondition(String),

    /// Operador recusou continuar após um aviso
    #[error("execução abortada pelo operador: {0}")]
    UserAbort(String),

    /// Falha de montagem recuperável (tratada dentro do monitor)
    #[error("destino {sink} indisponível: {reason}")]
    TransientMount { sink: PathBuf, reason: String },

    /// Todas as tentativas de recuperar a montagem falharam
    #[error("destino {sink} não ficou saudável após {attempts} tentativa(s): {last_error}")]
    MountExhausted {
        sink: PathBuf,
        attempts: u32,
        last_error: String,
    },

    /// Artefato reprovado na verificação e a regeneração não resolveu
    #[error("artefato {path} inválido: {reason}")]
    Integrity { path: PathBuf, reason: String },

    /// Falha ao executar um estágio; artefatos parciais são mantidos
    #[error("estágio {stage} falhou: {cause:#}")]
    Pipeline {
        stage: PipelineStage,
        cause: anyhow::Error,
    },

    /// Outra execução já detém o destino
    #[error("destino {path} já está em uso por outra execução")]
    SinkBusy { path: PathBuf },

    /// Sinal de cancelamento recebido numa fronteira de estágio
    #[error("execução cancelada antes do estágio {stage}")]
    Cancelled { stage: PipelineStage },
}

impl BackupError {
    pub fn pipeline(stage: PipelineStage, cause: anyhow::Error) -> Self {
        BackupError::Pipeline { stage, cause }
    }

    /// Código de saída do processo para este erro
    pub fn exit_code(&self) -> u8 {
        match self {
            BackupError::Precondition(_) => 1,
            BackupError::Integrity { .. } => 2,
            BackupError::Pipeline { .. } | BackupError::Cancelled { .. } => 3,
            BackupError::MountExhausted { .. } | BackupError::TransientMount { .. } => 4,
            BackupError::UserAbort(_) => 5,
            BackupError::SinkBusy { .. } => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_condition() {
        let cases = [
            (BackupError::Precondition("x".into()), 1),
            (
                BackupError::Integrity {
                    path: PathBuf::from("/a"),
                    reason: "x".into(),
                },
                2,
            ),
            (
                BackupError::pipeline(PipelineStage::Capture, anyhow::anyhow!("dd")),
                3,
            ),
            (
                BackupError::MountExhausted {
                    sink: PathBuf::from("/mnt"),
                    attempts: 3,
                    last_error: "x".into(),
                },
                4,
            ),
            (BackupError::UserAbort("x".into()), 5),
            (BackupError::SinkBusy { path: PathBuf::from("/mnt") }, 6),
        ];

        for (error, code) in cases {
            assert_eq!(error.exit_code(), code, "{error}");
        }
    }

    #[test]
    fn test_pipeline_error_names_stage() {
        let error = BackupError::pipeline(PipelineStage::Compress, anyhow::anyhow!("disco cheio"));
        let text = error.to_string();
        assert!(text.contains("compress"));
        assert!(text.contains("disco cheio"));
    }
}
