//! Esquema de nomes dos artefatos dentro do diretório de backup

use crate::model::{ArtifactKind, BackupArtifact, BackupMode, PipelineStage, SourceDevice};
use std::path::{Path, PathBuf};

const DESCRIPTOR_FILE: &str = "raid-metadata.json";
const LOCK_FILE: &str = ".raidsnap.lock";
const STAGING_SUFFIX: &str = ".partial";

/// Caminhos esperados de cada artefato de uma execução
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    dir: PathBuf,
    base_name: String,
}

impl BackupLayout {
    /// Cria o layout `<sink>/<backup_dir>` com o nome base informado
    pub fn new(sink: &Path, backup_dir: &str, base_name: &str) -> Self {
        Self {
            dir: sink.join(backup_dir),
            base_name: sanitize_name(base_name),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.dir.join(DESCRIPTOR_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn raw_image_path(&self) -> PathBuf {
        self.dir.join(format!("{}.img", self.base_name))
    }

    pub fn partition_image_path(&self, source: &SourceDevice) -> PathBuf {
        self.dir
            .join(format!("{}-{}.pcl", self.base_name, sanitize_name(&source.name)))
    }

    pub fn compressed_path(&self, mode: BackupMode) -> PathBuf {
        match mode {
            BackupMode::Disk => self.dir.join(format!("{}.img.gz", self.base_name)),
            BackupMode::Filesystems => self.dir.join(format!("{}.tar.gz", self.base_name)),
        }
    }

    pub fn packaged_path(&self) -> PathBuf {
        self.dir.join(format!("{}.iso", self.base_name))
    }

    /// Artefatos (ainda não verificados) que um estágio deve deixar no destino
    pub fn expected_artifacts(
        &self,
        stage: PipelineStage,
        mode: BackupMode,
        sources: &[SourceDevice],
    ) -> Vec<BackupArtifact> {
        match stage {
            PipelineStage::Capture => match mode {
                BackupMode::Disk => sources
                    .first()
                    .map(|source| {
                        vec![BackupArtifact::unverified(
                            ArtifactKind::RawImage,
                            self.raw_image_path(),
                            Some(source.size_bytes),
                        )]
                    })
                    .unwrap_or_default(),
                BackupMode::Filesystems => sources
                    .iter()
                    .map(|source| {
                        BackupArtifact::unverified(
                            ArtifactKind::PartitionImage,
                            self.partition_image_path(source),
                            None,
                        )
                    })
                    .collect(),
            },
            PipelineStage::Compress => vec![BackupArtifact::unverified(
                ArtifactKind::CompressedImage,
                self.compressed_path(mode),
                None,
            )],
            PipelineStage::Package => vec![BackupArtifact::unverified(
                ArtifactKind::PackagedImage,
                self.packaged_path(),
                None,
            )],
            _ => Vec::new(),
        }
    }
}

/// Caminho onde um artefato é gravado antes de receber o nome final.
///
/// Só um produtor que terminou bem renomeia o arquivo; um `.partial` nunca
/// é examinado pelo planejador.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

/// Mantém apenas caracteres seguros para nomes de arquivo
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "backup".to_string()
    } else {
        trimmed.to_string()
    }
}
