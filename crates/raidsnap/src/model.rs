//! Modelo de dados da orquestração: estágios, artefatos, montagem do destino e contexto da execução

use crate::layout::BackupLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Estágios do pipeline, em ordem total estrita
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Precheck,
    Capture,
    Compress,
    Package,
    Verify,
    Cleanup,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::Precheck,
        PipelineStage::Capture,
        PipelineStage::Compress,
        PipelineStage::Package,
        PipelineStage::Verify,
        PipelineStage::Cleanup,
    ];

    /// Estágios que produzem artefatos persistidos no destino
    pub fn produces_artifact(self) -> bool {
        matches!(
            self,
            PipelineStage::Capture | PipelineStage::Compress | PipelineStage::Package
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Precheck => write!(f, "precheck"),
            PipelineStage::Capture => write!(f, "capture"),
            PipelineStage::Compress => write!(f, "compress"),
            PipelineStage::Package => write!(f, "package"),
            PipelineStage::Verify => write!(f, "verify"),
            PipelineStage::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Tipo de artefato gerado por um estágio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Cópia bit a bit de um disco inteiro (tamanho determinístico)
    RawImage,
    /// Clone de um sistema de arquivos (apenas blocos usados)
    PartitionImage,
    /// Contêiner comprimido (gzip, opcionalmente com tar)
    CompressedImage,
    /// Imagem ISO inicializável
    PackagedImage,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::RawImage => write!(f, "imagem bruta"),
            ArtifactKind::PartitionImage => write!(f, "imagem de partição"),
            ArtifactKind::CompressedImage => write!(f, "arquivo comprimido"),
            ArtifactKind::PackagedImage => write!(f, "imagem inicializável"),
        }
    }
}

/// Artefato de backup produzido por um estágio e consumido pelo seguinte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,

    /// Tamanho exato esperado em bytes (somente para tipos determinísticos)
    pub expected_size_bytes: Option<u64>,

    /// Só fica `true` depois de uma verificação de integridade nesta execução
    pub verified: bool,
}

impl BackupArtifact {
    /// Cria um artefato ainda não verificado
    pub fn unverified(kind: ArtifactKind, path: PathBuf, expected_size_bytes: Option<u64>) -> Self {
        Self {
            kind,
            path,
            expected_size_bytes,
            verified: false,
        }
    }

    /// Tamanho atual no disco, se o arquivo existir
    pub fn size_on_disk(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Saúde da montagem do destino
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountHealth {
    Unknown,
    Healthy,
    Degraded,
    Failed,
}

impl fmt::Display for MountHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountHealth::Unknown => write!(f, "desconhecida"),
            MountHealth::Healthy => write!(f, "saudável"),
            MountHealth::Degraded => write!(f, "degradada"),
            MountHealth::Failed => write!(f, "falhou"),
        }
    }
}

/// Local de saída (possivelmente remoto). Só o monitor de saúde altera `health`.
#[derive(Debug, Clone)]
pub struct MountHandle {
    pub sink_path: PathBuf,
    pub health: MountHealth,
    pub last_checked_at: Option<SystemTime>,
}

impl MountHandle {
    pub fn new(sink_path: PathBuf) -> Self {
        Self {
            sink_path,
            health: MountHealth::Unknown,
            last_checked_at: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == MountHealth::Healthy
    }
}

/// Política de novas tentativas do monitor de montagem (imutável)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_delay(&self) -> Duration {
        self.backoff_delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

/// Modo de backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    /// Disco inteiro copiado bit a bit (um membro do RAID1)
    Disk,
    /// Um clone por array md (somente blocos usados)
    Filesystems,
}

impl Default for BackupMode {
    fn default() -> Self {
        BackupMode::Disk
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMode::Disk => write!(f, "disk"),
            BackupMode::Filesystems => write!(f, "filesystems"),
        }
    }
}

/// Dispositivo de origem (disco ou array md)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDevice {
    pub path: PathBuf,

    /// Nome curto usado nos nomes dos artefatos (`sda`, `md0`)
    pub name: String,

    /// Tamanho total do dispositivo de bloco
    pub size_bytes: u64,

    /// Bytes usados pelo sistema de arquivos, quando montado
    pub used_bytes: Option<u64>,

    pub fs_type: Option<String>,
}

impl SourceDevice {
    pub fn new(path: &Path, size_bytes: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());

        Self {
            path: path.to_path_buf(),
            name,
            size_bytes,
            used_bytes: None,
            fs_type: None,
        }
    }

    /// Bytes que a captura deste dispositivo ocupará no destino
    pub fn capture_bytes(&self, mode: BackupMode) -> u64 {
        match mode {
            BackupMode::Disk => self.size_bytes,
            BackupMode::Filesystems => self.used_bytes.unwrap_or(self.size_bytes),
        }
    }
}

/// Contexto de uma execução. O mapa de artefatos só recebe entradas verificadas.
#[derive(Debug)]
pub struct RunContext {
    pub mode: BackupMode,
    pub sources: Vec<SourceDevice>,
    pub layout: BackupLayout,
    pub sink: MountHandle,
    artifacts: BTreeMap<PipelineStage, Vec<BackupArtifact>>,
}

impl RunContext {
    pub fn new(
        mode: BackupMode,
        sources: Vec<SourceDevice>,
        layout: BackupLayout,
        sink: MountHandle,
    ) -> Self {
        Self {
            mode,
            sources,
            layout,
            sink,
            artifacts: BTreeMap::new(),
        }
    }

    /// Registra os artefatos válidos de um estágio
    pub fn record(&mut self, stage: PipelineStage, artifacts: Vec<BackupArtifact>) {
        debug_assert!(artifacts.iter().all(|a| a.verified));
        let verified: Vec<BackupArtifact> = artifacts.into_iter().filter(|a| a.verified).collect();
        if verified.is_empty() {
            self.artifacts.remove(&stage);
        } else {
            self.artifacts.insert(stage, verified);
        }
    }

    /// Remove os artefatos de um estágio (apagados do disco ou invalidados)
    pub fn forget(&mut self, stage: PipelineStage) {
        self.artifacts.remove(&stage);
    }

    pub fn artifacts(&self, stage: PipelineStage) -> &[BackupArtifact] {
        self.artifacts
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_valid(&self, stage: PipelineStage) -> bool {
        !self.artifacts(stage).is_empty()
    }
}
