//! Validação de pré-condições
//!
//! Os fatos do host são coletados por um [`HostProbe`] e avaliados por
//! funções puras. O resultado é aprovado, reprovado (fatal, sem efeitos
//! colaterais) ou um conjunto de avisos que o operador precisa aceitar.

pub mod mdstat;
pub mod probe;

use crate::error::BackupError;
use crate::model::{BackupMode, SourceDevice};
use crate::sink::mounts::mount_for_path;
use crate::tools::partclone;
use crate::tools::Confirm;
use anyhow::Result;
use mdstat::MdArray;
use probe::{busy_mount_points, shares_disk, HostProbe};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use probe::SystemProbe;

const GIB: u64 = 1024 * 1024 * 1024;

/// Resultado de uma avaliação
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    HardFail(String),
    SoftWarn(Vec<String>),
}

/// Fatos do host relevantes antes de qualquer escrita
#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    pub euid: u32,
    pub missing_tools: Vec<String>,
    pub sources: Vec<SourceDevice>,
    pub missing_sources: Vec<PathBuf>,
    pub arrays: Vec<MdArray>,
    /// Origem e pontos de montagem que a usam
    pub busy_sources: Vec<(PathBuf, Vec<PathBuf>)>,
    pub active_services: Vec<String>,
}

/// Fatos do destino, coletados com a montagem já saudável
#[derive(Debug, Clone, Default)]
pub struct SinkFacts {
    /// Dispositivo que hospeda o destino (`/dev/sdc1`, `nas:/export`)
    pub device: Option<String>,
    pub available_bytes: u64,
}

/// O que a coleta precisa saber sobre a execução
#[derive(Debug, Clone)]
pub struct HostQuery<'a> {
    pub mode: BackupMode,
    pub source_paths: &'a [PathBuf],
    /// `mount`/`umount` entram na lista de ferramentas
    pub remote_sink: bool,
    pub package_tool: &'a str,
    pub competing_services: &'a [String],
}

/// Ferramentas externas exigidas pela execução
pub fn required_tools(
    mode: BackupMode,
    sources: &[SourceDevice],
    remote_sink: bool,
    package_tool: &str,
) -> Vec<String> {
    let mut tools = Vec::new();

    match mode {
        BackupMode::Disk => tools.push("dd".to_string()),
        BackupMode::Filesystems => {
            for fs_type in sources.iter().filter_map(|s| s.fs_type.as_deref()) {
                let tool = partclone::tool_for(fs_type);
                if !tools.contains(&tool) {
                    tools.push(tool);
                }
            }
        }
    }

    tools.push(package_tool.to_string());
    tools.push("mdadm".to_string());

    if remote_sink {
        tools.push("mount".to_string());
        tools.push("umount".to_string());
    }

    tools
}

/// Coleta os fatos do host
pub fn gather_host_facts(probe: &dyn HostProbe, query: &HostQuery<'_>) -> Result<HostFacts> {
    let arrays = probe.raid_arrays()?;
    let mounts = probe.mounts()?;

    // Sem origens no modo por sistema de arquivos: todos os arrays do host
    let source_paths: Vec<PathBuf> =
        if query.source_paths.is_empty() && query.mode == BackupMode::Filesystems {
            arrays
                .iter()
                .map(|a| PathBuf::from(a.device_path()))
                .collect()
        } else {
            query.source_paths.to_vec()
        };

    let mut sources = Vec::new();
    let mut missing_sources = Vec::new();
    for path in &source_paths {
        match probe.inspect_source(path)? {
            Some(source) => sources.push(source),
            None => missing_sources.push(path.clone()),
        }
    }

    let whole_disk = query.mode == BackupMode::Disk;
    let busy_sources = sources
        .iter()
        .filter_map(|source| {
            let busy = busy_mount_points(&source.path, whole_disk, &mounts, &arrays);
            (!busy.is_empty()).then(|| (source.path.clone(), busy))
        })
        .collect();

    let missing_tools = required_tools(query.mode, &sources, query.remote_sink, query.package_tool)
        .into_iter()
        .filter(|tool| !probe.has_tool(tool))
        .collect();

    let active_services = query
        .competing_services
        .iter()
        .filter(|service| probe.service_active(service))
        .cloned()
        .collect();

    Ok(HostFacts {
        euid: probe.effective_uid(),
        missing_tools,
        sources,
        missing_sources,
        arrays,
        busy_sources,
        active_services,
    })
}

/// Coleta os fatos do destino
pub fn gather_sink_facts(probe: &dyn HostProbe, sink: &Path) -> Result<SinkFacts> {
    let sink = std::fs::canonicalize(sink).unwrap_or_else(|_| sink.to_path_buf());
    let mounts = probe.mounts()?;

    Ok(SinkFacts {
        device: mount_for_path(&mounts, &sink).map(|entry| entry.device.clone()),
        available_bytes: probe.available_bytes(&sink)?,
    })
}

/// Espaço exigido no destino: bytes capturados mais a margem de segurança
pub fn required_bytes(mode: BackupMode, sources: &[SourceDevice], margin_bytes: u64) -> u64 {
    sources
        .iter()
        .map(|source| source.capture_bytes(mode))
        .fold(margin_bytes, u64::saturating_add)
}

/// Avaliações puras sobre os fatos coletados
pub struct PreconditionValidator {
    mode: BackupMode,
}

impl PreconditionValidator {
    pub fn new(mode: BackupMode) -> Self {
        Self { mode }
    }

    /// Privilégio, ferramentas, origens, saúde do RAID, uso das origens e serviços
    pub fn evaluate_host(&self, facts: &HostFacts) -> Outcome {
        if facts.euid != 0 {
            return Outcome::HardFail(
                "é preciso executar como root para ler dispositivos de bloco".to_string(),
            );
        }

        if !facts.missing_tools.is_empty() {
            return Outcome::HardFail(format!(
                "ferramentas ausentes no PATH: {}",
                facts.missing_tools.join(", ")
            ));
        }

        if !facts.missing_sources.is_empty() {
            let missing: Vec<String> = facts
                .missing_sources
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            return Outcome::HardFail(format!(
                "dispositivo de origem não encontrado: {}",
                missing.join(", ")
            ));
        }

        if facts.sources.is_empty() {
            return Outcome::HardFail("nenhum dispositivo de origem".to_string());
        }

        if self.mode == BackupMode::Disk && facts.sources.len() != 1 {
            return Outcome::HardFail(format!(
                "o modo disk copia exatamente um disco ({} informados)",
                facts.sources.len()
            ));
        }

        if self.mode == BackupMode::Filesystems {
            if let Some(untyped) = facts.sources.iter().find(|s| s.fs_type.is_none()) {
                return Outcome::HardFail(format!(
                    "tipo de sistema de arquivos de {} desconhecido",
                    untyped.path.display()
                ));
            }
        }

        let mut warnings = Vec::new();

        if facts.arrays.is_empty() {
            warnings.push("nenhum array md encontrado em /proc/mdstat".to_string());
        }
        warnings.extend(
            facts
                .arrays
                .iter()
                .filter_map(|array| array.problem())
                .map(|problem| format!("RAID não saudável: {}", problem)),
        );

        for (source, mount_points) in &facts.busy_sources {
            let points: Vec<String> = mount_points
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            warnings.push(format!(
                "{} está em uso (montado em {}); a cópia pode ficar inconsistente",
                source.display(),
                points.join(", ")
            ));
        }

        if !facts.active_services.is_empty() {
            warnings.push(format!(
                "serviços concorrentes ativos: {}",
                facts.active_services.join(", ")
            ));
        }

        if warnings.is_empty() {
            Outcome::Pass
        } else {
            Outcome::SoftWarn(warnings)
        }
    }

    /// O destino não pode estar em nenhum disco de origem
    pub fn evaluate_sink(&self, sink: &SinkFacts, host: &HostFacts) -> Outcome {
        let Some(device) = sink.device.as_deref() else {
            return Outcome::Pass;
        };

        match host
            .sources
            .iter()
            .find(|source| shares_disk(device, &source.path, &host.arrays))
        {
            Some(source) => Outcome::HardFail(format!(
                "o destino está em {}, no mesmo disco de {}",
                device,
                source.path.display()
            )),
            None => Outcome::Pass,
        }
    }

    /// Falha quando `available < required`; igualdade passa
    pub fn evaluate_capacity(&self, available: u64, required: u64) -> Outcome {
        if available < required {
            Outcome::HardFail(format!(
                "espaço insuficiente no destino: {} disponíveis, {} necessários",
                format_bytes(available),
                format_bytes(required)
            ))
        } else {
            Outcome::Pass
        }
    }
}

/// Aplica um resultado: reprovação vira erro, avisos passam pela confirmação
pub fn gate(outcome: Outcome, confirm: &dyn Confirm) -> Result<(), BackupError> {
    match outcome {
        Outcome::Pass => Ok(()),
        Outcome::HardFail(reason) => Err(BackupError::Precondition(reason)),
        Outcome::SoftWarn(reasons) => {
            for reason in reasons {
                if !confirm.confirm(&reason) {
                    return Err(BackupError::UserAbort(reason));
                }
                warn!(%reason, "aviso aceito, continuando");
            }
            info!("avisos aceitos");
            Ok(())
        }
    }
}

/// `1.50 GiB`, `512.00 MiB`...
pub fn format_bytes(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
