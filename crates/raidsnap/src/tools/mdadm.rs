//! Descritor do RAID gravado junto ao backup

use super::RaidInspector;
use crate::config::hostname;
use crate::preflight::mdstat::{parse_mdstat, MdArray};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

/// Array descrito no arquivo de metadados
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayEntry {
    pub device: String,
    pub level: Option<String>,
    pub state: String,
    pub members: Vec<String>,
    pub healthy: bool,
}

impl From<&MdArray> for ArrayEntry {
    fn from(array: &MdArray) -> Self {
        Self {
            device: array.device_path(),
            level: array.level.clone(),
            state: array.state.clone(),
            members: array
                .members
                .iter()
                .map(|m| format!("/dev/{}", m.name))
                .collect(),
            healthy: array.is_healthy(),
        }
    }
}

/// Metadados suficientes para remontar os arrays na restauração
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidDescriptor {
    /// Segundos desde a época Unix
    pub generated_at: u64,
    pub hostname: String,
    pub arrays: Vec<ArrayEntry>,
    /// Saída de `mdadm --detail --scan` (bloco ARRAY pronto para o mdadm.conf)
    pub mdadm_scan: String,
    /// Cópia de `/proc/mdstat` no momento da captura
    pub mdstat: String,
}

impl RaidDescriptor {
    pub fn new(hostname: &str, mdstat: &str, mdadm_scan: &str) -> Self {
        let generated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            generated_at,
            hostname: hostname.to_string(),
            arrays: parse_mdstat(mdstat).iter().map(ArrayEntry::from).collect(),
            mdadm_scan: mdadm_scan.to_string(),
            mdstat: mdstat.to_string(),
        }
    }

    /// Grava o descritor em JSON (arquivo temporário + rename)
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Falha ao serializar o descritor do RAID")?;

        let mut tmp = PathBuf::from(path);
        tmp.set_extension("json.tmp");

        fs::write(&tmp, json)
            .with_context(|| format!("Falha ao gravar {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Falha ao mover {} para {}", tmp.display(), path.display()))?;

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Falha ao ler {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Descritor do RAID inválido: {}", path.display()))
    }
}

/// Lê `/proc/mdstat` e consulta `mdadm --detail --scan`
pub struct MdadmInspector {
    program: String,
    mdstat_path: PathBuf,
}

impl MdadmInspector {
    pub fn new() -> Self {
        Self {
            program: "mdadm".to_string(),
            mdstat_path: PathBuf::from("/proc/mdstat"),
        }
    }

    fn scan(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["--detail", "--scan"])
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Falha ao executar '{}'", self.program))?;

        if !output.status.success() {
            return Err(anyhow!(
                "'{} --detail --scan' falhou:\n\n{}",
                self.program,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for MdadmInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl RaidInspector for MdadmInspector {
    fn describe(&self) -> Result<RaidDescriptor> {
        let mdstat = fs::read_to_string(&self.mdstat_path)
            .with_context(|| format!("Falha ao ler {}", self.mdstat_path.display()))?;
        let scan = self.scan()?;

        Ok(RaidDescriptor::new(&hostname(), &mdstat, &scan))
    }
}
