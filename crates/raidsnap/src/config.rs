//! Configuração em TOML
//!
//! Procurada em `/etc/raidsnap/raidsnap.toml` e depois em
//! `~/.config/raidsnap/config.toml`. Todas as seções são opcionais e as
//! flags da linha de comando têm precedência.

use crate::model::{BackupMode, RetryPolicy};
use crate::pipeline::RunSettings;
use crate::sink::RemoteMount;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const GIB: u64 = 1024 * 1024 * 1024;

/// Configuração completa
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub retry: RetryConfig,
    pub capacity: CapacityConfig,
    pub output: OutputConfig,
    pub package: PackageConfig,
    pub preflight: PreflightConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub mode: BackupMode,
    /// Disco (modo disk) ou arrays md (modo filesystems; vazio = todos)
    pub devices: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Ponto de montagem do destino
    pub path: Option<PathBuf>,
    /// Subdiretório dos artefatos dentro do destino
    pub backup_dir: String,
    pub remote: Option<RemoteMount>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: None,
            backup_dir: "raidsnap".to_string(),
            remote: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Margem de segurança somada ao espaço exigido
    pub margin_gib: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self { margin_gib: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Nome base dos artefatos (padrão `<hostname>-raid1`)
    pub name: Option<String>,
    pub keep_compressed: bool,
    pub compression_level: u32,
    pub stream_chunk_kib: usize,
    pub stream_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: None,
            keep_compressed: false,
            compression_level: 6,
            stream_chunk_kib: 1024,
            stream_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Diretório com `isolinux.bin` e `ldlinux.c32`
    pub boot_dir: PathBuf,
    pub volume_label: String,
    pub tool: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            boot_dir: PathBuf::from("/usr/lib/ISOLINUX"),
            volume_label: "RAIDSNAP".to_string(),
            tool: "xorriso".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Serviços cuja atividade gera aviso (escritas concorrentes na origem)
    pub competing_services: Vec<String>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            competing_services: ["mysql", "mariadb", "postgresql", "mongod"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Carrega o arquivo informado ou o primeiro encontrado no caminho padrão
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        for path in Self::default_paths() {
            if path.is_file() {
                return Self::load_file(&path);
            }
        }

        debug!("nenhum arquivo de configuração, usando padrões");
        Ok(Self::default())
    }

    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/raidsnap/raidsnap.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("raidsnap").join("config.toml"));
        }
        paths
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Falha ao ler configuração {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Configuração inválida em {}", path.display()))?;
        debug!(path = %path.display(), "configuração carregada");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Falha ao interpretar TOML")
    }

    /// Rejeita combinações que nenhuma execução conseguiria honrar
    pub fn validate(&self) -> Result<()> {
        if self.sink.path.is_none() {
            bail!("Destino não configurado: use --sink ou [sink].path");
        }

        if self.source.mode == BackupMode::Disk && self.source.devices.len() != 1 {
            bail!(
                "O modo disk exige exatamente um dispositivo de origem ({} informados)",
                self.source.devices.len()
            );
        }

        let backup_dir = Path::new(&self.sink.backup_dir);
        if self.sink.backup_dir.is_empty()
            || backup_dir
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!(
                "[sink].backup_dir deve ser um caminho relativo simples: '{}'",
                self.sink.backup_dir
            );
        }

        if let Some(remote) = &self.sink.remote {
            if remote.spec.is_empty() || remote.fstype.is_empty() {
                bail!("Montagem remota exige spec e fstype");
            }
        }

        if self.retry.max_attempts == 0 {
            bail!("[retry].max_attempts deve ser pelo menos 1");
        }

        if self.output.compression_level > 9 {
            bail!(
                "[output].compression_level deve estar entre 0 e 9 ({})",
                self.output.compression_level
            );
        }

        if self.output.stream_chunk_kib == 0 || self.output.stream_capacity == 0 {
            bail!("[output].stream_chunk_kib e stream_capacity devem ser positivos");
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.backoff_secs),
        )
    }

    pub fn margin_bytes(&self) -> u64 {
        self.capacity.margin_gib.saturating_mul(GIB)
    }

    pub fn base_name(&self) -> String {
        self.output
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{}-raid1", hostname()))
    }

    /// Parâmetros da execução (valida antes)
    pub fn run_settings(&self) -> Result<RunSettings> {
        self.validate()?;
        let sink = self
            .sink
            .path
            .clone()
            .ok_or_else(|| anyhow!("Destino não configurado"))?;

        Ok(RunSettings {
            mode: self.source.mode,
            source_paths: self.source.devices.clone(),
            sink,
            remote_sink: self.sink.remote.is_some(),
            backup_dir: self.sink.backup_dir.clone(),
            base_name: self.base_name(),
            retry: self.retry_policy(),
            margin_bytes: self.margin_bytes(),
            keep_compressed: self.output.keep_compressed,
            volume_label: self.package.volume_label.clone(),
            package_tool: self.package.tool.clone(),
            competing_services: self.preflight.competing_services.clone(),
            stream_chunk_bytes: self.output.stream_chunk_kib * 1024,
            stream_capacity: self.output.stream_capacity,
        })
    }
}

/// Nome do host (`/proc/sys/kernel/hostname`)
pub fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.source.mode, BackupMode::Disk);
        assert_eq!(config.sink.backup_dir, "raidsnap");
        assert_eq!(config.retry_policy(), RetryPolicy::new(3, Duration::from_secs(30)));
        assert_eq!(config.margin_bytes(), GIB);
        assert!(config.base_name().ends_with("-raid1"));
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml_str(
            r#"
            [source]
            mode = "filesystems"
            devices = ["/dev/md0", "/dev/md1"]

            [sink]
            path = "/mnt/backup"

            [sink.remote]
            spec = "nas:/backups"
            fstype = "nfs"
            options = "vers=4.2"

            [retry]
            backoff_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.source.mode, BackupMode::Filesystems);
        assert_eq!(config.source.devices.len(), 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_secs, 5);
        assert_eq!(config.sink.remote.as_ref().unwrap().fstype, "nfs");
        assert_eq!(config.output.compression_level, 6);
        config.validate().unwrap();

        let settings = config.run_settings().unwrap();
        assert!(settings.remote_sink);
        assert_eq!(settings.sink, PathBuf::from("/mnt/backup"));
        assert_eq!(settings.stream_chunk_bytes, 1024 * 1024);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.sink.path = Some(PathBuf::from("/mnt/backup"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exatamente um"));

        config.source.devices = vec![PathBuf::from("/dev/sda")];
        config.validate().unwrap();

        config.sink.backup_dir = "../fora".to_string();
        assert!(config.validate().is_err());
        config.sink.backup_dir = "raidsnap".to_string();

        config.output.compression_level = 10;
        assert!(config.validate().is_err());
        config.output.compression_level = 9;

        config.sink.remote = Some(RemoteMount::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());

        let path = dir.path().join("raidsnap.toml");
        fs::write(&path, "[output]\nname = \"srv01\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.base_name(), "srv01");
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(Config::from_toml_str("[source]\nmode = \"tape\"\n").is_err());
    }
}
