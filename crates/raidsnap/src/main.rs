mod config;
mod error;
mod layout;
mod logging;
mod model;
mod pipeline;
mod preflight;
mod sink;
#[cfg(test)]
mod testing;
mod tools;

use crate::config::Config;
use crate::error::BackupError;
use crate::model::BackupMode;
use crate::pipeline::{CancelFlag, Orchestrator, RunSettings, Toolset};
use crate::preflight::SystemProbe;
use crate::sink::{RemoteMount, SystemMounts};
use crate::tools::{
    AssumeYes, Capture, Confirm, DdCapture, GzipCompressor, MdadmInspector, PartcloneCapture,
    SystemClock, TerminalConfirm, XorrisoPackager,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Parser)]
#[command(
    name = "raidsnap",
    about = "raidsnap: backup verificado e retomável de servidores RAID1 em ISO inicializável"
)]
struct Args {
    /// Dispositivo de origem (disco no modo disk, array md no modo filesystems)
    #[arg(long = "source")]
    sources: Vec<PathBuf>,

    /// Modo de backup
    #[arg(long, value_enum)]
    mode: Option<BackupMode>,

    /// Ponto de montagem do destino
    #[arg(long)]
    sink: Option<PathBuf>,

    /// Especificação da montagem remota (ex.: `nas:/backups`)
    #[arg(long)]
    remote: Option<String>,

    /// Tipo da montagem remota
    #[arg(long, default_value = "nfs")]
    remote_fstype: String,

    /// Opções da montagem remota
    #[arg(long, requires = "remote")]
    remote_options: Option<String>,

    /// Tentativas de recuperar a montagem do destino
    #[arg(long)]
    retries: Option<u32>,

    /// Espera entre tentativas, em segundos
    #[arg(long)]
    backoff_secs: Option<u64>,

    /// Margem mínima de espaço livre, em GiB
    #[arg(long)]
    margin_gib: Option<u64>,

    /// Nome base dos artefatos
    #[arg(long)]
    name: Option<String>,

    /// Diretório com os arquivos do isolinux
    #[arg(long)]
    boot_dir: Option<PathBuf>,

    /// Mantém o arquivo comprimido após gerar a imagem
    #[arg(long)]
    keep_compressed: bool,

    /// Aceita todos os avisos sem perguntar
    #[arg(long)]
    yes: bool,

    /// Mostra o plano de retomada e sai, sem alterar o destino
    #[arg(long)]
    plan: bool,

    /// Arquivo de configuração TOML
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mais detalhes no log (repetível)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Só erros no log
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Sobrepõe as flags informadas aos valores do arquivo
    fn apply(&self, config: &mut Config) {
        if !self.sources.is_empty() {
            config.source.devices = self.sources.clone();
        }
        if let Some(mode) = self.mode {
            config.source.mode = mode;
        }
        if let Some(sink) = &self.sink {
            config.sink.path = Some(sink.clone());
        }
        if let Some(spec) = &self.remote {
            config.sink.remote = Some(RemoteMount {
                spec: spec.clone(),
                fstype: self.remote_fstype.clone(),
                options: self.remote_options.clone(),
            });
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries;
        }
        if let Some(backoff) = self.backoff_secs {
            config.retry.backoff_secs = backoff;
        }
        if let Some(margin) = self.margin_gib {
            config.capacity.margin_gib = margin;
        }
        if let Some(name) = &self.name {
            config.output.name = Some(name.clone());
        }
        if let Some(boot_dir) = &self.boot_dir {
            config.package.boot_dir = boot_dir.clone();
        }
        if self.keep_compressed {
            config.output.keep_compressed = true;
        }
    }
}

/// Ferramentas reais do host
fn system_toolset(config: &Config, assume_yes: bool) -> Toolset {
    let capture: Arc<dyn Capture> = match config.source.mode {
        BackupMode::Disk => Arc::new(DdCapture::new()),
        BackupMode::Filesystems => Arc::new(PartcloneCapture::new()),
    };
    let confirm: Arc<dyn Confirm> = if assume_yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(TerminalConfirm)
    };

    Toolset {
        capture,
        compressor: Arc::new(GzipCompressor::new(config.output.compression_level)),
        packager: Arc::new(XorrisoPackager::new(
            &config.package.tool,
            &config.package.boot_dir,
        )),
        raid: Arc::new(MdadmInspector::new()),
        mounts: Arc::new(SystemMounts::new(config.sink.remote.clone())),
        probe: Arc::new(SystemProbe::new()),
        confirm,
        clock: Arc::new(SystemClock),
    }
}

fn load_settings(args: &Args) -> anyhow::Result<(Config, RunSettings)> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    let settings = config.run_settings()?;
    Ok((config, settings))
}

fn run(args: &Args) -> anyhow::Result<()> {
    let (config, settings) = load_settings(args)?;
    debug!(?settings, "parâmetros resolvidos");

    let cancel = CancelFlag::new();
    cancel.register_signals()?;

    let orchestrator = Orchestrator::new(system_toolset(&config, args.yes), settings, cancel);

    if args.plan {
        let plan = orchestrator.plan_only()?;
        println!("📋 Plano de retomada:\n{}", plan);
        return Ok(());
    }

    println!("🚀 Iniciando backup ({})", config.source.mode);
    let report = orchestrator.run()?;
    report.print_summary();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(logging::Verbosity::from_flags(args.verbose, args.quiet));

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<BackupError>()
                .map(BackupError::exit_code)
                .unwrap_or(1);
            error!("{:#}", err);
            eprintln!("❌ {:#}", err);
            ExitCode::from(code)
        }
    }
}
