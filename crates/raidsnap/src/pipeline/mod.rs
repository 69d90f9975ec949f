//! Orquestração do backup
//!
//! Ordem de uma execução:
//! 1. Pré-condições do host (falhas fatais, avisos confirmados pelo operador)
//! 2. Saúde da montagem do destino
//! 3. Destino fora dos discos de origem
//! 4. Reserva exclusiva do destino
//! 5. Plano de retomada a partir dos artefatos existentes
//! 6. Espaço livre, só quando algum estágio produtor vai rodar
//! 7. Execução dos estágios
//!
//! `plan_only` faz os passos 1 a 6 sem alterar o backup: não cria o diretório
//! nem a trava e não apaga artefatos inválidos.

pub mod cancel;
pub mod executor;
pub mod planner;
pub mod stream;
pub mod summary;
pub mod verifier;

pub use cancel::CancelFlag;
pub use executor::PipelineExecutor;
pub use planner::{Plan, ResumabilityPlanner, StageAction};
pub use summary::RunReport;
pub use verifier::IntegrityVerifier;

use crate::error::BackupError;
use crate::layout::BackupLayout;
use crate::model::{
    BackupMode, MountHandle, PipelineStage, RetryPolicy, RunContext, SourceDevice,
};
use crate::preflight::probe::HostProbe;
use crate::preflight::{
    format_bytes, gate, gather_host_facts, gather_sink_facts, required_bytes, HostQuery,
    PreconditionValidator,
};
use crate::sink::{HealthMonitor, MountOps, SinkLock};
use crate::tools::{Capture, Clock, Compressor, Confirm, Packager, RaidInspector};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Capacidades externas usadas por uma execução
#[derive(Clone)]
pub struct Toolset {
    pub capture: Arc<dyn Capture>,
    pub compressor: Arc<dyn Compressor>,
    pub packager: Arc<dyn Packager>,
    pub raid: Arc<dyn RaidInspector>,
    pub mounts: Arc<dyn MountOps>,
    pub probe: Arc<dyn HostProbe>,
    pub confirm: Arc<dyn Confirm>,
    pub clock: Arc<dyn Clock>,
}

/// Parâmetros resolvidos de uma execução
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: BackupMode,
    pub source_paths: Vec<PathBuf>,
    pub sink: PathBuf,
    pub remote_sink: bool,
    pub backup_dir: String,
    pub base_name: String,
    pub retry: RetryPolicy,
    pub margin_bytes: u64,
    pub keep_compressed: bool,
    pub volume_label: String,
    pub package_tool: String,
    pub competing_services: Vec<String>,
    pub stream_chunk_bytes: usize,
    pub stream_capacity: usize,
}

#[cfg(test)]
impl RunSettings {
    pub(crate) fn for_tests(sink: &std::path::Path) -> Self {
        Self {
            mode: BackupMode::Disk,
            source_paths: vec![PathBuf::from("/dev/sda")],
            sink: sink.to_path_buf(),
            remote_sink: false,
            backup_dir: "raidsnap".to_string(),
            base_name: "host".to_string(),
            retry: RetryPolicy::new(3, std::time::Duration::from_secs(30)),
            margin_bytes: 0,
            keep_compressed: false,
            volume_label: "RAIDSNAP".to_string(),
            package_tool: "xorriso".to_string(),
            competing_services: Vec::new(),
            stream_chunk_bytes: 16 * 1024,
            stream_capacity: 4,
        }
    }
}

/// Estado pronto para executar: contexto, plano e a reserva do destino
struct Prepared {
    ctx: RunContext,
    plan: Plan,
    _lock: Option<SinkLock>,
}

/// Liga validação, monitor, planejador e executor
pub struct Orchestrator {
    tools: Toolset,
    settings: RunSettings,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(tools: Toolset, settings: RunSettings, cancel: CancelFlag) -> Self {
        Self {
            tools,
            settings,
            cancel,
        }
    }

    /// Executa o backup completo, retomando o que já estiver válido
    pub fn run(&self) -> Result<RunReport, BackupError> {
        let Prepared {
            mut ctx,
            plan,
            _lock,
        } = self.prepare(true)?;

        println!("\n📋 Plano:\n{}", plan);

        let report =
            PipelineExecutor::new(&self.tools, &self.settings, &self.cancel).run(&mut ctx, &plan)?;

        println!("\n🎉 Backup concluído com sucesso!");
        Ok(report)
    }

    /// Valida e calcula o plano sem executar nenhum estágio nem alterar o destino
    pub fn plan_only(&self) -> Result<Plan, BackupError> {
        let prepared = self.prepare(false)?;
        Ok(prepared.plan)
    }

    fn prepare(&self, execute: bool) -> Result<Prepared, BackupError> {
        let settings = &self.settings;
        let probe = self.tools.probe.as_ref();
        let confirm = self.tools.confirm.as_ref();
        let validator = PreconditionValidator::new(settings.mode);

        println!("🔍 Verificando pré-condições...");
        let query = HostQuery {
            mode: settings.mode,
            source_paths: &settings.source_paths,
            remote_sink: settings.remote_sink,
            package_tool: &settings.package_tool,
            competing_services: &settings.competing_services,
        };
        let host = gather_host_facts(probe, &query).map_err(precondition)?;
        gate(validator.evaluate_host(&host), confirm)?;
        println!("✅ Host apto ({} origem(ns))", host.sources.len());

        println!("\n🔌 Verificando destino {}...", settings.sink.display());
        let mut sink = MountHandle::new(settings.sink.clone());
        HealthMonitor::new(self.tools.mounts.as_ref(), self.tools.clock.as_ref())
            .ensure_healthy(&mut sink, &settings.retry)?;

        let sink_facts = gather_sink_facts(probe, &settings.sink).map_err(precondition)?;
        gate(validator.evaluate_sink(&sink_facts, &host), confirm)?;
        println!("✅ Destino montado e gravável");

        let layout = BackupLayout::new(&settings.sink, &settings.backup_dir, &settings.base_name);
        let (lock, verifier) = if execute {
            (
                Some(SinkLock::acquire(&layout.lock_path())?),
                IntegrityVerifier::new(),
            )
        } else {
            (None, IntegrityVerifier::read_only())
        };

        let mut ctx = RunContext::new(settings.mode, host.sources, layout, sink);
        let plan = ResumabilityPlanner::new(&verifier).plan(&mut ctx);

        if plan.produces_anything() {
            let required = required_bytes(
                settings.mode,
                pending_captures(&plan, &ctx.sources),
                settings.margin_bytes,
            );
            let available = probe
                .available_bytes(&settings.sink)
                .map_err(precondition)?;
            info!(required, available, "espaço no destino");
            gate(validator.evaluate_capacity(available, required), confirm)?;
            println!(
                "✅ Espaço suficiente ({} disponíveis, {} necessários)",
                format_bytes(available),
                format_bytes(required)
            );
        }

        Ok(Prepared {
            ctx,
            plan,
            _lock: lock,
        })
    }
}

/// Origens que ainda serão copiadas; capturas válidas já ocupam o destino
fn pending_captures<'a>(plan: &Plan, sources: &'a [SourceDevice]) -> &'a [SourceDevice] {
    if plan.runs(PipelineStage::Capture) {
        sources
    } else {
        &[]
    }
}

fn precondition(e: anyhow::Error) -> BackupError {
    BackupError::Precondition(format!("{:#}", e))
}
