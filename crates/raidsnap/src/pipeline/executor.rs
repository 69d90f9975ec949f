//! Sequenciador dos estágios: captura, compressão, empacotamento, verificação e limpeza

use super::cancel::CancelFlag;
use super::planner::{Plan, StageAction};
use super::stream::{bounded_pipe, PipeWriter};
use super::summary::{RunReport, StageReport};
use super::verifier::IntegrityVerifier;
use super::{RunSettings, Toolset};
use crate::error::BackupError;
use crate::layout::staging_path;
use crate::model::{BackupMode, PipelineStage, RunContext};
use crate::preflight::format_bytes;
use crate::sink::HealthMonitor;
use crate::tools::{PackageFormat, PackageRequest, PayloadEntry};
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Executa apenas os estágios marcados para rodar, parando na primeira falha
pub struct PipelineExecutor<'a> {
    tools: &'a Toolset,
    settings: &'a RunSettings,
    cancel: &'a CancelFlag,
    verifier: IntegrityVerifier,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(tools: &'a Toolset, settings: &'a RunSettings, cancel: &'a CancelFlag) -> Self {
        Self {
            tools,
            settings,
            cancel,
            verifier: IntegrityVerifier::new(),
        }
    }

    pub fn run(&self, ctx: &mut RunContext, plan: &Plan) -> Result<RunReport, BackupError> {
        let mut report = RunReport::default();

        for step in plan.steps() {
            if self.cancel.is_cancelled() {
                warn!(stage = %step.stage, "cancelamento recebido");
                return Err(BackupError::Cancelled { stage: step.stage });
            }

            let started = Instant::now();
            match step.action {
                StageAction::Skip => {
                    println!("⏭  {}: artefato válido, estágio pulado", step.stage);
                }
                StageAction::Run => {
                    self.ensure_sink(ctx)?;
                    self.run_stage(step.stage, ctx, &mut report)?;
                }
            }

            report.stages.push(StageReport {
                stage: step.stage,
                action: step.action,
                duration: started.elapsed(),
            });
        }

        report.packaged = ctx.artifacts(PipelineStage::Package).first().cloned();
        Ok(report)
    }

    fn ensure_sink(&self, ctx: &mut RunContext) -> Result<(), BackupError> {
        HealthMonitor::new(self.tools.mounts.as_ref(), self.tools.clock.as_ref())
            .ensure_healthy(&mut ctx.sink, &self.settings.retry)
    }

    fn run_stage(
        &self,
        stage: PipelineStage,
        ctx: &mut RunContext,
        report: &mut RunReport,
    ) -> Result<(), BackupError> {
        debug!(%stage, "iniciando estágio");
        match stage {
            PipelineStage::Precheck => self.precheck(ctx),
            PipelineStage::Capture => self.capture(ctx),
            PipelineStage::Compress => self.compress(ctx, report),
            PipelineStage::Package => self.package(ctx),
            PipelineStage::Verify => self.verify(ctx),
            PipelineStage::Cleanup => {
                self.cleanup(ctx, report);
                Ok(())
            }
        }
    }

    fn precheck(&self, ctx: &RunContext) -> Result<(), BackupError> {
        let dir = ctx.layout.dir();
        if !dir.is_dir() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Falha ao criar {}", dir.display()))
                .map_err(|e| BackupError::pipeline(PipelineStage::Precheck, e))?;
        }
        println!("✅ Destino pronto: {}", dir.display());
        Ok(())
    }

    fn capture(&self, ctx: &mut RunContext) -> Result<(), BackupError> {
        let stage = PipelineStage::Capture;

        println!("\n🧾 Gravando descritor do RAID...");
        self.write_descriptor(ctx)
            .map_err(|e| BackupError::pipeline(stage, e))?;

        let sources = ctx.sources.clone();
        let expected = ctx.layout.expected_artifacts(stage, ctx.mode, &sources);
        let mut valid = Vec::with_capacity(expected.len());

        for (source, artifact) in sources.iter().zip(expected) {
            self.ensure_sink(ctx)?;

            println!(
                "\n💽 Copiando {} → {}",
                source.path.display(),
                artifact.path.display()
            );
            // Cópia interrompida fica como `.partial`, nunca com o nome final
            staged(&artifact.path, |tmp| self.tools.capture.capture(source, tmp))
                .map_err(|e| BackupError::pipeline(stage, e))?;

            let verified = self.verifier.verify(&artifact)?;
            println!("✅ {} ({})", verified.file_name(), verified.kind);
            valid.push(verified);
        }

        ctx.record(stage, valid);
        Ok(())
    }

    fn compress(&self, ctx: &mut RunContext, report: &mut RunReport) -> Result<(), BackupError> {
        let stage = PipelineStage::Compress;

        let captured: Vec<PathBuf> = ctx
            .artifacts(PipelineStage::Capture)
            .iter()
            .map(|a| a.path.clone())
            .collect();
        if captured.is_empty() {
            return Err(BackupError::pipeline(
                stage,
                anyhow!("nenhuma imagem capturada válida para comprimir"),
            ));
        }

        let input = match ctx.mode {
            BackupMode::Disk => StreamInput::Raw(captured[0].clone()),
            BackupMode::Filesystems => {
                self.ensure_descriptor(ctx)
                    .map_err(|e| BackupError::pipeline(stage, e))?;
                let mut files = captured;
                files.push(ctx.layout.descriptor_path());
                StreamInput::Bundle(files)
            }
        };

        let artifact = ctx
            .layout
            .expected_artifacts(stage, ctx.mode, &ctx.sources)
            .into_iter()
            .next()
            .ok_or_else(|| BackupError::pipeline(stage, anyhow!("layout sem arquivo comprimido")))?;

        println!("\n🗜  Comprimindo → {}", artifact.path.display());
        let written = staged(&artifact.path, |tmp| self.stream_compress(input, tmp))
            .map_err(|e| BackupError::pipeline(stage, e))?;
        info!(artifact = %artifact.path.display(), bytes = written, "compressão concluída");

        let verified = self.verifier.verify(&artifact)?;
        println!("✅ {} ({})", verified.file_name(), format_bytes(written));
        report.compressed_bytes = Some(written);
        ctx.record(stage, vec![verified]);
        Ok(())
    }

    /// Produtor em outra thread alimenta o compressor pelo canal limitado
    fn stream_compress(&self, input: StreamInput, dest: &Path) -> Result<u64> {
        let (writer, mut reader) =
            bounded_pipe(self.settings.stream_chunk_bytes, self.settings.stream_capacity);
        let compressor = self.tools.compressor.as_ref();

        let (produced, consumed) = thread::scope(|scope| {
            let producer = scope.spawn(move || input.produce(writer));
            let consumed = compressor.compress(&mut reader, dest);
            // Libera o produtor caso o consumidor tenha parado no meio
            drop(reader);
            let produced = producer
                .join()
                .unwrap_or_else(|_| Err(anyhow!("produtor do fluxo entrou em pânico")));
            (produced, consumed)
        });

        match (produced, consumed) {
            (Err(producer), Err(consumer)) => {
                let consumer = format!("{:#}", consumer);
                warn!(error = %consumer, "compressor interrompido");
                Err(producer)
            }
            (Ok(()), Err(consumer)) => Err(consumer),
            (Err(producer), Ok(_)) => Err(producer),
            (Ok(()), Ok(written)) => Ok(written),
        }
    }

    fn package(&self, ctx: &mut RunContext) -> Result<(), BackupError> {
        let stage = PipelineStage::Package;

        let compressed = ctx
            .artifacts(PipelineStage::Compress)
            .first()
            .cloned()
            .ok_or_else(|| {
                BackupError::pipeline(stage, anyhow!("nenhum arquivo comprimido válido para empacotar"))
            })?;

        self.ensure_descriptor(ctx)
            .map_err(|e| BackupError::pipeline(stage, e))?;

        let payload_size = compressed.size_on_disk().unwrap_or(0);
        let format = PackageFormat::for_payload_size(payload_size);
        let descriptor = ctx.layout.descriptor_path();

        let output = ctx.layout.packaged_path();
        let request = PackageRequest {
            output: staging_path(&output),
            payload: vec![
                PayloadEntry {
                    name: compressed.file_name(),
                    source: compressed.path.clone(),
                },
                PayloadEntry {
                    name: file_name(&descriptor),
                    source: descriptor,
                },
            ],
            format,
            volume_label: self.settings.volume_label.clone(),
        };

        println!(
            "\n📀 Gerando {} ({}, payload {})",
            output.display(),
            format,
            format_bytes(payload_size)
        );
        staged(&output, |_| self.tools.packager.package(&request))
            .map_err(|e| BackupError::pipeline(stage, e))?;
        println!("✅ Imagem gerada");

        // Registrada como válida só depois do estágio de verificação
        ctx.forget(stage);
        Ok(())
    }

    fn verify(&self, ctx: &mut RunContext) -> Result<(), BackupError> {
        let stage = PipelineStage::Package;
        let artifact = ctx
            .layout
            .expected_artifacts(stage, ctx.mode, &ctx.sources)
            .into_iter()
            .next()
            .ok_or_else(|| {
                BackupError::pipeline(PipelineStage::Verify, anyhow!("layout sem imagem final"))
            })?;

        println!("\n🔍 Verificando {}...", artifact.path.display());
        let verified = self.verifier.verify(&artifact)?;
        println!("✅ Imagem final íntegra");
        ctx.record(stage, vec![verified]);
        Ok(())
    }

    /// Remove intermediários; falhas de remoção viram avisos
    fn cleanup(&self, ctx: &mut RunContext, report: &mut RunReport) {
        if !ctx.has_valid(PipelineStage::Package) {
            warn!("limpeza ignorada: imagem final não verificada");
            return;
        }

        let mut targets: Vec<(Option<PipelineStage>, PathBuf)> = ctx
            .layout
            .expected_artifacts(PipelineStage::Capture, ctx.mode, &ctx.sources)
            .into_iter()
            .map(|a| (Some(PipelineStage::Capture), a.path))
            .collect();
        if !self.settings.keep_compressed {
            targets.push((
                Some(PipelineStage::Compress),
                ctx.layout.compressed_path(ctx.mode),
            ));
        }

        // Sobras de produtores interrompidos em execuções anteriores
        let leftovers = ctx
            .layout
            .expected_artifacts(PipelineStage::Capture, ctx.mode, &ctx.sources)
            .into_iter()
            .map(|a| a.path)
            .chain([ctx.layout.compressed_path(ctx.mode), ctx.layout.packaged_path()])
            .map(|path| (None, staging_path(&path)));
        targets.extend(leftovers);

        for (stage, path) in targets {
            if !path.exists() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    println!("🧹 Removido {}", path.display());
                    report.removed.push(path);
                    if let Some(stage) = stage {
                        ctx.forget(stage);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "falha ao remover intermediário"),
            }
        }
    }

    fn write_descriptor(&self, ctx: &RunContext) -> Result<()> {
        let descriptor = self.tools.raid.describe()?;
        descriptor.write_to(&ctx.layout.descriptor_path())
    }

    fn ensure_descriptor(&self, ctx: &RunContext) -> Result<()> {
        if ctx.layout.descriptor_path().is_file() {
            return Ok(());
        }
        warn!("descritor do RAID ausente, gerando novamente");
        self.write_descriptor(ctx)
    }
}

/// Origem do fluxo comprimido
enum StreamInput {
    /// Imagem bruta lida como está
    Raw(PathBuf),
    /// Arquivos reunidos num tar
    Bundle(Vec<PathBuf>),
}

impl StreamInput {
    fn produce(self, writer: PipeWriter) -> Result<()> {
        match self {
            StreamInput::Raw(path) => {
                let mut writer = writer;
                let mut file = File::open(&path)
                    .with_context(|| format!("Falha ao abrir {}", path.display()))?;
                io::copy(&mut file, &mut writer)
                    .with_context(|| format!("Falha ao ler {}", path.display()))?;
                writer.finish().context("Falha ao finalizar o fluxo")?;
            }
            StreamInput::Bundle(files) => {
                let mut builder = tar::Builder::new(writer);
                for path in &files {
                    builder
                        .append_path_with_name(path, file_name(path))
                        .with_context(|| format!("Falha ao adicionar {} ao tar", path.display()))?;
                }
                let writer = builder.into_inner().context("Falha ao finalizar o tar")?;
                writer.finish().context("Falha ao finalizar o fluxo")?;
            }
        }
        Ok(())
    }
}

/// Produz em `<destino>.partial` e só dá o nome final depois de `produce` terminar bem.
/// Em caso de erro o parcial fica no destino; a próxima tentativa o substitui.
fn staged<T>(dest: &Path, produce: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let staging = staging_path(dest);
    match fs::remove_file(&staging) {
        Ok(()) => debug!(path = %staging.display(), "parcial anterior descartado"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Falha ao remover {}", staging.display()))
        }
    }

    let value = produce(&staging)?;
    fs::rename(&staging, dest).with_context(|| {
        format!(
            "Falha ao renomear {} para {}",
            staging.display(),
            dest.display()
        )
    })?;
    Ok(value)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
