//! The compiler invocation surface (§4.11, §6): the driver that sequences a
//! run end to end. Since the source-language frontend is out of
//! scope (§1), the input is already-lowered textual IR (`.scir`); a
//! `CompilerInvocation` wires together parsing, the pass pipeline, and
//! (depending on output kind) IR reprinting, MIR lowering, or the full
//! MIR-to-bytes backend.

use std::path::PathBuf;

use clap::ValueEnum;

use crate::common::error::DiagnosticEngine;
use crate::ir::module::Module;
use crate::isel::TargetInfo;
use crate::pass::dsl::DslError;

/// What `CompilerInvocation::run` should produce (§4.11: "output kind
/// (`ir`, `mir`, `asm`)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputKind {
    /// Reprint the optimized IR in its textual form.
    Ir,
    /// Lower to MIR and print it.
    Mir,
    /// Run the full MIR pipeline and emit the assembled byte stream plus a
    /// sidecar symbol-table listing.
    Asm,
}

/// Failures surfaced at the CLI boundary (§7.1 "invocation::InvocationError").
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("cannot read {path:?}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("{0} error(s) parsing {1:?}")]
    Parse(u32, PathBuf),
    #[error("invalid pipeline spec: {0}")]
    Pipeline(#[from] DslError),
    #[error("both --opt-level and --pipeline were given; they are mutually exclusive")]
    ConflictingPipelineSpec,
    #[error("compilation canceled")]
    Canceled,
}

/// Arguments for one compiler run (§4.11). Derives [`clap::Parser`] directly
/// per §2.1's "a `clap`-derived argument parser for the invocation surface";
/// `scatha::invocation::CompilerInvocation::parse()` is the binary's whole
/// CLI surface.
#[derive(Debug, clap::Parser)]
#[command(name = "scatha", about = "Scatha IR/MIR middle- and back-end driver")]
pub struct CompilerInvocation {
    /// Input textual-IR file (.scir).
    pub input: PathBuf,

    /// Optimization level; expands to a canned pass pipeline. Mutually
    /// exclusive with --pipeline.
    #[arg(short = 'O', long, default_value_t = 0)]
    pub opt_level: u32,

    /// Explicit pipeline DSL string, e.g. "canonicalize, sroa, memtoreg".
    /// Mutually exclusive with --opt-level.
    #[arg(long)]
    pub pipeline: Option<String>,

    /// What to emit.
    #[arg(long, value_enum, default_value = "asm")]
    pub emit: OutputKind,

    /// Output file; defaults to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose logging of pipeline and lowering decisions.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CompilerInvocation {
    /// Runs every phase in order, checking `canceled` for a `true` value
    /// before starting each one (§5 "Cancellation": "a cooperative
    /// cancellation flag... the caller can set between phases").
    pub fn run(&self, canceled: &std::sync::atomic::AtomicBool) -> Result<Vec<u8>, InvocationError> {
        use std::sync::atomic::Ordering;

        let check = |canceled: &std::sync::atomic::AtomicBool| -> Result<(), InvocationError> {
            if canceled.load(Ordering::SeqCst) {
                return Err(InvocationError::Canceled);
            }
            Ok(())
        };

        check(canceled)?;
        let src = std::fs::read_to_string(&self.input).map_err(|source| InvocationError::Io { path: self.input.clone(), source })?;
        log::debug!("read {} bytes from {}", src.len(), self.input.display());

        let file_name = self.input.to_string_lossy().into_owned();
        let (cx, mut module) = crate::ir::parser::parse_module(&src, &file_name).map_err(|diags| self.report_parse_errors(diags, &src, &file_name))?;
        let mut cx = cx;
        log::debug!("parsed {} functions", module.function_ids().count());

        check(canceled)?;
        let pipeline = self.build_pipeline()?;
        log::debug!("running {} pipeline step(s) to fixed point", pipeline.len());
        pipeline.run_to_fixpoint(&mut cx, &mut module, 32);

        check(canceled)?;
        match self.emit {
            OutputKind::Ir => Ok(crate::ir::printer::print_module(&module, &cx).into_bytes()),
            OutputKind::Mir => {
                let target = TargetInfo::default();
                let mir = crate::isel::lower_module(&cx, &module, &target);
                Ok(crate::mir::printer::print_module(&mir).into_bytes())
            }
            OutputKind::Asm => self.run_backend(&cx, &module, canceled),
        }
    }

    fn build_pipeline(&self) -> Result<crate::pass::Pipeline, InvocationError> {
        match (&self.pipeline, self.opt_level) {
            (Some(_), level) if level != 0 => Err(InvocationError::ConflictingPipelineSpec),
            (Some(spec), _) => Ok(crate::pass::parse_pipeline(spec)?),
            (None, level) => Ok(crate::pass::pipeline_for_opt_level(level)),
        }
    }

    /// Runs ISel -> SSA destruction -> regalloc -> assembly emission over
    /// every non-foreign function, then serializes the linked stream as a
    /// flat byte buffer followed by a human-readable symbol table (§4.11:
    /// "writes the resulting byte stream plus a sidecar symbol-table
    /// listing").
    fn run_backend(&self, cx: &crate::ir::context::Context, module: &Module, canceled: &std::sync::atomic::AtomicBool) -> Result<Vec<u8>, InvocationError> {
        use std::sync::atomic::Ordering;

        let target = TargetInfo::default();
        let mut mir = crate::isel::lower_module(cx, module, &target);
        log::debug!("lowered to MIR");

        for id in module.function_ids().collect::<Vec<_>>() {
            if canceled.load(Ordering::SeqCst) {
                return Err(InvocationError::Canceled);
            }
            let mf = mir.function_mut(id);
            if mf.is_foreign {
                continue;
            }
            crate::ssadestruct::destroy_ssa(mf);
            crate::regalloc::allocate_registers(mf);
        }
        log::debug!("destroyed SSA and allocated registers");

        if canceled.load(Ordering::SeqCst) {
            return Err(InvocationError::Canceled);
        }
        let stream = crate::asm::assemble(&mir, module);
        log::debug!("assembled {} byte(s), {} unresolved reference(s)", stream.bytes.len(), stream.unresolved.len());

        let mut out = stream.bytes.clone();
        out.push(b'\n');
        out.extend_from_slice(format_symbol_table(&stream).as_bytes());
        Ok(out)
    }

    fn report_parse_errors(&self, diags: DiagnosticEngine, src: &str, file_name: &str) -> InvocationError {
        let mut source_manager = crate::common::source::SourceManager::new();
        source_manager.add_file(file_name.to_string(), src.to_string());
        let count = diags.error_count();
        diags.print_all(&source_manager);
        InvocationError::Parse(count, self.input.clone())
    }
}

fn format_symbol_table(stream: &crate::asm::AssemblyStream) -> String {
    let mut entries: Vec<(&String, &u32)> = stream.symbols.iter().collect();
    entries.sort_by_key(|(_, off)| **off);
    let mut out = String::from("# symbol table\n");
    for (name, offset) in entries {
        out.push_str(&format!("{offset:08x} {name}\n"));
    }
    if !stream.unresolved.is_empty() {
        out.push_str("# unresolved references\n");
        for reference in &stream.unresolved {
            out.push_str(&format!("{:08x} {}\n", reference.offset, reference.symbol));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn invocation(input: PathBuf, emit: OutputKind) -> CompilerInvocation {
        CompilerInvocation { input, opt_level: 0, pipeline: None, emit, output: None, verbose: false }
    }

    #[test]
    fn a_conflicting_opt_level_and_pipeline_is_rejected_before_any_io() {
        let inv = CompilerInvocation { input: PathBuf::from("/nonexistent.scir"), opt_level: 2, pipeline: Some("dce".into()), emit: OutputKind::Ir, output: None, verbose: false };
        let err = inv.build_pipeline().unwrap_err();
        assert!(matches!(err, InvocationError::ConflictingPipelineSpec));
    }

    #[test]
    fn a_missing_input_file_is_reported_as_io_error() {
        let inv = invocation(PathBuf::from("/nonexistent/path/to/nothing.scir"), OutputKind::Ir);
        let canceled = AtomicBool::new(false);
        let err = inv.run(&canceled).unwrap_err();
        assert!(matches!(err, InvocationError::Io { .. }));
    }

    #[test]
    fn a_preset_cancellation_flag_short_circuits_before_reading_the_file() {
        let inv = invocation(PathBuf::from("/nonexistent/path/to/nothing.scir"), OutputKind::Ir);
        let canceled = AtomicBool::new(true);
        let err = inv.run(&canceled).unwrap_err();
        assert!(matches!(err, InvocationError::Canceled));
    }
}
