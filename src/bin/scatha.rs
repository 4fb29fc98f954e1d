//! CLI entry point (§4.11, §6): parses [`scatha::invocation::CompilerInvocation`]
//! from the command line, runs it, and writes the result to the requested
//! output (stdout when `--output` is omitted). Uses `anyhow` for
//! `Display`-chained error reporting at the process boundary, keeping
//! argument collection (`clap` derive) separate from the error-printing
//! wrapper around `CompilerInvocation::run`.

use std::sync::atomic::AtomicBool;

use anyhow::Context as _;
use clap::Parser;
use scatha::invocation::CompilerInvocation;

fn main() -> anyhow::Result<()> {
    let invocation = CompilerInvocation::parse();
    scatha::common::logging::init(invocation.verbose);
    let canceled = AtomicBool::new(false);

    let bytes = invocation.run(&canceled).with_context(|| format!("compiling {}", invocation.input.display()))?;

    match &invocation.output {
        Some(path) => {
            std::fs::write(path, &bytes).with_context(|| format!("writing output to {}", path.display()))?;
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes).context("writing output to stdout")?;
        }
    }

    Ok(())
}
