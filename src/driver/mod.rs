use std::{io::Write, path::PathBuf, time::Instant};

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use crate::{
    ir::{Builder, Context, IrError, Linkage, ModuleIndex},
    render::render_module,
};
use config::Config;

pub mod config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct DriverArgs {
    /// The name of the generated module.
    #[arg(short, long)]
    pub name: Option<String>,

    /// The source file name recorded in the module.
    #[arg(short, long)]
    pub source_name: Option<String>,

    /// Path to a Uranium.toml config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Where to write the textual dump. Defaults to stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the module as LLVM bitcode to this file.
    #[cfg(feature = "llvm")]
    #[arg(long)]
    pub emit_bitcode: Option<PathBuf>,
}

pub const DEFAULT_MODULE_NAME: &str = "main";

/// Builds a module holding an exported `void main()` whose only block returns.
pub fn build_entry_module(
    ctx: &mut Context,
    name: &str,
    source_name: Option<&str>,
) -> Result<ModuleIndex, IrError> {
    let module = ctx.create_module(name);
    if let Some(source_name) = source_name {
        ctx.set_source_name(module, source_name)?;
    }

    let void = ctx.void_type();
    let main_ty = ctx.function_type(void, &[], false)?;
    let main_fn = ctx.declare_function(module, "main", main_ty, Linkage::Exported)?;
    let entry = ctx.append_block(main_fn, Some("entry"))?;

    Builder::at_end(entry).build_return_void(ctx)?;

    Ok(module)
}

/// Runs the driver with already parsed arguments.
pub fn run(args: &DriverArgs) -> anyhow::Result<()> {
    let start_time = Instant::now();

    let config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let name = args
        .name
        .as_deref()
        .or(config.unit.name.as_deref())
        .unwrap_or(DEFAULT_MODULE_NAME);
    let source_name = args
        .source_name
        .as_deref()
        .or(config.unit.source_name.as_deref());

    let mut ctx = Context::new();
    let module = build_entry_module(&mut ctx, name, source_name)?;
    let text = render_module(&ctx, module, &config.render)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &text)?;
            tracing::debug!("wrote module dump to {:?}", path);
        }
        None => std::io::stdout().write_all(text.as_bytes())?,
    }

    emit_bitcode(&ctx, module, args)?;

    ctx.dispose();

    let elapsed = start_time.elapsed();
    tracing::debug!("Done in {:?}", elapsed);

    Ok(())
}

#[cfg(feature = "llvm")]
fn emit_bitcode(ctx: &Context, module: ModuleIndex, args: &DriverArgs) -> anyhow::Result<()> {
    if let Some(path) = &args.emit_bitcode {
        let llvm_module = crate::codegen::LlvmModule::lower(ctx, module)?;
        llvm_module.write_bitcode(path)?;
        tracing::debug!("wrote bitcode to {:?}", path);
    }
    Ok(())
}

#[cfg(not(feature = "llvm"))]
fn emit_bitcode(_ctx: &Context, _module: ModuleIndex, _args: &DriverArgs) -> anyhow::Result<()> {
    Ok(())
}

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = DriverArgs::parse();
    tracing::debug!("driver args: {:#?}", args);

    eprintln!("{}", "Generating IR...".bold());
    run(&args)?;
    eprintln!("{}", "Done!".green().bold());

    Ok(())
}
