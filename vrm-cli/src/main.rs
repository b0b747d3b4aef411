use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use vrm_compiler::{backend, compile_to_code, compile_to_program, vm};

#[derive(Parser)]
#[command(name = "vrm")]
#[command(about = "Compiler targeting a minimal accumulator register machine")]
struct Args {
    /// Path to the source file to compile
    file: PathBuf,

    /// Write the instruction listing here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump the validated program instead of generating code
    #[arg(long)]
    ast: bool,

    /// Execute the compiled program on the reference machine
    #[arg(long)]
    run: bool,

    /// Input values for --run, comma separated
    #[arg(long, value_delimiter = ',')]
    input: Vec<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("reading '{}'", args.file.display()))?;

    if args.ast {
        let program = compile_to_program(&source)
            .with_context(|| format!("compiling '{}'", args.file.display()))?;
        println!("{program:#?}");
        return Ok(());
    }

    let code = compile_to_code(&source)
        .with_context(|| format!("compiling '{}'", args.file.display()))?;

    if args.run {
        let output = vm::run(&code, &args.input).context("running the compiled program")?;
        for value in output {
            println!("{value}");
        }
        return Ok(());
    }

    let text = backend::to_text(&code);
    match &args.output {
        Some(path) => {
            fs::write(path, text + "\n")
                .with_context(|| format!("writing '{}'", path.display()))?;
        }
        None => println!("{text}"),
    }
    Ok(())
}
