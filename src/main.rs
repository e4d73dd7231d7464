// CLI driver: read source, lower it, then either dump the emitted ELF64
// image to disk or run the compiled program in-memory and report its
// result.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stackc::codegen::{Emitter, Mode};
use stackc::function::FunctionTable;
use stackc::lower::lower_program;
use stackc::reader::parse_program;
use stackc::runtime::{elf, run_in_memory};

#[derive(Parser)]
#[command(name = "stackc", about = "Compiler for a tiny statically-typed S-expression language")]
struct Cli {
    /// Source file to compile.
    input: PathBuf,

    /// Run the compiled program in-memory instead of writing an ELF executable.
    #[arg(long)]
    exec: bool,

    /// Print the lowered virtual instruction stream before emission.
    #[arg(long)]
    print_ir: bool,

    /// ELF output path.
    #[arg(short, long, default_value = "a.out")]
    output: PathBuf,

    /// Function alignment in bytes.
    #[arg(long, default_value_t = 16)]
    alignment: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(message) => {
            error!("{message}");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    let source = fs::read_to_string(&cli.input).map_err(|e| format!("reading {}: {e}", cli.input.display()))?;

    let tree = parse_program(&source).map_err(|e| e.to_string())?;
    info!(input = %cli.input.display(), "parsed");

    let table = lower_program(&tree).map_err(|e| e.to_string())?;
    info!(functions = table.functions.len(), "lowered");

    if cli.print_ir {
        print_ir(&table);
    }

    if cli.exec {
        let result = run_in_memory(&table, cli.alignment).map_err(|e| e.to_string())?;
        println!("{result}");
        return Ok(ExitCode::SUCCESS);
    }

    let emitted = Emitter::emit(&table, Mode::Elf, cli.alignment).map_err(|e| e.to_string())?;
    let image = elf::build(&emitted.code, emitted.entry_offset);
    fs::write(&cli.output, &image).map_err(|e| format!("writing {}: {e}", cli.output.display()))?;
    let mut perms = fs::metadata(&cli.output).map_err(|e| e.to_string())?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(&cli.output, perms).map_err(|e| e.to_string())?;
    info!(output = %cli.output.display(), bytes = image.len(), "wrote ELF executable");

    Ok(ExitCode::SUCCESS)
}

fn print_ir(table: &FunctionTable) {
    for (idx, func) in table.functions.iter().enumerate() {
        println!("function #{idx} {} ({})", func.name, func.signature);
        for instr in &func.instructions {
            println!("    {instr:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(input: PathBuf, exec: bool, output: PathBuf) -> Cli {
        Cli {
            input,
            exec,
            print_ir: false,
            output,
            alignment: 16,
        }
    }

    #[test]
    fn exec_mode_runs_the_compiled_program_and_prints_nothing_else_to_disk() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("main.lang");
        fs::write(&source, "(return (+ 2 3))").unwrap();

        assert!(run(cli(source, true, temp.path().join("unused.out"))).is_ok());
    }

    #[test]
    fn elf_mode_writes_an_executable_file() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("main.lang");
        let output = temp.path().join("prog");
        fs::write(&source, "(return 0)").unwrap();

        assert!(run(cli(source, false, output.clone())).is_ok());

        let bytes = fs::read(&output).unwrap();
        assert_eq!(&bytes[0..4], &[0x7F, 0x45, 0x4C, 0x46]);
        let mode = fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn compile_error_is_reported_and_nothing_is_written() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("main.lang");
        let output = temp.path().join("prog");
        fs::write(&source, "(break)").unwrap();

        assert!(run(cli(source, false, output.clone())).is_err());
        assert!(!output.exists());
    }
}
