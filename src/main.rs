use ansi_term::Style;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qbasic::lang::{lex, parse, Diagnostic};
use qbasic::mach::{Image, Runtime, StdHost, TrapKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// QBasic / QuickBASIC 4.5 compiler and runtime.
#[derive(Parser)]
#[command(name = "qbasic", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a program (source or bytecode image)
    Run { file: PathBuf },
    /// Compile a program to a bytecode image
    Build {
        file: PathBuf,
        /// Output path; defaults to the source name with `.qbx`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report diagnostics without executing
    Check { file: PathBuf },
    /// Dump the token stream
    Tokenize { file: PathBuf },
    /// Dump the syntax tree
    Parse { file: PathBuf },
    /// Interactive session
    Repl,
}

const EXIT_DIAGNOSTICS: u8 = 1;
const EXIT_RUNTIME: u8 = 2;
const EXIT_INTERRUPT: u8 = 130;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupt.clone();
        let _ = ctrlc::set_handler(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
    }
    match dispatch(cli.command, interrupt) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", Style::new().bold().paint(format!("error: {:#}", err)));
            ExitCode::from(EXIT_DIAGNOSTICS)
        }
    }
}

fn dispatch(command: Commands, interrupt: Arc<AtomicBool>) -> Result<ExitCode> {
    match command {
        Commands::Run { file } => run(&file, interrupt),
        Commands::Build { file, output } => build(&file, output),
        Commands::Check { file } => check(&file),
        Commands::Tokenize { file } => tokenize(&file),
        Commands::Parse { file } => parse_dump(&file),
        Commands::Repl => {
            qbasic::repl::interactive(interrupt)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

fn report(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!(
            "{}",
            Style::new().bold().paint(format!("?{}", diagnostic))
        );
    }
}

fn load_image(file: &Path) -> Result<Option<Image>> {
    let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    if bytes.starts_with(&qbasic::mach::IMAGE_MAGIC) {
        let image = Image::read_bytes(&bytes).with_context(|| "loading bytecode image")?;
        return Ok(Some(image));
    }
    Ok(None)
}

fn run(file: &Path, interrupt: Arc<AtomicBool>) -> Result<ExitCode> {
    let image = match load_image(file)? {
        Some(image) => image,
        None => {
            let source = read_source(file)?;
            match qbasic::compile(&source) {
                Ok((image, warnings)) => {
                    report(&warnings);
                    image
                }
                Err(diagnostics) => {
                    report(&diagnostics);
                    return Ok(ExitCode::from(EXIT_DIAGNOSTICS));
                }
            }
        }
    };
    let mut runtime = Runtime::new();
    runtime.set_interrupt(interrupt);
    let mut host = StdHost;
    match runtime.run(&image, &mut host, 0) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(trap) if trap.kind == TrapKind::Interrupted => {
            eprintln!("{}", Style::new().bold().paint(format!("?{}", trap.kind)));
            Ok(ExitCode::from(EXIT_INTERRUPT))
        }
        Err(trap) => {
            eprintln!("{}", Style::new().bold().paint(format!("?{}", trap)));
            Ok(ExitCode::from(EXIT_RUNTIME))
        }
    }
}

fn build(file: &Path, output: Option<PathBuf>) -> Result<ExitCode> {
    let source = read_source(file)?;
    match qbasic::compile(&source) {
        Ok((image, warnings)) => {
            report(&warnings);
            let output = output.unwrap_or_else(|| file.with_extension("qbx"));
            fs::write(&output, image.write_bytes())
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Built: {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(diagnostics) => {
            report(&diagnostics);
            Ok(ExitCode::from(EXIT_DIAGNOSTICS))
        }
    }
}

fn check(file: &Path) -> Result<ExitCode> {
    let source = read_source(file)?;
    match qbasic::compile(&source) {
        Ok((_, warnings)) => {
            report(&warnings);
            Ok(ExitCode::SUCCESS)
        }
        Err(diagnostics) => {
            report(&diagnostics);
            Ok(ExitCode::from(EXIT_DIAGNOSTICS))
        }
    }
}

fn tokenize(file: &Path) -> Result<ExitCode> {
    let source = read_source(file)?;
    let (tokens, diagnostics) = lex(&source);
    for token in &tokens {
        println!("{}", token.describe());
    }
    report(&diagnostics);
    if diagnostics.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_DIAGNOSTICS))
    }
}

fn parse_dump(file: &Path) -> Result<ExitCode> {
    let source = read_source(file)?;
    let (tokens, mut diagnostics) = lex(&source);
    let (module, parse_diags) = parse(&tokens);
    diagnostics.extend(parse_diags);
    println!("{:#?}", module);
    report(&diagnostics);
    if diagnostics.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_DIAGNOSTICS))
    }
}
