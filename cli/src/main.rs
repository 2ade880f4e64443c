mod cli;

use self::cli::{Args, SourceLang, TargetLang};

use bitcoin_script_compiler::{asm, bytes, compile_asm, compile_txscript, CompileOptions};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let source = match &args.file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("{}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => args.source.clone().unwrap_or_default(),
    };

    let options = CompileOptions {
        optimize: !args.no_optimize,
        inline_optimize: !args.no_inline,
        max_passes: args.max_passes,
    };

    let result = match args.source_lang {
        SourceLang::Asm => compile_asm(&source, &options),
        SourceLang::Txscript => compile_txscript(&source, &options),
    };
    let instructions = match result {
        Ok(instructions) => instructions,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match args.target_lang {
        TargetLang::Asm => println!("{}", asm::emit(&instructions)),
        TargetLang::Hex => match bytes::serialize(&instructions) {
            Ok(bytes) => println!("{}", hex::encode(bytes)),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        },
    }

    ExitCode::SUCCESS
}
