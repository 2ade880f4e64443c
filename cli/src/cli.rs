use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceLang {
    Asm,
    Txscript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetLang {
    Asm,
    Hex,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Source language
    #[arg(long = "from", value_enum, default_value_t = SourceLang::Txscript)]
    pub source_lang: SourceLang,

    /// Target language
    #[arg(long = "to", value_enum, default_value_t = TargetLang::Asm)]
    pub target_lang: TargetLang,

    /// Disable the peephole optimizer
    #[arg(long)]
    pub no_optimize: bool,

    /// Disable inline-time optimization
    #[arg(long)]
    pub no_inline: bool,

    /// Maximum optimizer passes
    #[arg(long, default_value_t = bitcoin_script_compiler::MAX_PASSES)]
    pub max_passes: usize,

    /// Read the source from a file
    #[arg(long, short)]
    pub file: Option<PathBuf>,

    /// Source text
    #[arg(required_unless_present = "file")]
    pub source: Option<String>,
}
