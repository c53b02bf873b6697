//! The compile pipeline: open the input, run the parser (which drives
//! code generation), write the output.

use std::fs;
use std::io::{BufWriter, Write};

use clap::Parser as ClapParser;

use crate::backend::emit::Emitter;
use crate::common::error::{CResult, Category, Diagnostic, Warnings};
use crate::driver::cli::Cli;
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;

/// Compiles one preprocessed translation unit to assembly text.
/// This is the whole compiler behind the CLI; tests drive it directly.
pub fn compile(source: Vec<u8>, filename: &str, cli: &Cli) -> CResult<String> {
    let options = cli.options();
    let mut warnings = Warnings::new(cli.warning_config());
    let mut emitter = Emitter::new(options.debug_info);

    let mut lexer = Lexer::new(source, filename)?;
    if options.dump_tokens {
        lexer.dump_tokens()?;
        return Ok(String::new());
    }

    let mut parser = Parser::new(lexer, &mut warnings, &mut emitter, &options)?;
    parser.parse_translation_unit()?;
    log::debug!(
        "compiled `{}`: {} warnings",
        filename,
        warnings.count()
    );

    Ok(emitter.text())
}

/// Runs the compiler as the `vmcc` binary would. Returns the process
/// exit code.
pub fn run<I: IntoIterator<Item = String>>(args: I) -> i32 {
    // GCC spells the dialect flag `-std=`; clap wants two dashes.
    let args: Vec<String> = args
        .into_iter()
        .map(|arg| {
            if arg.starts_with("-std=") {
                format!("--std={}", &arg[5..])
            } else {
                arg
            }
        })
        .collect();
    let cli = Cli::parse_from(args);

    match run_cli(&cli) {
        Ok(()) => 0,
        Err(diag) => {
            eprintln!("{}", diag);
            1
        }
    }
}

fn run_cli(cli: &Cli) -> CResult<()> {
    let filename = cli.input.display().to_string();
    let source = fs::read(&cli.input).map_err(|e| {
        Box::new(Diagnostic::new(
            Category::Lex,
            format!("failed to open input file `{}`: {}", filename, e),
        ))
    })?;

    let text = compile(source, &filename, cli)?;
    if cli.options().dump_tokens {
        return Ok(());
    }

    let output = cli.output_path();
    let file = fs::File::create(&output).map_err(|e| {
        Box::new(Diagnostic::new(
            Category::Internal,
            format!("failed to open output file `{}`: {}", output.display(), e),
        ))
    })?;
    let mut writer = BufWriter::new(file);
    writer.write_all(text.as_bytes()).map_err(|e| {
        Box::new(Diagnostic::new(
            Category::Internal,
            format!("failed to write output file `{}`: {}", output.display(), e),
        ))
    })?;
    Ok(())
}
