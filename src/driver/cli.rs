//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::common::error::WarningConfig;
use crate::common::Options;

/// C compiler targeting the Onramp-style register virtual machine.
///
/// Consumes one preprocessed translation unit (`.i`) and emits textual
/// assembly for the accompanying assembler.
#[derive(Debug, Parser)]
#[command(name = "vmcc", version, about)]
pub struct Cli {
    /// Preprocessed C input file.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output assembly file.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Emit #line debug directives into the assembly.
    #[arg(short = 'g')]
    pub debug_info: bool,

    /// Optimization level; accepted for compatibility and ignored.
    #[arg(short = 'O', value_name = "LEVEL", default_value = "0", hide = true)]
    pub opt_level: String,

    /// Language dialect: c17, gnu17, c11, gnu11. A gnu dialect silences
    /// the GNU extension warnings.
    #[arg(long = "std", value_name = "DIALECT")]
    pub std: Option<String>,

    /// Warning control: -W<name>, -Wno-<name>, -Werror, -Werror=<name>.
    #[arg(short = 'W', value_name = "WARNING", action = clap::ArgAction::Append)]
    pub warnings: Vec<String>,

    /// Dump the token stream and exit.
    #[arg(long)]
    pub dump_tokens: bool,

    /// Print each function's tree as it is compiled.
    #[arg(long)]
    pub dump_ast: bool,
}

impl Cli {
    /// The output path: as given, or the input with an `.oo` extension.
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => {
                let mut path = self.input.clone();
                path.set_extension("oo");
                path
            }
        }
    }

    pub fn options(&self) -> Options {
        Options {
            debug_info: self.debug_info,
            dump_tokens: self.dump_tokens,
            dump_ast: self.dump_ast,
        }
    }

    /// Builds the warning configuration from `-std` and the `-W` flags,
    /// processed left to right.
    pub fn warning_config(&self) -> WarningConfig {
        let mut config = WarningConfig::new();
        if let Some(std) = &self.std {
            if std.starts_with("gnu") {
                config.set_gnu_dialect();
            }
        }
        for flag in &self.warnings {
            if !config.process_flag(flag) {
                // Unknown warnings are ignored, like GCC does.
                log::debug!("ignoring unknown warning flag -W{}", flag);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::WarningKind;

    #[test]
    fn minimal_invocation() {
        let cli = Cli::parse_from(["vmcc", "test.i"]);
        assert_eq!(cli.input, PathBuf::from("test.i"));
        assert_eq!(cli.output_path(), PathBuf::from("test.oo"));
        assert!(!cli.debug_info);
    }

    #[test]
    fn output_and_debug_flags() {
        let cli = Cli::parse_from(["vmcc", "-g", "-o", "out.os", "test.i"]);
        assert_eq!(cli.output_path(), PathBuf::from("out.os"));
        assert!(cli.debug_info);
    }

    #[test]
    fn warning_flags_accumulate() {
        let cli = Cli::parse_from(["vmcc", "-Werror", "-Wno-extra-keywords", "test.i"]);
        let config = cli.warning_config();
        assert!(config.werror_all);
        assert!(!config.is_enabled(WarningKind::ExtraKeywords));
    }

    #[test]
    fn gnu_dialect_silences_extensions() {
        let cli = Cli::parse_from(["vmcc", "--std", "gnu17", "test.i"]);
        let config = cli.warning_config();
        assert!(!config.is_enabled(WarningKind::StatementExpressions));
    }
}
