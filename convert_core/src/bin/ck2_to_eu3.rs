use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use convert_core::{init_logging, run, ConvertError, ConverterConfig, EXIT_FATAL};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Convert a finished Crusader Kings II save into a Europa Universalis III start",
    long_about = None
)]
struct Cli {
    /// CK2 save to convert. Defaults to the configured input file.
    save: Option<PathBuf>,
    /// Converter configuration (JSON). Falls back to CK2_EU3_CONFIG_PATH,
    /// then ./configuration.json, then builtin defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Where to write the EU3 save.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Print a parsed game or mapping file as JSON and exit.
    #[arg(long, value_name = "FILE")]
    dump_tree: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(path) = cli.dump_tree.as_deref() {
        return dump_tree(path);
    }

    let mut config = match ConverterConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(ConvertError::from(err).exit_code());
        }
    };
    let defaulted_save = cli.save.is_none();
    if let Some(save) = cli.save {
        config.input_file = save;
    }
    if let Some(output) = cli.output {
        config.output_file = output;
    }

    if let Err(err) = init_logging(&config.log_file) {
        eprintln!("error: could not open log file {:?}: {err}", config.log_file);
        return ExitCode::from(EXIT_FATAL);
    }
    if defaulted_save {
        info!(
            target: "ck2_to_eu3::cli",
            save = %config.input_file.display(),
            "input.defaulted"
        );
    }

    match run(&config) {
        Ok(_) => {
            info!(
                target: "ck2_to_eu3::cli",
                output = %config.output_file.display(),
                "conversion.finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            let exit_code = err.exit_code();
            error!(
                target: "ck2_to_eu3::cli",
                error = %err,
                exit_code,
                "conversion.failed"
            );
            ExitCode::from(exit_code)
        }
    }
}

fn dump_tree(path: &Path) -> ExitCode {
    let tree = match save_runtime::parse_file(path) {
        Ok(tree) => tree,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    match tree.to_json_pretty() {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
