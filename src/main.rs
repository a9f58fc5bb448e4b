//! learning-importer - Stellent learning module export to Markdown

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, info, warn};

use learning_importer::config::ImporterConfig;
use learning_importer::converter::MarkdownConverter;
use learning_importer::error::ConversionError;
use learning_importer::export::read_export;
use learning_importer::page::{Page, validate_con_code};

#[derive(Parser)]
#[command(name = "learning-importer")]
#[command(
    version,
    about = "Convert XML_FILE containing CON_CODE to a series of Markdown files in OUT_DIR",
    long_about = None
)]
#[command(after_help = "EXAMPLES:
    learning-importer export.xml CON123           Write pages to ./CON123
    learning-importer export.xml CON123 out       Write pages to ./out
    RUST_LOG=debug learning-importer export.xml CON123
                                                  Log every rewritten link")]
struct Cli {
    /// Stellent WCM XML export
    #[arg(value_name = "XML_FILE")]
    xml_file: PathBuf,

    /// Code of the learning module, e.g. CON123
    #[arg(value_name = "CON_CODE", value_parser = parse_con_code)]
    con_code: String,

    /// Output directory (default: ./CON_CODE)
    #[arg(value_name = "OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn parse_con_code(value: &str) -> Result<String, String> {
    validate_con_code(value)
        .map(|()| value.to_string())
        .map_err(|_| "CON_CODE must be in the format CON123.".to_string())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match import(&cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("error: {failed} pages could not be imported");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(u8::try_from(e.code()).unwrap_or(u8::MAX))
        }
    }
}

/// Import every page of the export, returning the number of failed pages
fn import(cli: &Cli) -> Result<usize, ConversionError> {
    let config = match cli.config {
        Some(ref path) => ImporterConfig::load(path)?,
        None => ImporterConfig::default(),
    };

    let out_dir = cli
        .out_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cli.con_code));
    ensure_out_dir(&out_dir)?;

    let bytes = fs::read(&cli.xml_file)?;
    let rows = read_export(&bytes)?;
    info!(
        "Extracting {} pages from {}",
        rows.len(),
        cli.xml_file.display()
    );

    let fields = config.row_fields();
    let options = config.conversion_options();
    debug!("{} legacy codes redirect to external URLs", options.redirects.len());
    let mut converter = MarkdownConverter::with_options(options);
    let mut failed = 0;

    for (index, row) in rows.iter().enumerate() {
        let result = Page::from_row(row, &fields, &cli.con_code, index + 1).and_then(|page| {
            let artifacts = page.write_to(&out_dir, &mut converter)?;
            info!(
                "Wrote page {} \"{}\" to {}",
                page.index(),
                page.title(),
                artifacts.markdown_path.display()
            );
            Ok(())
        });

        if let Err(e) = result {
            warn!("Skipping page {}: {}", index + 1, e);
            failed += 1;
        }
    }

    println!("Done!");

    let asset_path = out_dir.join(converter.resolver().asset_dir());
    print!(
        "{}",
        converter.assets().report(&asset_path.display().to_string())
    );

    Ok(failed)
}

fn ensure_out_dir(out_dir: &Path) -> Result<(), ConversionError> {
    if !out_dir.exists() {
        info!("Creating output directory {}.", out_dir.display());
        fs::create_dir_all(out_dir)?;
    }
    Ok(())
}
