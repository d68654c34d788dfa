//! PDF Form Filler - command-line entry point

use clap::{Parser, Subcommand};
use pdf_form_filler::config::STORE_FILE_NAME;
use pdf_form_filler::{Error, FieldMap, FormPipeline, PipelineConfig};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pdf-form-filler", version, about = "Fill PDF form templates and render previews")]
struct Cli {
    /// Data directory (overrides PDF_FORM_FILLER_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the fillable fields of a PDF
    Fields { pdf: PathBuf },
    /// Register a PDF as a form template
    Scan {
        pdf: PathBuf,
        /// Display name (default: the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Fill a registered template
    Fill {
        template_id: u64,
        /// Field value, repeatable
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
        /// Leave fields not given with --set empty instead of asking
        #[arg(long)]
        no_prompt: bool,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List registered templates
    Templates,
    /// List filled forms, newest first
    Forms,
    /// Render page 1 of a PDF to PNG
    Preview { pdf: PathBuf, png: PathBuf },
    /// Delete a template with its filled forms
    DeleteTemplate { id: u64 },
    /// Delete a filled form
    DeleteForm { id: u64 },
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected FIELD=VALUE, got {:?}", raw))
}

/// Log the full error and reduce it to the user-facing message
fn report(err: Error) -> anyhow::Error {
    tracing::error!(error = %err, "Command failed");
    anyhow::anyhow!(err.client_message())
}

fn prompt(field: &str) -> anyhow::Result<String> {
    print!("{}: ", field);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.store_path = Some(dir.join(STORE_FILE_NAME));
        config.data_dir = dir;
    }

    // Initialize logging
    config.log.init_global()?;
    tracing::debug!(data_dir = %config.data_dir.display(), "Starting PDF Form Filler");

    let pipeline = FormPipeline::new(config)?;

    match cli.command {
        Command::Fields { pdf } => {
            let fields = pipeline.extract_fields(&pdf).map_err(report)?;
            if fields.is_empty() {
                println!("No form fields found in {}", pdf.display());
            }
            for field in fields {
                println!("{}", field);
            }
        }
        Command::Scan { pdf, name } => {
            let template = pipeline
                .register_template(&pdf, name.as_deref())
                .map_err(report)?;
            println!(
                "Registered template {} ({}) with {} fields:",
                template.id,
                template.name,
                template.fields.len()
            );
            for field in template.field_names() {
                println!("  {}", field);
            }
        }
        Command::Fill {
            template_id,
            set,
            no_prompt,
            timeout_secs,
        } => {
            let template = pipeline.template(template_id).map_err(report)?;
            let mut raw: FieldMap = set.into_iter().collect();
            if !no_prompt {
                println!("Filling '{}'", template.name);
                for field in template.field_names() {
                    if !raw.contains_key(field) {
                        let value = prompt(field)?;
                        raw.insert(field.to_string(), value);
                    }
                }
            }

            let record = match timeout_secs {
                Some(seconds) => pipeline
                    .submit_within(template_id, raw, Duration::from_secs(seconds))
                    .await
                    .map_err(report)?,
                None => {
                    let worker = pipeline.clone();
                    tokio::task::spawn_blocking(move || worker.submit(template_id, &raw))
                        .await?
                        .map_err(report)?
                }
            };

            println!("Filled form {}", record.id);
            println!("  PDF: {}", record.pdf_path.display());
            match &record.png_path {
                Some(png) => println!("  PNG: {}", png.display()),
                None => println!("  PNG: not available"),
            }
        }
        Command::Templates => {
            let templates = pipeline.templates();
            if templates.is_empty() {
                println!("No templates registered");
            }
            for template in templates {
                println!(
                    "{:>4}  {}  ({} fields, {})",
                    template.id,
                    template.name,
                    template.fields.len(),
                    template.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Forms => {
            let forms = pipeline.filled_forms();
            if forms.is_empty() {
                println!("No filled forms");
            }
            for form in forms {
                let template = pipeline
                    .template(form.template_id)
                    .map(|t| t.name)
                    .unwrap_or_else(|_| format!("template {}", form.template_id));
                println!(
                    "{:>4}  {}  {}  {}",
                    form.id,
                    template,
                    form.created_at.format("%Y-%m-%d %H:%M"),
                    form.pdf_path.display()
                );
            }
        }
        Command::Preview { pdf, png } => {
            let preview = pipeline.render_preview(&pdf, &png).map_err(report)?;
            println!(
                "Wrote {} ({}x{})",
                png.display(),
                preview.width,
                preview.height
            );
        }
        Command::DeleteTemplate { id } => {
            let template = pipeline.delete_template(id).map_err(report)?;
            println!("Deleted template {} ({})", template.id, template.name);
        }
        Command::DeleteForm { id } => {
            let form = pipeline.delete_filled_form(id).map_err(report)?;
            println!("Deleted filled form {}", form.id);
        }
    }

    Ok(())
}
