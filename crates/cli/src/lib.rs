use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagemark_core::annotation::{Annotation, Color, Stroke};
use pagemark_core::config::AnnotatorConfig;
use pagemark_core::coords::{DocPoint, DocRect};
use pagemark_core::engine::DocumentEngine;
use pagemark_core::record::AnnotationRecord;
use pagemark_core::session::PageSession;
use pagemark_core::store::AnnotationStore;
use pagemark_core::text_layer::{SynthesisOutcome, TextLayerSynthesizer};
use pagemark_engine::{BurnWorker, LopdfEngine, TesseractOcr};
use pagemark_scheduler::RenderGate;
use pagemark_storage::FileStore;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pagemark")]
#[command(about = "Annotate PDFs and burn annotations into them")]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Directory of the local annotation store.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Read settings from this file instead of PAGEMARK_* variables.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Key for local annotations. Defaults to the file name.
    #[arg(long, global = true, value_name = "ID")]
    document_id: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document and annotation counts.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the reconciled annotation set.
    List {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Add a highlight. Coordinates are page points from the top-left corner.
    AddHighlight {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// x,y,width,height
        #[arg(long)]
        rect: String,
        #[arg(long, default_value = "")]
        text: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        opacity: Option<f32>,
    },
    /// Add a sticky note.
    AddNote {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// x,y
        #[arg(long)]
        at: String,
        #[arg(long)]
        text: String,
    },
    /// Add an ink stroke of at least two points.
    AddInk {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// x,y (repeat for each point)
        #[arg(long = "point", required = true)]
        points: Vec<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        width: Option<f32>,
    },
    /// Delete a local annotation or dismiss an embedded note.
    Erase {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Print the annotations embedded in the document's metadata.
    Embedded {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Burn the visible annotations into the document.
    Burn {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Destination; defaults to replacing FILE.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a page's text layer.
    TextLayer {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        /// Split the page into columns before ordering runs.
        #[arg(long)]
        columns: bool,
        /// Fall back to Tesseract for pages without native text.
        #[arg(long)]
        ocr: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    document_id: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
    embedded_count: usize,
    visible_count: usize,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct AnnotationOutput {
    #[serde(flatten)]
    record: AnnotationRecord,
    burned: bool,
}

impl From<&Annotation> for AnnotationOutput {
    fn from(annotation: &Annotation) -> Self {
        Self { record: AnnotationRecord::from(annotation), burned: annotation.burned }
    }
}

#[derive(Debug, Serialize)]
struct BurnOutput {
    output: String,
    burned: usize,
    embedded: usize,
    cleared_local: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let app = App::new(&cli)?;
    match &cli.command {
        Commands::Info { file } => app.info(file),
        Commands::List { file } => app.list(file),
        Commands::AddHighlight { file, page, rect, text, color, opacity } => {
            let rect = parse_rect(rect)?;
            let defaults = Stroke::highlight();
            let style = Stroke::new(
                parse_color(color.as_deref(), defaults.color)?,
                opacity.unwrap_or(defaults.opacity),
                defaults.stroke_width,
            );
            app.add(file, Annotation::highlight(*page, rect, text.trim(), style))
        }
        Commands::AddNote { file, page, at, text } => {
            if text.trim().is_empty() {
                anyhow::bail!("note text must not be empty");
            }
            app.add(file, Annotation::note(*page, parse_point(at)?, text.as_str()))
        }
        Commands::AddInk { file, page, points, color, width } => {
            let points = points.iter().map(|p| parse_point(p)).collect::<Result<Vec<_>>>()?;
            if points.len() < 2 {
                anyhow::bail!("an ink stroke needs at least 2 points");
            }
            let defaults = Stroke::ink();
            let style = Stroke::new(
                parse_color(color.as_deref(), defaults.color)?,
                defaults.opacity,
                width.unwrap_or(defaults.stroke_width),
            );
            app.add(file, Annotation::ink(*page, points, style))
        }
        Commands::Erase { file, id } => app.erase(file, id),
        Commands::Embedded { file } => app.embedded(file),
        Commands::Burn { file, output } => app.burn(file, output.as_deref()),
        Commands::TextLayer { file, page, scale, columns, ocr } => {
            app.text_layer(file, *page, *scale, *columns, *ocr)
        }
        Commands::Version => Ok(()),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    // A second init (tests calling `run` repeatedly) is harmless.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

struct App {
    config: AnnotatorConfig,
    store: Arc<dyn AnnotationStore>,
    document_id: Option<String>,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => AnnotatorConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => AnnotatorConfig::from_env().context("invalid PAGEMARK_* environment")?,
        };

        let store = match cli.data_dir.as_ref().or(config.data_dir.as_ref()) {
            Some(dir) => FileStore::open(dir),
            None => FileStore::from_default_project(),
        }
        .context("failed to open annotation store")?;
        debug!(root = %store.root().display(), "annotation store ready");

        Ok(Self { config, store: Arc::new(store), document_id: cli.document_id.clone() })
    }

    fn document_id(&self, file: &Path) -> String {
        if let Some(id) = &self.document_id {
            return id.clone();
        }
        file.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string())
    }

    fn open(&self, file: &Path) -> Result<(LopdfEngine, PageSession)> {
        ensure_pdf_exists(file)?;
        let engine = LopdfEngine::open_path(file).context("failed to open PDF")?;
        let session =
            PageSession::open_with_engine(self.document_id(file), &engine, self.store.clone(), &self.config)
                .context("failed to load annotations")?;
        Ok((engine, session))
    }

    fn info(&self, file: &Path) -> Result<()> {
        let (engine, session) = self.open(file)?;
        let first_page_size_pt = engine
            .page_size(1)
            .ok()
            .map(|size| PageSizeOutput { width: size.width, height: size.height });

        print_json(&InfoOutput {
            path: file.display().to_string(),
            document_id: session.document().clone(),
            page_count: engine.page_count(),
            first_page_size_pt,
            embedded_count: session.embedded().len(),
            visible_count: session.visible().len(),
        })
    }

    fn list(&self, file: &Path) -> Result<()> {
        let (_, session) = self.open(file)?;
        print_annotations(session.visible())
    }

    fn embedded(&self, file: &Path) -> Result<()> {
        let (_, session) = self.open(file)?;
        print_annotations(session.embedded())
    }

    fn add(&self, file: &Path, annotation: Annotation) -> Result<()> {
        let (_, mut session) = self.open(file)?;
        let stored = session.commit(annotation).context("failed to save annotation")?;
        print_json(&AnnotationOutput::from(&stored))
    }

    fn erase(&self, file: &Path, id: &str) -> Result<()> {
        let (engine, mut session) = self.open(file)?;
        let target = session
            .visible()
            .iter()
            .find(|annotation| annotation.id() == Some(id))
            .cloned()
            .with_context(|| format!("no annotation with id {id}"))?;

        let embedded_before = session.embedded().len();
        session.erase(&target).with_context(|| format!("failed to erase {id}"))?;

        // A dismissed embedded note only disappears once the metadata is rewritten.
        if session.embedded().len() < embedded_before {
            let worker = BurnWorker::spawn().context("failed to start burn worker")?;
            let bytes = worker
                .burn(engine.into_bytes(), session.embedded().to_vec())
                .context("failed to rewrite embedded annotations")?;
            worker.shutdown();
            write_atomically(file, &bytes)?;
            info!(%id, file = %file.display(), "embedded note removed from document metadata");
        }
        println!("{id}");
        Ok(())
    }

    fn burn(&self, file: &Path, output: Option<&Path>) -> Result<()> {
        let (engine, mut session) = self.open(file)?;
        let output = output.unwrap_or(file);
        let annotations = session.visible().to_vec();
        let burned = annotations.iter().filter(|a| a.is_burnable()).count();

        let worker = BurnWorker::spawn().context("failed to start burn worker")?;
        let bytes = worker.burn(engine.into_bytes(), annotations).context("burn failed")?;
        worker.shutdown();

        let keywords = LopdfEngine::open_bytes(bytes.clone())
            .context("burned document does not reopen")?
            .metadata_keywords();
        write_atomically(output, &bytes)?;

        let cleared_local = if self.document_id(output) == *session.document() {
            session.apply_burn(keywords.as_deref()).context("failed to clear burned records from store")?
        } else {
            0
        };

        print_json(&BurnOutput {
            output: output.display().to_string(),
            burned,
            embedded: session.embedded().len(),
            cleared_local,
        })
    }

    fn text_layer(&self, file: &Path, page: u32, scale: f32, columns: bool, ocr: bool) -> Result<()> {
        ensure_pdf_exists(file)?;
        let engine = LopdfEngine::open_path(file).context("failed to open PDF")?;
        let mut options = self.config.text_layer_options();
        if columns {
            options = options.with_column_detection(true);
        }

        let tesseract = TesseractOcr::new();
        let mut synthesizer = TextLayerSynthesizer::new(&engine, options);
        if ocr {
            synthesizer = synthesizer.with_ocr(&tesseract);
        }

        let gate = RenderGate::new();
        gate.set_visible(page, true);
        let ticket = gate.begin(page).context("page is not visible")?;
        let scale = self.config.clamp_scale(scale);

        match synthesizer.synthesize(&ticket, &gate, scale).context("failed to build text layer")? {
            SynthesisOutcome::Ready(layer) => print_json(&layer),
            SynthesisOutcome::Cancelled | SynthesisOutcome::Stale => {
                anyhow::bail!("text layer for page {page} was superseded")
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

fn print_annotations(annotations: &[Annotation]) -> Result<()> {
    let output: Vec<AnnotationOutput> = annotations.iter().map(AnnotationOutput::from).collect();
    print_json(&output)
}

/// Write through a temp file in the destination directory so a failure never
/// leaves a partial document behind.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn numbers(value: &str, expected: usize, what: &str) -> Result<Vec<f32>> {
    let parsed = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid {what}: {value}"))?;
    if parsed.len() != expected || parsed.iter().any(|n| !n.is_finite()) {
        anyhow::bail!("invalid {what}: {value} (expected {expected} comma-separated numbers)");
    }
    Ok(parsed)
}

fn parse_color(value: Option<&str>, fallback: Color) -> Result<Color> {
    match value {
        Some(hex) => Ok(Color::from_hex(hex)?),
        None => Ok(fallback),
    }
}

fn parse_rect(value: &str) -> Result<DocRect> {
    let n = numbers(value, 4, "rect")?;
    Ok(DocRect::new(n[0], n[1], n[2], n[3]))
}

fn parse_point(value: &str) -> Result<DocPoint> {
    let n = numbers(value, 2, "point")?;
    Ok(DocPoint::new(n[0], n[1]))
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rect_and_point() {
        assert_eq!(parse_rect("1, 2,3,4").unwrap(), DocRect::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(parse_point("5,6").unwrap(), DocPoint::new(5.0, 6.0));
    }

    #[test]
    fn test_parse_rejects_wrong_arity_and_nan() {
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_point("x,1").is_err());
        assert!(parse_point("NaN,1").is_err());
    }

    #[test]
    fn test_write_atomically_replaces_file() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("out.pdf");
        fs::write(&path, b"old").unwrap();

        write_atomically(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }
}
