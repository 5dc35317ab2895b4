use crate::app::AppState;
use crate::error::Result;
use crate::{router, walker, watch};
use clap::{builder::ValueHint, Parser, Subcommand};
use serve::csp::{self, CspSources, CspTokens};
use serve::manifest;
use serve::render::RenderParams;
use serve::resolver::ArtifactResolver;
use serve::state::EnvState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main(flavor = "multi_thread")]
#[tracing::instrument(skip_all)]
pub async fn start() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(cmd) => do_serve(cmd).await,
        Commands::Compress(cmd) => do_compress(cmd),
    };

    result.map_or_else(
        |e| {
            error!("{e}");
            ExitCode::FAILURE
        },
        |_| ExitCode::SUCCESS,
    )
}

#[tracing::instrument(skip_all)]
async fn do_serve(cmd: ServeCmd) -> Result<()> {
    let resolver = Arc::new(ArtifactResolver::new(cmd.root.clone(), cmd.cache_size));
    info!(
        root = %cmd.root.display(),
        locales = ?resolver.index_dirs(),
        "bundle scanned"
    );

    let env = EnvState::new(manifest::load_app_env(&cmd.root));
    let dotenv_path = cmd.dotenv_file();
    info!(path = %dotenv_path.display(), "watching environment file");
    let _watcher = watch::DotenvWatcher::spawn(dotenv_path, env.clone())?;

    let state = AppState {
        resolver,
        env,
        params: Arc::new(cmd.render_params()),
        default_locale: cmd.default_locale.filter(|locale| !locale.is_empty()),
    };
    let routes = router::build(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cmd.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, routes)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tracing::instrument(skip_all)]
fn do_compress(cmd: CompressCmd) -> Result<()> {
    let summary = walker::compress_bundle(&cmd.root, cmd.compression_threshold);
    info!(
        compressed = summary.compressed,
        skipped_small = summary.skipped_small,
        skipped_binary = summary.skipped_binary,
        failed = summary.failed,
        "bundle pre-compression finished"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to install shutdown signal handler");
        return;
    }
    info!("shutdown signal received");
}

#[derive(Parser, Debug)]
#[command(name = "spa-host", version, about = "Adaptive host for single-page application bundles")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a bundle directory over HTTP
    Serve(ServeCmd),
    /// Write precompressed siblings next to compressible bundle files
    Compress(CompressCmd),
}

#[derive(Parser, Debug)]
pub struct ServeCmd {
    /// Bundle root directory (or set SPAHOST_ROOT)
    #[arg(
        value_name = "DIR",
        env = "SPAHOST_ROOT",
        default_value = ".",
        value_hint = ValueHint::DirPath,
        value_parser = dir_must_exist
    )]
    pub root: PathBuf,

    /// Listen port
    #[arg(long, env = "SPAHOST_PORT", default_value_t = 8080)]
    pub port: u16,

    /// max-age seconds for fingerprinted assets; 0 disables long-lived caching
    #[arg(long, env = "SPAHOST_CACHE_MAX_AGE", default_value_t = 31_536_000)]
    pub cache_max_age: u64,

    /// Resolution cache capacity in entries
    #[arg(long, env = "SPAHOST_CACHE_SIZE", default_value_t = 1024)]
    pub cache_size: usize,

    /// Minimum body size in bytes eligible for compression
    #[arg(long, env = "SPAHOST_COMPRESSION_THRESHOLD", default_value_t = 1024)]
    pub compression_threshold: u64,

    /// Content-Security-Policy template; empty disables the header
    #[arg(long, env = "SPAHOST_CSP_TEMPLATE", default_value = csp::DEFAULT_TEMPLATE)]
    pub csp_template: String,

    /// Additional default-src sources
    #[arg(long, env = "SPAHOST_CSP_DEFAULT_SRC", default_value = "")]
    pub csp_default_src: String,

    /// Additional connect-src sources
    #[arg(long, env = "SPAHOST_CSP_CONNECT_SRC", default_value = "")]
    pub csp_connect_src: String,

    /// Additional font-src sources
    #[arg(long, env = "SPAHOST_CSP_FONT_SRC", default_value = "")]
    pub csp_font_src: String,

    /// Additional img-src sources
    #[arg(long, env = "SPAHOST_CSP_IMG_SRC", default_value = "")]
    pub csp_img_src: String,

    /// Additional script-src sources
    #[arg(long, env = "SPAHOST_CSP_SCRIPT_SRC", default_value = "")]
    pub csp_script_src: String,

    /// Additional style-src sources
    #[arg(long, env = "SPAHOST_CSP_STYLE_SRC", default_value = "")]
    pub csp_style_src: String,

    /// X-Frame-Options value for HTML responses; empty disables the header
    #[arg(long, env = "SPAHOST_X_FRAME_OPTIONS", default_value = "DENY")]
    pub x_frame_options: String,

    /// Locale appended to every Accept-Language preference list
    #[arg(long, env = "SPAHOST_DEFAULT_LOCALE")]
    pub default_locale: Option<String>,

    /// Watched environment file (defaults to ../config/.env next to the
    /// root when present, else <root>/.env)
    #[arg(long, env = "SPAHOST_DOTENV_PATH", value_hint = ValueHint::FilePath)]
    pub dotenv_path: Option<PathBuf>,
}

impl ServeCmd {
    pub fn render_params(&self) -> RenderParams {
        RenderParams {
            compression_threshold: self.compression_threshold,
            cache_max_age: self.cache_max_age,
            csp_template: self.csp_template.clone(),
            csp_tokens: CspTokens::default(),
            csp_sources: CspSources {
                default_src: self.csp_default_src.clone(),
                connect_src: self.csp_connect_src.clone(),
                font_src: self.csp_font_src.clone(),
                img_src: self.csp_img_src.clone(),
                script_src: self.csp_script_src.clone(),
                style_src: self.csp_style_src.clone(),
            },
            x_frame_options: self.x_frame_options.clone(),
        }
    }

    /// The watched environment file: an explicit override wins, then a
    /// `config/.env` sibling of the root, then `.env` inside the root.
    pub fn dotenv_file(&self) -> PathBuf {
        if let Some(path) = &self.dotenv_path {
            return path.clone();
        }
        let sibling = self.root.join("..").join("config").join(".env");
        if sibling.is_file() {
            sibling
        } else {
            self.root.join(".env")
        }
    }
}

#[derive(Parser, Debug)]
pub struct CompressCmd {
    /// Bundle root directory (or set SPAHOST_ROOT)
    #[arg(
        value_name = "DIR",
        env = "SPAHOST_ROOT",
        default_value = ".",
        value_hint = ValueHint::DirPath,
        value_parser = dir_must_exist
    )]
    pub root: PathBuf,

    /// Files below this many bytes are left uncompressed
    #[arg(long, env = "SPAHOST_COMPRESSION_THRESHOLD", default_value_t = 1024)]
    pub compression_threshold: u64,
}

fn dir_must_exist(s: &str) -> std::result::Result<PathBuf, String> {
    let p = PathBuf::from(s);
    if !p.exists() {
        return Err(format!("Not found: {}", p.display()));
    }
    if !p.is_dir() {
        return Err(format!("Not a directory: {}", p.display()));
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_are_applied() {
        let cli = Cli::parse_from(["spa-host", "serve", "/tmp"]);
        let Commands::Serve(cmd) = cli.command else {
            panic!("expected the serve subcommand");
        };
        assert_eq!(cmd.port, 8080);
        assert_eq!(cmd.cache_max_age, 31_536_000);
        assert_eq!(cmd.cache_size, 1024);
        assert_eq!(cmd.compression_threshold, 1024);
        assert_eq!(cmd.x_frame_options, "DENY");
        assert_eq!(cmd.csp_template, csp::DEFAULT_TEMPLATE);
    }

    #[test]
    fn dotenv_override_wins() {
        let cli = Cli::parse_from([
            "spa-host",
            "serve",
            "/tmp",
            "--dotenv-path",
            "/etc/spa/env",
        ]);
        let Commands::Serve(cmd) = cli.command else {
            panic!("expected the serve subcommand");
        };
        assert_eq!(cmd.dotenv_file(), PathBuf::from("/etc/spa/env"));
    }

    #[test]
    fn root_must_be_a_directory() {
        let result = Cli::try_parse_from(["spa-host", "compress", "/definitely/not/here"]);
        assert!(result.is_err());
    }
}
