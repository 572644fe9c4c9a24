//! Detection server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use cam_source::{playback::VideoFeed, sensors::LinuxCamera};
use clap::Parser;
use detect_server::{
    detection_loop::spawn_detection_loop,
    endpoints::{router, PageSources},
    meter::spawn_meter_logger,
    nn::{Detector, ModelSource, SsdModel, SsdParams, DEFAULT_MODEL_URL},
    overlay::{load_font, OverlayCanvas},
    session::{Session, SessionConfig, StartupMode},
    status::StatusBoard,
    Error,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the page on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Local ONNX model file, takes precedence over `--model-url`
    #[clap(long)]
    model_path: Option<PathBuf>,

    /// URL to download the ONNX model from if it is not cached yet
    #[clap(long, default_value = DEFAULT_MODEL_URL)]
    model_url: String,

    /// TrueType font for labels
    #[clap(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf")]
    font_path: PathBuf,

    /// Delay between two detection cycles in milliseconds
    #[clap(long, default_value_t = 500)]
    period_ms: u64,

    /// Minimum confidence of reported detections
    #[clap(long, default_value_t = 0.5)]
    min_score: f32,

    /// Maximum number of detections per frame
    #[clap(long, default_value_t = 20)]
    max_detections: usize,

    /// Keep a list of object classes detected since startup
    #[clap(long)]
    with_history_list: bool,

    /// Sequencing of camera start and model loading
    #[clap(long, value_enum, default_value_t = StartupMode::PlayThenLoad)]
    startup: StartupMode,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            period: Duration::from_millis(self.period_ms),
            with_history_list: self.with_history_list,
            startup: self.startup,
        }
    }

    fn model_source(&self) -> ModelSource {
        match &self.model_path {
            Some(path) => ModelSource::Path(path.clone()),
            None => ModelSource::Url(self.model_url.clone()),
        }
    }

    fn ssd_params(&self) -> SsdParams {
        SsdParams {
            min_score: self.min_score,
            max_detections: self.max_detections,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let status = Arc::new(StatusBoard::new());
    let feed = VideoFeed::new();

    let font = match load_font(&args.font_path) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!(
                "Could not load font {}, labels will not be drawn: {err}",
                args.font_path.display()
            );
            None
        }
    };
    let canvas = OverlayCanvas::new(font);

    let sources = Arc::new(PageSources {
        status: Arc::clone(&status),
        feed: feed.clone(),
        overlay: canvas.subscribe(),
        with_history_list: args.with_history_list,
    });

    spawn_meter_logger();

    // Serve the page right away so that startup errors become visible
    let addr: SocketAddr = args.server_address.parse()?;
    let server = tokio::spawn(async move {
        log::info!("Serving on http://{addr}");
        axum::Server::bind(&addr)
            .serve(router(sources).into_make_service())
            .await
    });

    let mut session = Session::new(args.session_config(), Box::new(canvas), status);
    let device = args.device.clone();
    let model_source = args.model_source();
    let params = args.ssd_params();

    let started = session
        .start(
            || {
                let camera = LinuxCamera::open(&device)?;
                feed.play(Box::new(camera))?;
                Ok::<_, Error>(feed.clone())
            },
            || async move {
                let model = SsdModel::load(model_source, params).await?;
                Ok::<_, Error>(Box::new(model) as Box<dyn Detector>)
            },
        )
        .await;

    let detection_loop = match started {
        Ok(()) => Some(spawn_detection_loop(session)),
        Err(failure) => {
            log::error!("Startup failed, serving the error page only: {failure}");
            None
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        res = server => res??,
    }

    if let Some(detection_loop) = detection_loop {
        detection_loop.stop_and_join().await?;
    }
    log::info!("Shutting down");

    Ok(())
}
