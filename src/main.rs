use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use streamdvr::container::FlvReader;
use streamdvr::{
    AsyncNotifier, Config, DvrError, DvrService, FrameKind, HookTable, HttpHooks, StreamRequest,
};

const USAGE: &str = "usage: streamdvr <config.toml> <input.flv> [app/stream]";

/// Replays an FLV file through the recorder as if it were published live.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("streamdvr=debug".parse()?))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(input)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let (app, stream) = match args.next() {
        Some(id) => match id.split_once('/') {
            Some((app, stream)) => (app.to_string(), stream.to_string()),
            None => ("live".to_string(), id),
        },
        None => ("live".to_string(), "replay".to_string()),
    };

    let config = Config::load_from(&config_path)?;
    tracing::info!("loaded {} vhost(s)", config.vhosts.len());

    let notifier = AsyncNotifier::new(HookTable::from_config(&config), Arc::new(HttpHooks::new()));
    notifier.start()?;
    let service = DvrService::new(config, notifier.clone());

    let request = StreamRequest::new(streamdvr::config::DEFAULT_VHOST, app, stream)
        .with_client(std::process::id().to_string(), "127.0.0.1");
    let input = PathBuf::from(input);

    let outcome = tokio::task::spawn_blocking(move || replay(&service, request, input)).await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("replay failed: {}", e),
        Err(e) => tracing::error!("replay task failed: {}", e),
    }

    notifier.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn replay(service: &DvrService, request: StreamRequest, input: PathBuf) -> Result<(), DvrError> {
    let mut reader = FlvReader::new(BufReader::new(File::open(&input)?))?;
    let mut dvr = service.create_dvr(request.clone())?;
    dvr.on_publish()?;

    let mut frames = 0u64;
    let mut bytes = 0u64;
    while let Some(tag) = reader.next_tag()? {
        let Some(frame) = tag.to_frame() else {
            continue;
        };
        bytes += frame.payload.len() as u64;
        let written = match frame.kind {
            FrameKind::Metadata => dvr.on_meta_data(&frame),
            FrameKind::Audio => dvr.on_audio(&frame),
            FrameKind::Video => dvr.on_video(&frame),
        };
        match written {
            Ok(()) => frames += 1,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(stream = %request, offset = tag.offset, error = %e, "skip frame");
            }
            Err(e) => return Err(e),
        }
    }

    dvr.on_unpublish();
    dvr.close()?;
    tracing::info!(stream = %request, frames, input = %input.display(), "replay done");
    service.notify_close(&request, 0, bytes)
}
