//! Live MJPEG stream.
//!
//! Each connected client drives its own loop: request a cycle from the
//! arbiter, annotate the frame, emit one multipart part, repeat. A failed
//! cycle drops that frame and the loop retries after a short pause. The loop
//! ends when the client disconnects, the server shuts down or the arbiter
//! stops.

use std::convert::Infallible;

use async_stream::stream;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::annotate;
use crate::arbiter::{ArbiterHandle, CycleKind};
use crate::config::StreamSettings;
use crate::error::CycleError;

pub const BOUNDARY: &str = "frame";

pub(super) async fn live_stream(State(state): State<AppState>) -> Response {
    let parts = multipart_frames(
        state.arbiter.clone(),
        state.stream.clone(),
        state.cancel.clone(),
    );
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

/// One multipart part carrying a JPEG image.
pub fn encode_part(sequence: u64, jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 128);
    payload.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    payload.extend_from_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
    payload.extend_from_slice(format!("X-Cycle: {sequence}\r\n\r\n").as_bytes());
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Endless stream of annotated frames, ending on cancellation or when the
/// arbiter is gone. Dropping the stream abandons any queued cycle.
pub fn multipart_frames(
    arbiter: ArbiterHandle,
    settings: StreamSettings,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let kind = if settings.detect {
        CycleKind::Full
    } else {
        CycleKind::CaptureOnly
    };

    stream! {
        log::debug!("stream: client attached");
        loop {
            let cycle = tokio::select! {
                _ = cancel.cancelled() => break,
                cycle = arbiter.run_cycle(kind) => cycle,
            };

            let part = match cycle {
                Ok(cycle) => {
                    let quality = settings.jpeg_quality;
                    let sequence = cycle.sequence;
                    let encoded = tokio::task::spawn_blocking(move || {
                        annotate::annotate(&cycle.frame, &cycle.detections, quality)
                    })
                    .await;
                    match encoded {
                        Ok(Ok(jpeg)) => Some(encode_part(sequence, &jpeg)),
                        Ok(Err(err)) => {
                            log::warn!("stream: dropping cycle {}: {:#}", sequence, err);
                            None
                        }
                        Err(err) => {
                            log::warn!("stream: annotate task failed: {}", err);
                            None
                        }
                    }
                }
                Err(CycleError::Unavailable) => {
                    log::info!("stream: capture arbiter stopped, closing stream");
                    break;
                }
                Err(err) => {
                    log::warn!("stream: dropping frame: {}", err);
                    None
                }
            };

            match part {
                Some(bytes) => yield Ok(bytes),
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(settings.retry_delay) => {}
                    }
                }
            }
        }
        log::debug!("stream: client detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::{CaptureArbiter, Devices};
    use crate::capture::SyntheticSource;
    use crate::config::CameraSettings;
    use crate::detect::StubBackend;
    use futures_util::{pin_mut, StreamExt};

    fn start_synthetic() -> CaptureArbiter {
        CaptureArbiter::start(|| {
            let camera = CameraSettings {
                device: "stub://stream-test".to_string(),
                width: 64,
                height: 48,
                ..CameraSettings::default()
            };
            Ok(Devices {
                source: Box::new(SyntheticSource::new(camera)),
                detector: Box::new(StubBackend::new()),
            })
        })
        .unwrap()
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_follow_cycle_order_until_cancelled() {
        let arbiter = start_synthetic();
        let cancel = CancellationToken::new();
        let parts = multipart_frames(arbiter.handle(), StreamSettings::default(), cancel.clone());
        pin_mut!(parts);

        for expected in 1..=3u64 {
            let part = parts.next().await.unwrap().unwrap();
            assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
            assert!(contains(&part, &format!("X-Cycle: {expected}\r\n")));
            assert!(part.ends_with(b"\r\n"));
        }

        cancel.cancel();
        assert!(parts.next().await.is_none());

        tokio::task::spawn_blocking(move || arbiter.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stream_ends_once_the_arbiter_stops() {
        let arbiter = start_synthetic();
        let settings = StreamSettings {
            detect: false,
            ..StreamSettings::default()
        };
        let parts = multipart_frames(arbiter.handle(), settings, CancellationToken::new());
        pin_mut!(parts);

        assert!(parts.next().await.unwrap().is_ok());
        tokio::task::spawn_blocking(move || arbiter.shutdown())
            .await
            .unwrap();
        assert!(parts.next().await.is_none());
    }

    #[test]
    fn part_layout() {
        let part = encode_part(42, b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\nX-Cycle: 42\r\n\r\nJPEG\r\n"
        );
    }
}
