//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use bytes::Bytes;
use cam_source::playback::{SharedFrame, VideoFeed};
use futures::StreamExt;
use image::RgbaImage;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::{meter::METER, overlay::composite, status::StatusBoard, Error};

/// Everything the page shows.
pub struct PageSources {
    pub status: Arc<StatusBoard>,
    pub feed: VideoFeed,
    pub overlay: watch::Receiver<Arc<RgbaImage>>,
    pub with_history_list: bool,
}

/// Build the router serving the page and its data.
pub fn router(sources: Arc<PageSources>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(annotated_stream))
        .route("/objects", get(seen_objects))
        .route("/detections", get(latest_detections))
        .route("/status", get(error_message))
        .layer(Extension(sources))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn index(Extension(sources): Extension<Arc<PageSources>>) -> Html<String> {
    let objects_section = if sources.with_history_list {
        OBJECTS_SECTION
    } else {
        ""
    };
    Html(INDEX_PAGE.replace("{objects_section}", objects_section))
}

/// Video frames with the latest overlay, as multipart JPEG stream.
pub async fn annotated_stream(Extension(sources): Extension<Arc<PageSources>>) -> Response {
    log::info!("Annotated stream requested");

    let overlay = sources.overlay.clone();
    let stream = WatchStream::new(sources.feed.subscribe()).filter_map(move |frame| {
        let overlay = Arc::clone(&overlay.borrow());
        async move {
            let frame = frame?;
            match encode_annotated(&frame, &overlay) {
                Ok(item) => {
                    METER.tick_streamed();
                    Some(Ok::<_, Error>(item))
                }
                Err(err) => {
                    log::warn!("Failed to encode annotated frame: {err}");
                    None
                }
            }
        }
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body).into_response()
}

pub async fn seen_objects(Extension(sources): Extension<Arc<PageSources>>) -> Response {
    if !sources.with_history_list {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(sources.status.objects().as_ref().clone()).into_response()
}

pub async fn latest_detections(Extension(sources): Extension<Arc<PageSources>>) -> Response {
    Json(sources.status.detections().as_ref().clone()).into_response()
}

/// Content of the error region, empty if there is none.
pub async fn error_message(Extension(sources): Extension<Arc<PageSources>>) -> String {
    sources.status.error_text().unwrap_or_default()
}

fn encode_annotated(frame: &SharedFrame, overlay: &RgbaImage) -> Result<Bytes, Error> {
    let annotated = composite(frame, overlay);
    let jpeg = turbojpeg::compress_image(&annotated, 90, turbojpeg::Subsamp::Sub2x2)?;
    Ok(as_jpeg_stream_item(&jpeg))
}

/// Frame a JPEG image as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

const OBJECTS_SECTION: &str = r#"
    <div id="detected-objects">
        <h2>Detected objects</h2>
        <ul id="object-list"></ul>
    </div>"#;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Real-time object detection</title>
    <style>
        body { font-family: Arial, sans-serif; display: flex; flex-direction: column; align-items: center; }
        #video { border: 2px solid #333; border-radius: 8px; }
        #detected-objects { width: 100%; max-width: 640px; }
        #object-list { list-style-type: none; padding: 0; }
        #error-message { color: red; margin-top: 10px; }
    </style>
</head>
<body>
    <h1>Real-time object detection</h1>
    <img id="video" src="./stream" width="640" height="480">
    {objects_section}
    <div id="error-message"></div>
    <script>
        async function refresh() {
            const status = await fetch('./status');
            document.getElementById('error-message').textContent = await status.text();

            const list = document.getElementById('object-list');
            if (list) {
                const objects = await (await fetch('./objects')).json();
                list.innerHTML = '';
                objects.forEach(({ label, first_seen }) => {
                    const li = document.createElement('li');
                    li.textContent = `${label} - first detected at ${first_seen}`;
                    list.appendChild(li);
                });
            }
        }
        setInterval(refresh, 1000);
        refresh();
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod test {

    use axum::body::HttpBody;
    use common::detection::{BBox, Detection};

    use super::*;
    use crate::registry::SeenObject;

    async fn body_text(response: Response) -> Result<String, Error> {
        let mut body = response.into_body();
        let mut text = Vec::new();
        while let Some(chunk) = body.data().await {
            text.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8(text)?)
    }

    fn sources(with_history_list: bool) -> Arc<PageSources> {
        let (_tx, overlay) = watch::channel(Arc::new(RgbaImage::new(640, 480)));
        Arc::new(PageSources {
            status: Arc::new(StatusBoard::new()),
            feed: VideoFeed::new(),
            overlay,
            with_history_list,
        })
    }

    #[test]
    fn stream_items_are_multipart_framed() {
        let item = as_jpeg_stream_item(&[0xff, 0xd8]);
        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(item.ends_with(b"\xff\xd8\r\n\r\n"));
    }

    #[tokio::test]
    async fn index_shows_object_list_only_when_enabled() {
        let Html(with_list) = index(Extension(sources(true))).await;
        let Html(without_list) = index(Extension(sources(false))).await;

        assert!(with_list.contains(r#"id="object-list""#));
        assert!(!without_list.contains(r#"id="object-list""#));
        assert!(without_list.contains(r#"id="error-message""#));
    }

    #[tokio::test]
    async fn error_message_reflects_status_board() {
        let sources = sources(false);
        assert_eq!(error_message(Extension(Arc::clone(&sources))).await, "");

        sources.status.set_error("Error loading the object detection model.");
        assert_eq!(
            error_message(Extension(sources)).await,
            "Error loading the object detection model."
        );
    }

    #[tokio::test]
    async fn objects_are_not_found_when_history_is_disabled() {
        let response = seen_objects(Extension(sources(false))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn objects_list_labels_with_first_seen_time() -> Result<(), Error> {
        let sources = sources(true);
        let response = seen_objects(Extension(Arc::clone(&sources))).await;
        assert_eq!(body_text(response).await?, "[]");

        sources.status.publish_objects(vec![
            SeenObject {
                label: "person".into(),
                first_seen: "09:30:00".into(),
            },
            SeenObject {
                label: "cup".into(),
                first_seen: "09:30:04".into(),
            },
        ]);
        let response = seen_objects(Extension(sources)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await?,
            r#"[{"label":"person","first_seen":"09:30:00"},{"label":"cup","first_seen":"09:30:04"}]"#
        );
        Ok(())
    }

    #[tokio::test]
    async fn detections_report_the_latest_cycle() -> Result<(), Error> {
        let sources = sources(false);
        sources.status.publish_detections(vec![Detection::new(
            BBox::new(300.0, 200.0, 40.0, 60.0),
            "cup",
            0.5,
        )]);

        let text = body_text(latest_detections(Extension(sources)).await).await?;
        assert!(text.starts_with('['));
        assert!(text.contains(r#""class":"cup""#));
        assert!(text.contains(r#""score":0.5"#));
        assert!(text.contains(r#""width":40.0"#));
        Ok(())
    }
}
