use crate::errors::{DetectionError, ScanError};
use crate::models::config::DetectionConfig;
use crate::models::detection::{DetectionBox, DetectionOutcome, DetectionResult, ServerInfo};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that can locate a label in a frame
#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// One detection attempt. Never retried by the implementation.
    async fn detect(&self, image: &RgbImage) -> Result<DetectionOutcome, DetectionError>;

    /// Check that the detector is usable
    async fn probe(&self) -> Result<ServerInfo, DetectionError>;

    /// Whether the orchestrator should refine the returned box
    fn wants_refinement(&self) -> bool {
        true
    }
}

/// Box as sent by the service, either `[x1, y1, x2, y2]` or an object
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum WireBox {
    Array([f32; 4]),
    Object { x1: f32, y1: f32, x2: f32, y2: f32 },
}

impl WireBox {
    fn coords(&self) -> [f32; 4] {
        match *self {
            WireBox::Array(c) => c,
            WireBox::Object { x1, y1, x2, y2 } => [x1, y1, x2, y2],
        }
    }
}

#[derive(Deserialize, Debug)]
struct WireSize {
    width: u32,
    height: u32,
}

/// `/detect-and-crop` response
#[derive(Deserialize, Debug)]
struct DetectResponse {
    detected: bool,
    #[serde(rename = "box")]
    bbox: Option<WireBox>,
    confidence: Option<f32>,
    cropped_image: Option<String>,
    /// Space the box is expressed in, when the service resized the upload
    image_size: Option<WireSize>,
}

/// Client for the remote label detection service
#[derive(Clone)]
pub struct HttpDetectionClient {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    timeout: Duration,
    max_upload_dimension: u32,
    jpeg_quality: u8,
}

impl HttpDetectionClient {
    pub fn new(config: &DetectionConfig) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| ScanError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoint: config.endpoint.clone(),
            timeout: config.timeout(),
            max_upload_dimension: config.max_upload_dimension,
            jpeg_quality: config.jpeg_quality,
        })
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn classify(&self, err: reqwest::Error) -> DetectionError {
        if err.is_timeout() {
            DetectionError::Timeout(self.timeout_ms())
        } else if err.is_builder() {
            DetectionError::Request(err.to_string())
        } else {
            DetectionError::Unreachable(err.to_string())
        }
    }

    /// Downscale to the upload limit and JPEG-encode
    fn encode_upload(&self, image: &RgbImage) -> Result<(Vec<u8>, u32, u32), DetectionError> {
        let (w, h) = image.dimensions();
        let longest = w.max(h);

        let resized;
        let upload = if longest > self.max_upload_dimension {
            let ratio = self.max_upload_dimension as f32 / longest as f32;
            let nw = ((w as f32 * ratio).round() as u32).max(1);
            let nh = ((h as f32 * ratio).round() as u32).max(1);
            resized = image::imageops::resize(image, nw, nh, FilterType::Triangle);
            &resized
        } else {
            image
        };

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality)
            .encode_image(upload)
            .map_err(|e| DetectionError::Request(format!("failed to encode frame: {}", e)))?;

        Ok((buffer, upload.width(), upload.height()))
    }
}

#[async_trait]
impl LabelDetector for HttpDetectionClient {
    async fn detect(&self, image: &RgbImage) -> Result<DetectionOutcome, DetectionError> {
        let (frame_w, frame_h) = image.dimensions();
        let (jpeg, upload_w, upload_h) = self.encode_upload(image)?;

        let part = reqwest::multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| DetectionError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = format!("{}{}", self.base_url, self.endpoint);

        let started = Instant::now();
        let request = async {
            let response = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(DetectionError::Server {
                    status: status.as_u16(),
                    message,
                });
            }

            response.text().await.map_err(|e| self.classify(e))
        };

        let body = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| DetectionError::Timeout(self.timeout_ms()))??;

        let outcome = parse_detect_response(&body, (frame_w, frame_h), (upload_w, upload_h));
        debug!(
            latency_ms = started.elapsed().as_millis() as u64,
            outcome = outcome_label(&outcome),
            "Detection response"
        );
        if let DetectionOutcome::Malformed(reason) = &outcome {
            warn!(reason = %reason, "Malformed detection response");
        }
        Ok(outcome)
    }

    async fn probe(&self) -> Result<ServerInfo, DetectionError> {
        let url = format!("{}/", self.base_url);
        let request = async {
            let response = self.client.get(&url).send().await.map_err(|e| self.classify(e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(DetectionError::Server {
                    status: status.as_u16(),
                    message: "health check failed".to_string(),
                });
            }
            response
                .json::<ServerInfo>()
                .await
                .map_err(|e| DetectionError::Server {
                    status: status.as_u16(),
                    message: format!("invalid health payload: {}", e),
                })
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| DetectionError::Timeout(self.timeout_ms()))?
    }
}

fn outcome_label(outcome: &DetectionOutcome) -> &'static str {
    match outcome {
        DetectionOutcome::Detected(_) => "detected",
        DetectionOutcome::NotDetected => "not_detected",
        DetectionOutcome::Malformed(_) => "malformed",
    }
}

/// Turn a response body into an outcome in frame pixel space
///
/// `upload` is the size of the image that was sent; the box is scaled from
/// it (or from `image_size` when the service reports one) back to `frame`.
fn parse_detect_response(body: &str, frame: (u32, u32), upload: (u32, u32)) -> DetectionOutcome {
    let response: DetectResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => return DetectionOutcome::Malformed(format!("invalid JSON: {}", e)),
    };

    if !response.detected {
        return DetectionOutcome::NotDetected;
    }

    let Some(wire_box) = response.bbox else {
        return DetectionOutcome::Malformed("detected without box".into());
    };
    let Some(confidence) = response.confidence else {
        return DetectionOutcome::Malformed("detected without confidence".into());
    };

    let (ref_w, ref_h) = response
        .image_size
        .map(|s| (s.width, s.height))
        .unwrap_or(upload);
    if ref_w == 0 || ref_h == 0 {
        return DetectionOutcome::Malformed("zero image_size".into());
    }
    let sx = frame.0 as f32 / ref_w as f32;
    let sy = frame.1 as f32 / ref_h as f32;

    let [x1, y1, x2, y2] = wire_box.coords();
    let Some(bbox) = DetectionBox::clamped(x1 * sx, y1 * sy, x2 * sx, y2 * sy, confidence, frame.0, frame.1)
    else {
        return DetectionOutcome::Malformed(format!(
            "unusable box [{}, {}, {}, {}] confidence {}",
            x1, y1, x2, y2, confidence
        ));
    };

    let Some(encoded) = response.cropped_image else {
        return DetectionOutcome::Malformed("detected without cropped_image".into());
    };
    let crop = match decode_crop(&encoded) {
        Ok(crop) => crop,
        Err(reason) => return DetectionOutcome::Malformed(reason),
    };

    DetectionOutcome::Detected(DetectionResult::new(bbox, frame.0, frame.1).with_crop(crop))
}

fn decode_crop(encoded: &str) -> Result<RgbImage, String> {
    // Tolerate data URLs
    let payload = encoded.rsplit_once(',').map(|(_, b)| b).unwrap_or(encoded);
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid base64 crop: {}", e))?;
    let image = image::load_from_memory(&bytes).map_err(|e| format!("invalid crop image: {}", e))?;
    if image.width() == 0 || image.height() == 0 {
        return Err("empty crop".into());
    }
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Multipart;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use image::Rgb;
    use serde_json::{json, Value};

    fn crop_base64() -> String {
        let img = RgbImage::from_pixel(40, 20, Rgb([250, 250, 250]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(png)
    }

    #[test]
    fn test_parse_not_detected() {
        let outcome = parse_detect_response(r#"{"detected": false}"#, (640, 480), (640, 480));
        assert!(matches!(outcome, DetectionOutcome::NotDetected));
    }

    #[test]
    fn test_parse_array_box_with_crop() {
        let body = json!({
            "detected": true,
            "box": [10, 20, 110, 220],
            "confidence": 0.93,
            "cropped_image": crop_base64(),
        })
        .to_string();

        match parse_detect_response(&body, (640, 480), (640, 480)) {
            DetectionOutcome::Detected(result) => {
                assert_eq!(result.bbox.x1, 10.0);
                assert_eq!(result.bbox.y2, 220.0);
                assert_eq!(result.confidence, 0.93);
                assert_eq!(result.cropped_region.unwrap().dimensions(), (40, 20));
            }
            other => panic!("expected detection, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_object_box_scaled_from_upload() {
        let body = json!({
            "detected": true,
            "box": {"x1": 100, "y1": 50, "x2": 300, "y2": 250},
            "confidence": 0.5,
            "cropped_image": crop_base64(),
        })
        .to_string();

        // Frame was downscaled by half before upload
        match parse_detect_response(&body, (2560, 1440), (1280, 720)) {
            DetectionOutcome::Detected(result) => {
                assert_eq!(result.bbox.x1, 200.0);
                assert_eq!(result.bbox.y1, 100.0);
                assert_eq!(result.bbox.x2, 600.0);
                assert_eq!(result.bbox.y2, 500.0);
            }
            other => panic!("expected detection, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_uses_reported_image_size() {
        let body = json!({
            "detected": true,
            "box": [0, 0, 100, 100],
            "confidence": 0.7,
            "cropped_image": crop_base64(),
            "image_size": {"width": 200, "height": 200},
        })
        .to_string();

        match parse_detect_response(&body, (400, 400), (400, 400)) {
            DetectionOutcome::Detected(result) => assert_eq!(result.bbox.x2, 200.0),
            other => panic!("expected detection, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let cases = [
            "not json".to_string(),
            json!({"detected": true, "confidence": 0.9, "cropped_image": crop_base64()}).to_string(),
            json!({"detected": true, "box": [0, 0, 10, 10], "cropped_image": crop_base64()}).to_string(),
            json!({"detected": true, "box": [0, 0, 10, 10], "confidence": 1.7, "cropped_image": crop_base64()}).to_string(),
            json!({"detected": true, "box": [50, 50, 50, 90], "confidence": 0.9, "cropped_image": crop_base64()}).to_string(),
            json!({"detected": true, "box": [0, 0, 10, 10], "confidence": 0.9}).to_string(),
            json!({"detected": true, "box": [0, 0, 10, 10], "confidence": 0.9, "cropped_image": "@@@"}).to_string(),
        ];

        for body in &cases {
            let outcome = parse_detect_response(body, (100, 100), (100, 100));
            assert!(
                matches!(outcome, DetectionOutcome::Malformed(_)),
                "body should be malformed: {}",
                body
            );
        }
    }

    /// Fake detection service echoing the uploaded image size
    async fn spawn_fake_service(delay: Duration) -> String {
        async fn detect(mut multipart: Multipart) -> Json<Value> {
            let mut size = (0, 0);
            while let Some(field) = multipart.next_field().await.unwrap() {
                if field.name() == Some("file") {
                    let bytes = field.bytes().await.unwrap();
                    let img = image::load_from_memory(&bytes).unwrap();
                    size = (img.width(), img.height());
                }
            }
            let (w, h) = size;
            Json(json!({
                "detected": true,
                "box": [w / 4, h / 4, 3 * w / 4, 3 * h / 4],
                "confidence": 0.92,
                "cropped_image": crop_base64(),
            }))
        }

        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    Json(json!({"status": "running", "model": "label-yolo", "device": "cpu", "version": "2.0"}))
                }),
            )
            .route(
                "/detect-and-crop",
                post(move |multipart: Multipart| async move {
                    tokio::time::sleep(delay).await;
                    detect(multipart).await
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base_url: String, timeout_ms: u64) -> HttpDetectionClient {
        HttpDetectionClient::new(&DetectionConfig {
            base_url,
            timeout_ms,
            max_upload_dimension: 640,
            ..DetectionConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_detect_against_service() {
        let base_url = spawn_fake_service(Duration::ZERO).await;
        let client = client_for(base_url, 2000);

        // 1280x960 is uploaded as 640x480; the box comes back in frame space
        let frame = RgbImage::from_pixel(1280, 960, Rgb([128, 128, 128]));
        let outcome = client.detect(&frame).await.unwrap();

        match outcome {
            DetectionOutcome::Detected(result) => {
                assert_eq!(result.source_width, 1280);
                assert!((result.bbox.x1 - 320.0).abs() < 1.0, "x1 {}", result.bbox.x1);
                assert!((result.bbox.y2 - 720.0).abs() < 1.0, "y2 {}", result.bbox.y2);
                assert!(result.cropped_region.is_some());
            }
            other => panic!("expected detection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_reads_server_info() {
        let base_url = spawn_fake_service(Duration::ZERO).await;
        let info = client_for(base_url, 2000).probe().await.unwrap();
        assert_eq!(info.status, "running");
        assert_eq!(info.model.as_deref(), Some("label-yolo"));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let base_url = spawn_fake_service(Duration::from_millis(800)).await;
        let client = client_for(base_url, 100);

        let frame = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let err = client.detect(&frame).await.unwrap_err();
        assert_eq!(err, DetectionError::Timeout(100));
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        // Reserve a port, then release it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(format!("http://{}", addr), 1000);
        let frame = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let err = client.detect(&frame).await.unwrap_err();
        assert!(err.is_unreachable(), "expected unreachable, got {:?}", err);
    }
}
