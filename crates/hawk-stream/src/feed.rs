//! Multipart MJPEG re-publishing of the annotated frame.

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::warn;

use crate::AppState;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

// shown until the first annotated frame exists
const PLACEHOLDER_W: u32 = 640;
const PLACEHOLDER_H: u32 = 480;

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 * 1024);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(img)
        .context("encode jpeg")?;
    Ok(out)
}

pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 64);
    part.put_slice(format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY).as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

struct Feed {
    st: AppState,
    ticker: Interval,
    // publish counter of the frame in `jpeg`
    version: Option<u64>,
    jpeg: Bytes,
}

impl Feed {
    /// Next multipart chunk; `None` once the session is stopping.
    async fn next_part(&mut self) -> Option<Bytes> {
        loop {
            self.ticker.tick().await;
            if self.st.stop.is_set() {
                return None;
            }
            let (frame, version) = self.st.shared.annotated.snapshot_versioned();
            if self.version != Some(version) {
                let quality = self.st.quality;
                // encoding is CPU-bound; keep it off the async workers
                let encoded = tokio::task::spawn_blocking(move || match frame {
                    Some(f) => encode_jpeg(f.pixels(), quality),
                    None => encode_jpeg(&RgbImage::new(PLACEHOLDER_W, PLACEHOLDER_H), quality),
                })
                .await;
                match encoded {
                    Ok(Ok(jpeg)) => {
                        self.jpeg = Bytes::from(jpeg);
                        self.version = Some(version);
                    }
                    Ok(Err(e)) => {
                        warn!("stream: {:#}", e);
                        continue;
                    }
                    Err(e) => {
                        warn!("stream: encode task failed: {}", e);
                        continue;
                    }
                }
            }
            return Some(multipart_part(&self.jpeg));
        }
    }
}

/// Endless part stream at `fps`, ending when the stop signal fires.
pub fn mjpeg_stream(st: AppState) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let mut ticker = interval(Duration::from_secs_f64(1.0 / st.fps.max(1) as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let feed = Feed { st, ticker, version: None, jpeg: Bytes::new() };

    futures_util::stream::unfold(feed, |mut feed| async move {
        let part = feed.next_part().await?;
        Some((Ok(part), feed))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_is_framed_with_boundary() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
    }

    #[test]
    fn encoded_frame_is_a_jpeg() {
        let jpeg = encode_jpeg(&RgbImage::new(16, 16), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
