//! TCP wire format between the pipeline and the inference server.
//!
//! Every message is a bincode body behind a 4-byte big-endian length prefix.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::OffloadError;
use crate::convert::PixelBuffer;
use crate::geometry::Rect;

/// Largest message either side will accept
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Encoding of the image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Jpeg,
    Png,
    /// Tightly packed 8-bit RGB
    Rgb,
}

/// Pipeline → server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadRequest {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub format: PayloadFormat,
    pub payload: Vec<u8>,
}

/// Server → pipeline, correlated by `frame_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadResponse {
    pub frame_id: u64,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// Crop coordinates on the wire
    pub location: Rect,
}

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

pub fn message_stream(stream: TcpStream) -> MessageStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_MESSAGE_LEN)
        .new_codec();
    Framed::new(stream, codec)
}

pub async fn send_message<T: Serialize>(
    stream: &mut MessageStream,
    msg: &T,
) -> Result<(), OffloadError> {
    let data = bincode::serialize(msg)?;
    stream.send(Bytes::from(data)).await?;
    Ok(())
}

pub async fn recv_message<T: DeserializeOwned>(
    stream: &mut MessageStream,
) -> Result<T, OffloadError> {
    match stream.next().await {
        Some(Ok(bytes)) => Ok(bincode::deserialize(&bytes)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(OffloadError::Closed),
    }
}

/// Serialize the crop for the wire
pub fn encode_payload(
    image: &PixelBuffer,
    format: PayloadFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, ImageError> {
    let rgb = image.to_rgb8();
    match format {
        PayloadFormat::Rgb => Ok(rgb),
        PayloadFormat::Jpeg => {
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, jpeg_quality).encode(
                &rgb,
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )?;
            Ok(out)
        }
        PayloadFormat::Png => {
            let mut out = Vec::new();
            PngEncoder::new(&mut out).write_image(
                &rgb,
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_payload_drops_alpha() {
        let mut image = PixelBuffer::new(2, 1);
        image.pixels_mut().copy_from_slice(&[0xff11_2233, 0x0044_5566]);

        let payload = encode_payload(&image, PayloadFormat::Rgb, 90).unwrap();
        assert_eq!(payload, vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    }

    #[test]
    fn jpeg_and_png_payloads_decode_to_crop_size() {
        let mut image = PixelBuffer::new(16, 16);
        image.pixels_mut().fill(0xff80_4020);

        for format in [PayloadFormat::Jpeg, PayloadFormat::Png] {
            let payload = encode_payload(&image, format, 85).unwrap();
            let decoded = image::load_from_memory(&payload).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (16, 16));
        }
    }
}
